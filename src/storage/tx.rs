use std::mem::take;
use std::sync::Arc;

use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::blob::blob_store::{Blob, BlobHeaders, BlobRef, BlobStore};
use crate::blob::manager::BlobStoreManager;
use crate::error::{RepoError, RepoResult};
use crate::storage::attributes::NestedAttributesMap;
use crate::storage::metadata_store::{ChangeSet, MetadataStore, Versioned};
use crate::storage::records::{Asset, Component, EntityId, Record};
use crate::util::digesting_stream::HashAlgorithm;
use crate::util::payload::PayloadStream;

/// A unit of work against one repository's storage. Reads see committed state plus this
///  transaction's own writes; writes become visible to others atomically on `commit`.
///
/// A transaction that is dropped without `commit` or `rollback` is rolled back: blobs it created
///  are deleted in the background.
pub struct StorageTx {
    bucket: String,
    metadata: Arc<MetadataStore>,
    blob_store_name: String,
    blob_store: Arc<dyn BlobStore>,
    blob_stores: Arc<BlobStoreManager>,
    changes: ChangeSet,
    /// blobs created by this transaction, all in `blob_store`
    created_blobs: Vec<Uuid>,
    /// blobs to delete once the transaction has committed
    doomed_blobs: Vec<BlobRef>,
    active: bool,
}

impl StorageTx {
    pub(crate) fn new(bucket: &str, metadata: Arc<MetadataStore>, blob_store_name: &str, blob_store: Arc<dyn BlobStore>, blob_stores: Arc<BlobStoreManager>) -> StorageTx {
        StorageTx {
            bucket: bucket.to_string(),
            metadata,
            blob_store_name: blob_store_name.to_string(),
            blob_store,
            blob_stores,
            changes: Default::default(),
            created_blobs: vec![],
            doomed_blobs: vec![],
            active: true,
        }
    }

    /// the bucket of the repository that opened this transaction
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn note_read(&mut self, id: EntityId, revision: u64) {
        self.changes.read_revisions.entry(id).or_insert(revision);
    }

    fn is_persistent(&self, id: &EntityId) -> bool {
        self.changes.read_revisions.contains_key(id)
    }

    fn merge_components(&mut self, committed: Vec<Versioned<Component>>, predicate: impl Fn(&Component) -> bool) -> Vec<Component> {
        let mut result = vec![];
        for versioned in committed {
            if !self.changes.components.contains_key(&versioned.record.id) && predicate(&versioned.record) {
                self.note_read(versioned.record.id, versioned.revision);
                result.push(versioned.record);
            }
        }
        result.extend(self.changes.components.values().flatten().filter(|c| predicate(c)).cloned());
        result
    }

    fn merge_assets(&mut self, committed: Vec<Versioned<Asset>>, predicate: impl Fn(&Asset) -> bool) -> Vec<Asset> {
        let mut result = vec![];
        for versioned in committed {
            if !self.changes.assets.contains_key(&versioned.record.id) && predicate(&versioned.record) {
                self.note_read(versioned.record.id, versioned.revision);
                result.push(versioned.record);
            }
        }
        result.extend(self.changes.assets.values().flatten().filter(|a| predicate(a)).cloned());
        result.sort_by(|a, b| a.key.cmp(&b.key));
        result
    }

    /// lookup through the unique component key index
    pub async fn find_component(&mut self, bucket: &str, key: &str) -> RepoResult<Option<Component>> {
        if let Some(local) = self.changes.components.values().flatten().find(|c| c.bucket == bucket && c.key == key) {
            return Ok(Some(local.clone()));
        }

        let versioned = match self.metadata.component_by_key(bucket, key).await? {
            Some(versioned) => versioned,
            None => return Ok(None),
        };
        if self.changes.components.contains_key(&versioned.record.id) {
            // deleted or re-keyed by this transaction
            return Ok(None);
        }
        self.note_read(versioned.record.id, versioned.revision);
        Ok(Some(versioned.record))
    }

    /// `key` uses the unique key index, other properties scan the bucket
    pub async fn find_component_with_property(&mut self, property: &str, value: &str, bucket: &str) -> RepoResult<Option<Component>> {
        if property == "key" {
            return self.find_component(bucket, value).await;
        }
        let committed = self.metadata.bucket_components(bucket).await?;
        Ok(self.merge_components(committed, |c| c.bucket == bucket && c.property(property) == Some(value))
            .into_iter()
            .next())
    }

    pub async fn find_component_by_id(&mut self, id: &EntityId) -> RepoResult<Option<Component>> {
        if let Some(local) = self.changes.components.get(id) {
            return Ok(local.clone());
        }

        let found = self.metadata.component(*id).await?;
        Ok(found.map(|versioned| {
            self.note_read(*id, versioned.revision);
            versioned.record
        }))
    }

    /// lookup through the unique asset key index; `component` is `None` for assets that belong
    ///  to no component, e.g. repository metadata
    pub async fn find_asset(&mut self, bucket: &str, component: Option<&Component>, key: &str) -> RepoResult<Option<Asset>> {
        let component_id = component.map(|c| c.id);
        if let Some(local) = self.changes.assets.values().flatten()
            .find(|a| a.bucket == bucket && a.component == component_id && a.key == key)
        {
            return Ok(Some(local.clone()));
        }

        let versioned = match self.metadata.asset_by_key(bucket, component_id, key).await? {
            Some(versioned) => versioned,
            None => return Ok(None),
        };
        if self.changes.assets.contains_key(&versioned.record.id) {
            return Ok(None);
        }
        self.note_read(versioned.record.id, versioned.revision);
        Ok(Some(versioned.record))
    }

    pub async fn find_asset_by_id(&mut self, id: &EntityId) -> RepoResult<Option<Asset>> {
        if let Some(local) = self.changes.assets.get(id) {
            return Ok(local.clone());
        }

        let found = self.metadata.asset(*id).await?;
        Ok(found.map(|versioned| {
            self.note_read(*id, versioned.revision);
            versioned.record
        }))
    }

    /// all assets of a component, ordered by key
    pub async fn browse_assets(&mut self, component: &Component) -> RepoResult<Vec<Asset>> {
        let id = component.id;
        let committed = self.metadata.component_assets(id).await?;
        Ok(self.merge_assets(committed, |a| a.component == Some(id)))
    }

    /// all assets of a bucket, ordered by key
    pub async fn browse_bucket_assets(&mut self, bucket: &str) -> RepoResult<Vec<Asset>> {
        let committed = self.metadata.bucket_assets(bucket).await?;
        Ok(self.merge_assets(committed, |a| a.bucket == bucket))
    }

    /// A new component that is not stored until it is saved
    pub fn create_component(&self, bucket: &str, format: &str) -> Component {
        Component {
            id: Uuid::new_v4(),
            bucket: bucket.to_string(),
            format: format.to_string(),
            key: String::new(),
            group: None,
            name: String::new(),
            version: None,
            attributes: NestedAttributesMap::new(),
        }
    }

    /// A new asset that is not stored until it is saved
    pub fn create_asset(&self, bucket: &str, format: &str, component: Option<&Component>) -> Asset {
        Asset {
            id: Uuid::new_v4(),
            bucket: bucket.to_string(),
            component: component.map(|c| c.id),
            format: format.to_string(),
            key: String::new(),
            name: String::new(),
            blob_ref: None,
            content_type: None,
            size: None,
            last_updated: None,
            attributes: NestedAttributesMap::new(),
        }
    }

    pub fn save_component(&mut self, component: &Component) {
        self.changes.components.insert(component.id, Some(component.clone()));
    }

    /// Saving a new asset also rewrites its component, so that concurrent structural changes to
    ///  the component conflict at commit.
    pub async fn save_asset(&mut self, asset: &Asset) -> RepoResult<()> {
        let is_new = !self.is_persistent(&asset.id) && !self.changes.assets.contains_key(&asset.id);
        if is_new {
            if let Some(component_id) = &asset.component {
                self.touch_component(component_id).await?;
            }
        }
        self.changes.assets.insert(asset.id, Some(asset.clone()));
        Ok(())
    }

    async fn touch_component(&mut self, id: &EntityId) -> RepoResult<()> {
        if self.changes.components.contains_key(id) {
            return Ok(());
        }
        match self.find_component_by_id(id).await? {
            Some(component) => {
                self.save_component(&component);
                Ok(())
            }
            None => Err(RepoError::Conflict(format!("component {} was deleted concurrently", id))),
        }
    }

    pub fn delete_component(&mut self, component: &Component) {
        self.changes.components.insert(component.id, None);
    }

    /// Removes the asset record. Its blob must be deleted separately with `delete_blob`.
    pub async fn delete_asset(&mut self, asset: &Asset) -> RepoResult<()> {
        if let Some(component_id) = &asset.component {
            if self.changes.components.get(component_id).map(|c| c.is_some()).unwrap_or(true) {
                self.touch_component(component_id).await?;
            }
        }
        self.changes.assets.insert(asset.id, None);
        Ok(())
    }

    /// Streams `data` into this repository's blob store, computing the requested hashes on the
    ///  way, and points the asset at the new blob. The asset's previous blob is deleted when the
    ///  transaction commits. The asset itself still needs to be saved.
    pub async fn set_blob(&mut self, asset: &mut Asset, data: PayloadStream, headers: BlobHeaders, hash_algorithms: &[HashAlgorithm], content_type: &str) -> RepoResult<BlobRef> {
        let (blob_id, metrics) = self.blob_store.create(data, headers).await?;
        self.created_blobs.push(blob_id);

        let blob_ref = BlobRef::new(&self.blob_store_name, blob_id);
        trace!("created blob {} for {}", blob_ref, asset.name);
        if let Some(previous) = asset.blob_ref.replace(blob_ref.clone()) {
            self.doomed_blobs.push(previous);
        }

        let checksums = asset.attributes.child_mut("checksum");
        for algorithm in HashAlgorithm::ALL {
            if hash_algorithms.contains(&algorithm) {
                checksums.set(algorithm.name(), metrics.hash(algorithm));
            }
            else {
                checksums.remove(algorithm.name());
            }
        }
        asset.size = Some(metrics.size);
        asset.content_type = Some(content_type.to_string());
        Ok(blob_ref)
    }

    async fn blob_store_for(&self, blob_ref: &BlobRef) -> RepoResult<Arc<dyn BlobStore>> {
        if blob_ref.store == self.blob_store_name {
            return Ok(self.blob_store.clone());
        }
        self.blob_stores.get(&blob_ref.store).await?
            .ok_or_else(|| RepoError::StorageInconsistency(format!("blob {} refers to unknown blob store", blob_ref)))
    }

    pub async fn get_blob(&self, blob_ref: &BlobRef) -> RepoResult<Option<Blob>> {
        let blob_store = self.blob_store_for(blob_ref).await?;
        Ok(blob_store.get(&blob_ref.blob_id).await?)
    }

    /// The asset's blob. An asset without a blob, or whose blob does not exist, is corrupt.
    pub async fn require_blob(&self, asset: &Asset) -> RepoResult<Blob> {
        let blob_ref = asset.blob_ref.as_ref()
            .ok_or_else(|| RepoError::StorageInconsistency(format!("asset {} in {} has no blob", asset.name, asset.bucket)))?;
        self.get_blob(blob_ref).await?
            .ok_or_else(|| RepoError::StorageInconsistency(format!("asset {} in {} refers to missing blob {}", asset.name, asset.bucket, blob_ref)))
    }

    /// deletion happens once the transaction has committed
    pub fn delete_blob(&mut self, blob_ref: &BlobRef) {
        self.doomed_blobs.push(blob_ref.clone());
    }

    pub async fn commit(mut self) -> RepoResult<()> {
        self.active = false;

        if !self.changes.is_empty() {
            if let Err(e) = self.metadata.commit(&self.changes).await {
                match &e {
                    RepoError::Conflict(msg) => {
                        debug!("commit in {} failed: {}", self.bucket, msg);
                        self.delete_created_blobs().await;
                    }
                    // the outcome of a failed commit is unknown, so its blobs must stay
                    _ => error!("commit in {} failed, keeping {} new blobs: {}", self.bucket, self.created_blobs.len(), e),
                }
                return Err(e);
            }
        }

        self.created_blobs.clear();
        for blob_ref in take(&mut self.doomed_blobs) {
            let deleted = match self.blob_store_for(&blob_ref).await {
                Ok(store) => store.delete(&blob_ref.blob_id).await.map_err(RepoError::from),
                Err(e) => Err(e),
            };
            match deleted {
                Ok(_) => trace!("deleted blob {}", blob_ref),
                Err(e) => warn!("failed to delete blob {} after commit: {}", blob_ref, e),
            }
        }
        Ok(())
    }

    pub async fn rollback(mut self) {
        self.active = false;
        self.delete_created_blobs().await;
    }

    async fn delete_created_blobs(&mut self) {
        for blob_id in take(&mut self.created_blobs) {
            if let Err(e) = self.blob_store.delete(&blob_id).await {
                warn!("failed to delete blob {}@{} of rolled back transaction: {}", self.blob_store_name, blob_id, e);
            }
        }
    }
}

impl Drop for StorageTx {
    fn drop(&mut self) {
        if !self.active || self.created_blobs.is_empty() {
            return;
        }

        let blob_ids = take(&mut self.created_blobs);
        let blob_store = self.blob_store.clone();
        let blob_store_name = self.blob_store_name.clone();
        debug!("transaction in {} dropped without commit, deleting {} blobs", self.bucket, blob_ids.len());

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for blob_id in blob_ids {
                        if let Err(e) = blob_store.delete(&blob_id).await {
                            warn!("failed to delete blob {}@{} of dropped transaction: {}", blob_store_name, blob_id, e);
                        }
                    }
                });
            }
            Err(_) => warn!("no runtime to delete {} blobs of dropped transaction in {}", blob_ids.len(), blob_store_name),
        }
    }
}
