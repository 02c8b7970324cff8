use std::future::Future;
use std::time::SystemTime;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::blob::blob_store::{BlobHeaders, BlobRef, BLOB_NAME_HEADER, CONTENT_TYPE_HEADER, CREATED_BY_HEADER};
use crate::error::{RepoError, RepoResult};
use crate::maven::checksum::read_checksum;
use crate::maven::coordinates::{ArtifactCoordinates, HashType, MavenPath};
use crate::maven::policy::RedeployPolicy;
use crate::storage::facet::StorageFacet;
use crate::storage::records::{Asset, Component, Record};
use crate::storage::tx::StorageTx;
use crate::util::digesting_stream::HashAlgorithm;
use crate::util::mime::{check_content_type, detect_types, ContentTypeCheck, APPLICATION_OCTET_STREAM};
use crate::util::payload::{stream_of, Payload};

pub const FORMAT: &str = "maven2";

const CREATED_BY: &str = "arti-store";
const EXT_CHECKSUM: &str = "extChecksum";
const MAX_ATTEMPTS: u32 = 5;
/// bytes used for content type detection
const SNIFF_LENGTH: usize = 1024;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WriteOutcome {
    Created,
    Updated,
}

pub fn component_key(artifact: &ArtifactCoordinates) -> String {
    format!("{}:{}:{}", artifact.group_id, artifact.artifact_id, artifact.base_version)
}

/// `groupId:artifactId:version[:classifier]:extension`
pub fn artifact_key(artifact: &ArtifactCoordinates) -> String {
    match &artifact.classifier {
        Some(classifier) => format!("{}:{}:{}:{}:{}", artifact.group_id, artifact.artifact_id, artifact.version, classifier, artifact.extension),
        None => format!("{}:{}:{}:{}", artifact.group_id, artifact.artifact_id, artifact.version, artifact.extension),
    }
}

/// Key of the asset holding the file at `path`. Hash files are stored as attributes of the asset
///  they belong to.
pub fn asset_key(path: &MavenPath) -> String {
    match path.hash_owner() {
        MavenPath::Artifact(artifact) => artifact_key(&artifact),
        MavenPath::Plain(coordinates) => coordinates.path.trim_start_matches('/').to_string(),
    }
}

fn ext_checksum_property(algorithm: HashAlgorithm) -> String {
    format!("{}.{}.{}", FORMAT, EXT_CHECKSUM, algorithm.name())
}

fn checksum_property(algorithm: HashAlgorithm) -> String {
    format!("checksum.{}", algorithm.name())
}

/// Maven content of one repository: artifacts, metadata and their hash files, stored as
///  components and assets.
#[derive(Clone)]
pub struct MavenContentFacet {
    storage: StorageFacet,
    strict_content_type_validation: bool,
}

impl MavenContentFacet {
    pub fn new(storage: StorageFacet, strict_content_type_validation: bool) -> MavenContentFacet {
        MavenContentFacet {
            storage,
            strict_content_type_validation,
        }
    }

    pub fn storage(&self) -> &StorageFacet {
        &self.storage
    }

    /// `path` must not be a hash
    async fn find_asset(&self, tx: &mut StorageTx, path: &MavenPath) -> RepoResult<Option<Asset>> {
        let bucket = self.storage.bucket();
        match path {
            MavenPath::Artifact(artifact) => {
                match tx.find_component_with_property("key", &component_key(artifact), bucket).await? {
                    Some(component) => tx.find_asset(bucket, Some(&component), &artifact_key(artifact)).await,
                    None => Ok(None),
                }
            }
            MavenPath::Plain(_) => tx.find_asset(bucket, None, &asset_key(path)).await,
        }
    }

    /// Content at `path`, `None` if there is none. For a hash file, this is the checksum uploaded
    ///  for the file it belongs to, or else the checksum computed when storing it.
    ///
    /// A redeploy deletes the previous blob right after its commit, so a reader may find the asset
    ///  pointing at a blob that is already gone. Such reads start over; a blob that is still
    ///  missing on the next read is an inconsistency.
    pub async fn get(&self, path: &MavenPath) -> RepoResult<Option<Payload>> {
        let mut missing: Option<BlobRef> = None;
        let mut attempt = 1;
        loop {
            let mut tx = self.storage.open_tx();
            let asset = match self.find_asset(&mut tx, &path.hash_owner()).await? {
                Some(asset) => asset,
                None => {
                    trace!("{} not found in {}", path.path(), self.storage.bucket());
                    return Ok(None);
                }
            };

            if let Some(hash_type) = path.hash_type() {
                let algorithm = hash_type.algorithm();
                let checksum = asset.property(&ext_checksum_property(algorithm))
                    .or_else(|| asset.property(&checksum_property(algorithm)));
                return Ok(checksum.map(|checksum| {
                    let mut payload = Payload::from_text(checksum);
                    payload.last_updated = asset.last_updated;
                    payload
                }));
            }

            let blob_ref = asset.blob_ref.clone()
                .ok_or_else(|| RepoError::StorageInconsistency(format!("asset {} in {} has no blob", asset.name, asset.bucket)))?;
            match tx.get_blob(&blob_ref).await? {
                Some(blob) => {
                    return Ok(Some(Payload {
                        data: blob.data,
                        size: asset.size.or(Some(blob.metrics.size)),
                        content_type: asset.content_type.clone(),
                        last_updated: asset.last_updated,
                        sha1: Some(blob.metrics.sha1),
                        md5: Some(blob.metrics.md5),
                    }));
                }
                None if attempt < MAX_ATTEMPTS && missing.as_ref() != Some(&blob_ref) => {
                    debug!("blob {} of {} in {} is gone, re-reading", blob_ref, path.path(), self.storage.bucket());
                    missing = Some(blob_ref);
                    attempt += 1;
                }
                None => {
                    return Err(RepoError::StorageInconsistency(format!("asset {} in {} refers to missing blob {}", asset.name, asset.bucket, blob_ref)));
                }
            }
        }
    }

    pub async fn exists(&self, path: &MavenPath) -> RepoResult<bool> {
        let mut tx = self.storage.open_tx();
        Ok(self.find_asset(&mut tx, &path.hash_owner()).await?.is_some())
    }

    /// the checksum computed when the content was stored
    pub async fn computed_checksum(&self, path: &MavenPath, algorithm: HashAlgorithm) -> RepoResult<Option<String>> {
        let mut tx = self.storage.open_tx();
        Ok(self.find_asset(&mut tx, &path.hash_owner()).await?
            .and_then(|a| a.property(&checksum_property(algorithm)).map(|s| s.to_string())))
    }

    pub async fn last_updated(&self, path: &MavenPath) -> RepoResult<Option<SystemTime>> {
        let mut tx = self.storage.open_tx();
        Ok(self.find_asset(&mut tx, &path.hash_owner()).await?.and_then(|a| a.last_updated))
    }

    /// Marks content as fresh without touching it. `false` if there is no such content.
    pub async fn set_last_updated(&self, path: &MavenPath, last_updated: SystemTime) -> RepoResult<bool> {
        let owner = &path.hash_owner();
        let _guard = self.storage.lock(&asset_key(owner)).await;

        self.with_retries(owner, move || async move {
            let mut tx = self.storage.open_tx();
            let mut asset = match self.find_asset(&mut tx, owner).await? {
                Some(asset) => asset,
                None => return Ok(false),
            };
            asset.last_updated = Some(last_updated);
            tx.save_asset(&asset).await?;
            tx.commit().await?;
            Ok(true)
        }).await
    }

    /// Stores content. For a hash file, the payload is a checksum file which must match the
    ///  checksum of the already stored file it belongs to.
    ///
    /// `redeploy_policy` is checked while holding the asset's lock, so two uploads of a new
    ///  artifact cannot both pass it.
    pub async fn put(&self, path: &MavenPath, payload: Payload, redeploy_policy: RedeployPolicy) -> RepoResult<WriteOutcome> {
        let owner = path.hash_owner();
        let _guard = self.storage.lock(&asset_key(&owner)).await;

        if let Some(artifact) = path.as_artifact() {
            if !artifact.is_hash() {
                redeploy_policy.check(artifact, self.exists(path).await?)?;
            }
        }

        let declared_content_type = payload.content_type.clone();
        let content = payload.into_bytes().await?;

        if let Some(hash_type) = path.hash_type() {
            return self.put_checksum(path, &owner, hash_type, &content).await;
        }

        let content_type = self.determine_content_type(path, &content, declared_content_type.as_deref())?;
        let content_type = content_type.as_str();
        self.with_retries(path, move || self.store_content(path, content.clone(), content_type)).await
    }

    async fn with_retries<T, F, Fut>(&self, path: &MavenPath, mut operation: F) -> RepoResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RepoResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Err(RepoError::Conflict(msg)) if attempt < MAX_ATTEMPTS => {
                    debug!("retrying write of {} in {} after conflict: {}", path.path(), self.storage.bucket(), msg);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn determine_content_type(&self, path: &MavenPath, content: &[u8], declared: Option<&str>) -> RepoResult<String> {
        let head = &content[..content.len().min(SNIFF_LENGTH)];
        match check_content_type(path.file_name(), head, declared) {
            ContentTypeCheck::Accepted(content_type) => Ok(content_type),
            ContentTypeCheck::Mismatch(reason) if self.strict_content_type_validation => {
                debug!("rejecting {} in {}: {}", path.path(), self.storage.bucket(), reason);
                Err(RepoError::InvalidContent(reason))
            }
            ContentTypeCheck::Mismatch(reason) => {
                debug!("{}", reason);
                let fallback = declared
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty())
                    .or_else(|| detect_types(path.file_name(), head).first().map(|t| t.to_string()))
                    .unwrap_or_else(|| APPLICATION_OCTET_STREAM.to_string());
                Ok(fallback)
            }
        }
    }

    async fn find_or_create_component(&self, tx: &mut StorageTx, artifact: &ArtifactCoordinates) -> RepoResult<Component> {
        let bucket = self.storage.bucket();
        let key = component_key(artifact);
        if let Some(component) = tx.find_component_with_property("key", &key, bucket).await? {
            return Ok(component);
        }

        let mut component = tx.create_component(bucket, FORMAT);
        component.key = key;
        component.group = Some(artifact.group_id.clone());
        component.name = artifact.artifact_id.clone();
        component.version = Some(artifact.base_version.clone());
        let attributes = component.attributes.child_mut(FORMAT);
        attributes.set("groupId", artifact.group_id.as_str());
        attributes.set("artifactId", artifact.artifact_id.as_str());
        attributes.set("baseVersion", artifact.base_version.as_str());
        tx.save_component(&component);
        Ok(component)
    }

    fn new_asset(&self, tx: &StorageTx, path: &MavenPath, component: Option<&Component>) -> Asset {
        let mut asset = tx.create_asset(self.storage.bucket(), FORMAT, component);
        asset.key = asset_key(path);
        asset.name = path.path().trim_start_matches('/').to_string();

        if let MavenPath::Artifact(artifact) = path {
            let attributes = asset.attributes.child_mut(FORMAT);
            attributes.set("groupId", artifact.group_id.as_str());
            attributes.set("artifactId", artifact.artifact_id.as_str());
            attributes.set("version", artifact.version.as_str());
            attributes.set("baseVersion", artifact.base_version.as_str());
            attributes.set_opt("classifier", artifact.classifier.as_deref());
            attributes.set("extension", artifact.extension.as_str());
            attributes.set("snapshot", artifact.snapshot);
        }
        asset
    }

    async fn store_content(&self, path: &MavenPath, content: Bytes, content_type: &str) -> RepoResult<WriteOutcome> {
        let mut tx = self.storage.open_tx();
        let component = match path {
            MavenPath::Artifact(artifact) => Some(self.find_or_create_component(&mut tx, artifact).await?),
            MavenPath::Plain(_) => None,
        };

        let (mut asset, outcome) = match self.find_asset(&mut tx, path).await? {
            Some(asset) => (asset, WriteOutcome::Updated),
            None => (self.new_asset(&tx, path, component.as_ref()), WriteOutcome::Created),
        };

        let mut headers = BlobHeaders::new();
        headers.insert(BLOB_NAME_HEADER.to_string(), asset.name.clone());
        headers.insert(CREATED_BY_HEADER.to_string(), CREATED_BY.to_string());
        headers.insert(CONTENT_TYPE_HEADER.to_string(), content_type.to_string());

        tx.set_blob(&mut asset, stream_of(content), headers, &HashAlgorithm::ALL, content_type).await?;
        asset.last_updated = Some(SystemTime::now());
        // checksums uploaded for the previous content do not apply to the new one
        asset.attributes.child_mut(FORMAT).remove(EXT_CHECKSUM);

        tx.save_asset(&asset).await?;
        tx.commit().await?;
        debug!("stored {} in {} ({:?})", path.path(), self.storage.bucket(), outcome);
        Ok(outcome)
    }

    async fn put_checksum(&self, path: &MavenPath, owner: &MavenPath, hash_type: HashType, content: &[u8]) -> RepoResult<WriteOutcome> {
        let text = String::from_utf8_lossy(content);
        let checksum = read_checksum(&text)
            .ok_or_else(|| RepoError::invalid_content(format!("Unrecognized checksum in {}", path.path())))?;
        let checksum = checksum.as_str();
        let algorithm = hash_type.algorithm();

        self.with_retries(path, move || async move {
            let mut tx = self.storage.open_tx();
            let mut asset = self.find_asset(&mut tx, owner).await?
                .ok_or_else(|| RepoError::invalid_content(format!("{} does not exist, cannot store its checksum", owner.path())))?;

            let stored = asset.property(&checksum_property(algorithm))
                .map(|s| s.to_string())
                .ok_or_else(|| RepoError::StorageInconsistency(format!("{} in {} has no {} checksum", owner.path(), self.storage.bucket(), algorithm.name())))?;
            if stored != checksum {
                tx.rollback().await;
                return Err(RepoError::invalid_content(format!("Checksum {} does not match {} {} of {}", checksum, algorithm.name(), stored, owner.path())));
            }

            let ext_checksums = asset.attributes.child_mut(FORMAT).child_mut(EXT_CHECKSUM);
            let outcome = if ext_checksums.contains(algorithm.name()) { WriteOutcome::Updated } else { WriteOutcome::Created };
            ext_checksums.set(algorithm.name(), checksum);

            tx.save_asset(&asset).await?;
            tx.commit().await?;
            Ok(outcome)
        }).await
    }

    /// `false` if there was nothing to delete. Deleting a hash file removes only the checksum
    ///  uploaded for it; deleting the last asset of a component deletes the component.
    pub async fn delete(&self, path: &MavenPath) -> RepoResult<bool> {
        let owner = &path.hash_owner();
        let _guard = self.storage.lock(&asset_key(owner)).await;

        self.with_retries(path, move || async move {
            let mut tx = self.storage.open_tx();
            let mut asset = match self.find_asset(&mut tx, owner).await? {
                Some(asset) => asset,
                None => return Ok(false),
            };

            if let Some(hash_type) = path.hash_type() {
                let algorithm = hash_type.algorithm();
                if asset.property(&ext_checksum_property(algorithm)).is_none() {
                    return Ok(false);
                }
                asset.attributes.child_mut(FORMAT).child_mut(EXT_CHECKSUM).remove(algorithm.name());
                tx.save_asset(&asset).await?;
            }
            else {
                if let Some(blob_ref) = &asset.blob_ref {
                    tx.delete_blob(blob_ref);
                }
                tx.delete_asset(&asset).await?;

                if let Some(component_id) = &asset.component {
                    if let Some(component) = tx.find_component_by_id(component_id).await? {
                        if tx.browse_assets(&component).await?.is_empty() {
                            debug!("deleting component {} in {} with its last asset", component.key, component.bucket);
                            tx.delete_component(&component);
                        }
                    }
                }
            }

            tx.commit().await?;
            debug!("deleted {} in {}", path.path(), self.storage.bucket());
            Ok(true)
        }).await
    }
}
