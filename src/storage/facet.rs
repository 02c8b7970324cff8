use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;

use crate::blob::blob_store::BlobStore;
use crate::blob::manager::BlobStoreManager;
use crate::storage::metadata_store::MetadataStore;
use crate::storage::tx::StorageTx;
use crate::util::keyed_lock::KeyedLocks;

/// A repository's view of storage: its bucket in the metadata store and its blob store
#[derive(Clone)]
pub struct StorageFacet {
    bucket: String,
    blob_store_name: String,
    blob_store: Arc<dyn BlobStore>,
    metadata: Arc<MetadataStore>,
    blob_stores: Arc<BlobStoreManager>,
    locks: Arc<KeyedLocks>,
}

impl StorageFacet {
    /// Provisions the named blob store if it does not exist yet
    pub async fn new(bucket: &str, blob_store_name: &str, metadata: Arc<MetadataStore>, blob_stores: Arc<BlobStoreManager>) -> anyhow::Result<StorageFacet> {
        let blob_store = blob_stores.get_or_create_default(blob_store_name).await?;
        Ok(StorageFacet {
            bucket: bucket.to_string(),
            blob_store_name: blob_store_name.to_string(),
            blob_store,
            metadata,
            blob_stores,
            locks: Arc::new(KeyedLocks::new()),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn blob_store_name(&self) -> &str {
        &self.blob_store_name
    }

    pub fn open_tx(&self) -> StorageTx {
        StorageTx::new(&self.bucket, self.metadata.clone(), &self.blob_store_name, self.blob_store.clone(), self.blob_stores.clone())
    }

    /// Serializes read-modify-write cycles on one asset key within this process
    pub async fn lock(&self, asset_key: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(asset_key).await
    }
}
