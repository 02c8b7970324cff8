//! Shared fixtures for unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;

use crate::blob::manager::{BlobStoreConfiguration, BlobStoreConfigurationStore, BlobStoreManager, BlobStoreRecipe, DEFAULT_BLOB_STORE_NAME};
use crate::storage::facet::StorageFacet;
use crate::storage::metadata_store::MetadataStore;
use crate::util::http_downloader::{RemoteContent, RemoteFetcher, RemoteResponse};

/// a started manager with a transient default blob store
pub async fn blob_stores() -> Arc<BlobStoreManager> {
    let manager = BlobStoreManager::new("/nonexistent", BlobStoreConfigurationStore::in_memory());
    manager.start().await.unwrap();
    manager.create(BlobStoreConfiguration {
        name: DEFAULT_BLOB_STORE_NAME.to_string(),
        recipe: BlobStoreRecipe::Transient,
    }).await.unwrap();
    Arc::new(manager)
}

/// in-memory storage for one bucket
pub async fn storage_facet(bucket: &str) -> StorageFacet {
    StorageFacet::new(bucket, DEFAULT_BLOB_STORE_NAME, Arc::new(MetadataStore::in_memory().unwrap()), blob_stores().await)
        .await
        .unwrap()
}

/// Remote origin serving fixed content per path, counting fetches
#[derive(Default)]
pub struct FakeRemote {
    content: Mutex<HashMap<String, RemoteContent>>,
    failing: Mutex<bool>,
    fetches: AtomicU32,
}

impl FakeRemote {
    pub fn new() -> FakeRemote {
        Default::default()
    }

    pub fn serve(&self, path: &str, body: &'static [u8]) {
        self.serve_content(path, RemoteContent {
            body: Bytes::from_static(body),
            content_type: None,
            sha1: None,
            md5: None,
        });
    }

    pub fn serve_content(&self, path: &str, content: RemoteContent) {
        self.content.lock().unwrap().insert(path.trim_start_matches('/').to_string(), content);
    }

    pub fn remove(&self, path: &str) {
        self.content.lock().unwrap().remove(path.trim_start_matches('/'));
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteFetcher for FakeRemote {
    fn url_for(&self, path: &str) -> String {
        format!("http://remote.invalid/{}", path.trim_start_matches('/'))
    }

    async fn fetch(&self, path: &str) -> anyhow::Result<RemoteResponse> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if *self.failing.lock().unwrap() {
            return Err(anyhow!("connection refused"));
        }
        match self.content.lock().unwrap().get(path.trim_start_matches('/')) {
            Some(content) => Ok(RemoteResponse::Found(content.clone())),
            None => Ok(RemoteResponse::NotFound),
        }
    }
}
