use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use uuid::Uuid;

use crate::blob::blob_store::{Blob, BlobHeaders, BlobMetrics, BlobStore};
use crate::util::digesting_stream::DigestingStream;
use crate::util::payload::{stream_of, PayloadStream};

struct StoredBlob {
    data: Bytes,
    headers: BlobHeaders,
    metrics: BlobMetrics,
}

/// in-memory blob store, neither optimized nor particularly robust - for testing purposes
#[derive(Default)]
pub struct TransientBlobStore {
    data: Arc<Mutex<HashMap<Uuid, StoredBlob>>>,
}
impl TransientBlobStore {
    pub fn new() -> TransientBlobStore {
        Default::default()
    }

    fn blobs(&self) -> anyhow::Result<MutexGuard<HashMap<Uuid, StoredBlob>>> {
        self.data.lock()
            .map_err(|_| anyhow!("transient blob store lock is poisoned"))
    }

    pub fn len(&self) -> usize {
        self.blobs().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for TransientBlobStore {
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn create(&self, data: PayloadStream, headers: BlobHeaders) -> anyhow::Result<(Uuid, BlobMetrics)> {
        let mut data = DigestingStream::new(data);
        let key = Uuid::new_v4();

        let mut buffer = BytesMut::new();
        loop {
            match data.next().await {
                Some(bytes) => {
                    buffer.extend_from_slice(&bytes?);
                }
                None =>
                    break,
            }
        }

        let metrics = BlobMetrics::from_digests(data.digests()
            .ok_or_else(|| anyhow!("content stream ended without digests"))?);

        self.blobs()?
            .insert(key, StoredBlob {
                data: buffer.freeze(),
                headers,
                metrics: metrics.clone(),
            });

        Ok((key, metrics))
    }

    async fn get(&self, key: &Uuid) -> anyhow::Result<Option<Blob>> {
        let blobs = self.blobs()?;

        if let Some(stored) = blobs.get(key) {
            Ok(Some(Blob {
                id: *key,
                headers: stored.headers.clone(),
                metrics: stored.metrics.clone(),
                data: stream_of(stored.data.clone()),
            }))
        }
        else {
            Ok(None)
        }
    }

    async fn delete(&self, key: &Uuid) -> anyhow::Result<bool> {
        Ok(self.blobs()?
            .remove(key)
            .is_some()
        )
    }
}
