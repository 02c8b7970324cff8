use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::fs::{create_dir_all, read_to_string, remove_file, rename, try_exists, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::blob::blob_store::{Blob, BlobHeaders, BlobMetrics, BlobStore};
use crate::util::digesting_stream::DigestingStream;
use crate::util::payload::PayloadStream;

#[derive(Serialize, Deserialize)]
struct BlobIndexEntry {
    headers: BlobHeaders,
    metrics: BlobMetrics,
}

/// Blob store in a file system directory: content goes to `<root>/content`, each blob's headers
///  and metrics to `<root>/metadata`. Both trees are sharded by the blob id's leading characters.
///
/// Files are written under a temporary name and renamed into place, content first. A blob is
///  visible once its metadata file exists.
pub struct FsBlobStore {
    root: PathBuf,
}
impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> FsBlobStore {
        FsBlobStore {
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sharded_path(&self, tree: &str, id: &Uuid, suffix: &str) -> PathBuf {
        let mut result = self.root.clone();
        result.push(tree);

        let key_string = id.as_hyphenated().to_string();
        // first level only single character to facilitate sharding
        result.push(&key_string[0..1]);
        result.push(&key_string[1..4]);
        result.push(&key_string[4..6]);
        result.push(&key_string[6..8]);
        result.push(format!("{}{}", key_string, suffix));

        result
    }

    fn content_path(&self, id: &Uuid) -> PathBuf {
        self.sharded_path("content", id, ".bytes")
    }

    fn metadata_path(&self, id: &Uuid) -> PathBuf {
        self.sharded_path("metadata", id, ".json")
    }

    async fn write_new_file(path: &Path, data: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent).await?;
        }
        let temp_path = path.with_extension("inserting");
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        rename(&temp_path, path).await?;
        Ok(())
    }

    async fn write_content(temp_path: &Path, data: PayloadStream) -> anyhow::Result<BlobMetrics> {
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(temp_path)
            .await?;

        let mut data = DigestingStream::new(data);
        loop {
            match data.next().await {
                Some(bytes) => {
                    file.write_all(&bytes?).await?;
                }
                None =>
                    break,
            }
        }
        file.sync_all().await?;

        let digests = data.digests()
            .ok_or_else(|| anyhow!("content stream ended without digests"))?;
        Ok(BlobMetrics::from_digests(digests))
    }

    async fn remove_if_exists(path: &Path) -> anyhow::Result<bool> {
        match remove_file(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn start(&self) -> anyhow::Result<()> {
        debug!("starting file blob store in {}", self.root.display());
        create_dir_all(self.root.join("content")).await?;
        create_dir_all(self.root.join("metadata")).await?;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        debug!("stopping file blob store in {}", self.root.display());
        Ok(())
    }

    async fn create(&self, data: PayloadStream, headers: BlobHeaders) -> anyhow::Result<(Uuid, BlobMetrics)> {
        let id = Uuid::new_v4();
        let content_path = self.content_path(&id);

        trace!("inserting file blob - synthetic key is {}, content file is {}", id.as_hyphenated(), content_path.display());

        if let Some(parent) = content_path.parent() {
            create_dir_all(parent).await?;
        }
        let temp_content_path = content_path.with_extension("inserting");

        let metrics = match Self::write_content(&temp_content_path, data).await {
            Ok(metrics) => metrics,
            Err(e) => {
                if let Err(cleanup) = Self::remove_if_exists(&temp_content_path).await {
                    error!("error cleaning up content file for key {} after failed attempt to insert: {}", id, cleanup);
                }
                return Err(e);
            }
        };
        rename(&temp_content_path, &content_path).await?;

        let entry = BlobIndexEntry {
            headers,
            metrics: metrics.clone(),
        };
        if let Err(e) = Self::write_new_file(&self.metadata_path(&id), serde_json::to_string(&entry)?.as_bytes()).await {
            if let Err(cleanup) = Self::remove_if_exists(&content_path).await {
                error!("error cleaning up content file for key {} after failed attempt to write metadata: {}", id, cleanup);
            }
            return Err(e);
        }

        Ok((id, metrics))
    }

    async fn get(&self, id: &Uuid) -> anyhow::Result<Option<Blob>> {
        let content_path = self.content_path(id);
        let metadata_path = self.metadata_path(id);
        trace!("getting file system blob {} from {}", id.as_hyphenated(), content_path.display());

        // the metadata file decides whether a blob exists: it is written last and deleted first
        let entry: BlobIndexEntry = match read_to_string(&metadata_path).await {
            Ok(json) => serde_json::from_str(&json)?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file = match OpenOptions::new().read(true).open(&content_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if try_exists(&metadata_path).await? {
                    return Err(anyhow!("blob {} is corrupt: metadata file {} has no content", id, metadata_path.display()));
                }
                trace!("blob {} was deleted while reading it", id);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let stream = ReaderStream::new(file)
            .map(|chunk| chunk.map_err(anyhow::Error::from));

        Ok(Some(Blob {
            id: *id,
            headers: entry.headers,
            metrics: entry.metrics,
            data: Box::pin(stream),
        }))
    }

    async fn delete(&self, id: &Uuid) -> anyhow::Result<bool> {
        trace!("deleting file system blob {}", id.as_hyphenated());

        // metadata first: once it is gone, the blob is gone
        let had_metadata = Self::remove_if_exists(&self.metadata_path(id)).await?;
        let had_content = Self::remove_if_exists(&self.content_path(id)).await?;
        Ok(had_metadata || had_content)
    }
}
