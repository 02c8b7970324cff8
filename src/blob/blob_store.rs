use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::digesting_stream::{Digests, HashAlgorithm};
use crate::util::payload::PayloadStream;

/// header holding the name (usually the repository path) a blob was stored under
pub const BLOB_NAME_HEADER: &str = "BlobStore.blob-name";
pub const CREATED_BY_HEADER: &str = "BlobStore.created-by";
pub const CONTENT_TYPE_HEADER: &str = "BlobStore.content-type";

pub type BlobHeaders = BTreeMap<String, String>;

/// Facts about a blob's content, computed while storing it
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlobMetrics {
    pub created_millis: u64,
    pub size: u64,
    pub sha1: String,
    pub md5: String,
}
impl BlobMetrics {
    pub fn from_digests(digests: &Digests) -> BlobMetrics {
        BlobMetrics {
            created_millis: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            size: digests.size,
            sha1: digests.sha1.clone(),
            md5: digests.md5.clone(),
        }
    }

    pub fn hash(&self, algorithm: HashAlgorithm) -> &str {
        match algorithm {
            HashAlgorithm::Sha1 => &self.sha1,
            HashAlgorithm::Md5 => &self.md5,
        }
    }
}

pub struct Blob {
    pub id: Uuid,
    pub headers: BlobHeaders,
    pub metrics: BlobMetrics,
    pub data: PayloadStream,
}

/// Reference to a blob in a named blob store, in its textual form `<store>@<blob id>`
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobRef {
    pub store: String,
    pub blob_id: Uuid,
}
impl BlobRef {
    pub fn new(store: &str, blob_id: Uuid) -> BlobRef {
        BlobRef {
            store: store.to_string(),
            blob_id,
        }
    }
}
impl Display for BlobRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.store, self.blob_id.as_hyphenated())
    }
}
impl FromStr for BlobRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<BlobRef> {
        let (store, blob_id) = s.rsplit_once('@')
            .ok_or_else(|| anyhow!("not a blob reference: {:?}", s))?;
        if store.is_empty() {
            return Err(anyhow!("blob reference without store: {:?}", s));
        }
        Ok(BlobRef {
            store: store.to_string(),
            blob_id: Uuid::parse_str(blob_id)?,
        })
    }
}
impl TryFrom<String> for BlobRef {
    type Error = anyhow::Error;

    fn try_from(value: String) -> anyhow::Result<Self> {
        value.parse()
    }
}
impl From<BlobRef> for String {
    fn from(value: BlobRef) -> String {
        value.to_string()
    }
}

/// Content-addressed by synthetic ids: every `create` yields a fresh id, and blobs are immutable
///  once created.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    async fn create(&self, data: PayloadStream, headers: BlobHeaders) -> anyhow::Result<(Uuid, BlobMetrics)>;

    /// `Ok(None)` if there is no such blob; an error if the blob exists only partially
    async fn get(&self, id: &Uuid) -> anyhow::Result<Option<Blob>>;

    /// `true` if a blob was deleted, `false` if there was none. Deleting twice is not an error.
    async fn delete(&self, id: &Uuid) -> anyhow::Result<bool>;
}

#[cfg(test)]
mod test {
    use rstest::*;
    use super::*;

    #[test]
    fn test_blob_ref_text_form() {
        let id = Uuid::parse_str("0e7a1c3c-1e0c-4b1e-9d3f-2a6a5f2e3b4c").unwrap();
        let blob_ref = BlobRef::new("default", id);
        assert_eq!(blob_ref.to_string(), "default@0e7a1c3c-1e0c-4b1e-9d3f-2a6a5f2e3b4c");
        assert_eq!("default@0e7a1c3c-1e0c-4b1e-9d3f-2a6a5f2e3b4c".parse::<BlobRef>().unwrap(), blob_ref);
        assert_eq!(serde_json::to_string(&blob_ref).unwrap(), "\"default@0e7a1c3c-1e0c-4b1e-9d3f-2a6a5f2e3b4c\"");
    }

    #[rstest]
    #[case::no_separator("default")]
    #[case::no_store("@0e7a1c3c-1e0c-4b1e-9d3f-2a6a5f2e3b4c")]
    #[case::no_uuid("default@xyz")]
    fn test_invalid_blob_ref(#[case] s: &str) {
        assert!(s.parse::<BlobRef>().is_err());
    }
}
