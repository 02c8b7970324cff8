use std::fmt::{Debug, Formatter};
use std::pin::Pin;
use std::time::SystemTime;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures_core::Stream;

pub type PayloadStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send + 'static>>;

pub fn stream_of(bytes: Bytes) -> PayloadStream {
    Box::pin(futures::stream::once(async move { Ok::<_, anyhow::Error>(bytes) }))
}

/// Streamed content together with what is known about it. Used both for incoming request bodies
///  and for content served from storage or a remote.
pub struct Payload {
    pub data: PayloadStream,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub last_updated: Option<SystemTime>,
    /// lowercase hex
    pub sha1: Option<String>,
    /// lowercase hex
    pub md5: Option<String>,
}
impl Payload {
    pub fn new(data: PayloadStream, content_type: Option<String>) -> Payload {
        Payload {
            data,
            size: None,
            content_type,
            last_updated: None,
            sha1: None,
            md5: None,
        }
    }

    pub fn from_bytes(bytes: Bytes, content_type: Option<&str>) -> Payload {
        let size = bytes.len() as u64;
        Payload {
            size: Some(size),
            ..Payload::new(stream_of(bytes), content_type.map(|s| s.to_string()))
        }
    }

    pub fn from_text(text: &str) -> Payload {
        Payload::from_bytes(Bytes::copy_from_slice(text.as_bytes()), Some("text/plain"))
    }

    /// Drains the stream into memory. Uploads are buffered once so that retries and checksum
    ///  parsing do not depend on re-reading the request.
    pub async fn into_bytes(self) -> anyhow::Result<Bytes> {
        let mut data = self.data;
        let mut buffer = BytesMut::new();
        loop {
            match data.next().await {
                Some(chunk) => buffer.extend_from_slice(&chunk?),
                None => break,
            }
        }
        Ok(buffer.freeze())
    }
}

impl Debug for Payload {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload")
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .field("last_updated", &self.last_updated)
            .field("sha1", &self.sha1)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_into_bytes_concatenates_chunks() {
        let chunks = vec![Ok(Bytes::from_static(b"abc")), Ok(Bytes::from_static(b"def"))];
        let payload = Payload::new(Box::pin(futures::stream::iter(chunks)), None);
        assert_eq!(payload.into_bytes().await.unwrap(), Bytes::from_static(b"abcdef"));
    }

    #[tokio::test]
    async fn test_into_bytes_propagates_stream_error() {
        let chunks = vec![Ok(Bytes::from_static(b"abc")), Err(anyhow::anyhow!("broken pipe"))];
        let payload = Payload::new(Box::pin(futures::stream::iter(chunks)), None);
        assert!(payload.into_bytes().await.is_err());
    }

    #[test]
    fn test_from_text() {
        let payload = Payload::from_text("abc");
        assert_eq!(payload.size, Some(3));
        assert_eq!(payload.content_type.as_deref(), Some("text/plain"));
    }
}
