use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::{ready, Stream};
use pin_project_lite::pin_project;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::trace;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha1,
    Md5,
}
impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 2] = [HashAlgorithm::Sha1, HashAlgorithm::Md5];

    /// attribute name, also the file extension of the corresponding hash sidecar
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Md5 => "md5",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Digests {
    pub sha1: String,
    pub md5: String,
    pub size: u64,
}
impl Digests {
    pub fn get(&self, algorithm: HashAlgorithm) -> &str {
        match algorithm {
            HashAlgorithm::Sha1 => &self.sha1,
            HashAlgorithm::Md5 => &self.md5,
        }
    }
}

#[derive(Clone)]
pub struct Digester {
    sha1: Sha1,
    md5: md5::Context,
    size: u64,
}
impl Digester {
    pub fn new() -> Digester {
        Digester {
            sha1: Default::default(),
            md5: md5::Context::new(),
            size: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.sha1.update(data);
        self.md5.consume(data);
        self.size += data.len() as u64;
    }

    pub fn finish(self) -> Digests {
        let sha1: [u8; 20] = self.sha1.finalize().into();
        let md5: [u8; 16] = self.md5.compute().into();
        Digests {
            sha1: hex::encode(sha1),
            md5: hex::encode(md5),
            size: self.size,
        }
    }
}

pub fn digest_bytes(data: &[u8]) -> Digests {
    let mut digester = Digester::new();
    digester.update(data);
    digester.finish()
}

/// This struct wraps a stream of content, passing it on unchanged while computing SHA1, MD5 and
///  size over the entire content.
pin_project! {
    pub struct DigestingStream<S> {
        #[pin]
        inner: S,
        digester: Option<Digester>,
        digests: Option<Digests>,
    }
}
impl<S> DigestingStream<S> {
    pub fn new(inner: S) -> DigestingStream<S> {
        DigestingStream {
            inner,
            digester: Some(Digester::new()),
            digests: None,
        }
    }

    /// available once the stream is fully drained
    pub fn digests(&self) -> Option<&Digests> {
        self.digests.as_ref()
    }
}

impl<S: Stream<Item = anyhow::Result<Bytes>>> Stream for DigestingStream<S> {
    type Item = anyhow::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.digests.is_some() {
            return Poll::Ready(None);
        }

        let this = self.project();
        match ready!(this.inner.poll_next(cx)) {
            Some(Ok(data)) => {
                if let Some(digester) = this.digester.as_mut() {
                    digester.update(&data);
                }
                Poll::Ready(Some(Ok(data)))
            }
            None => {
                let digests = this.digester.take()
                    .map(|d| d.finish())
                    .unwrap_or_else(|| Digester::new().finish());
                trace!("content digested: {} bytes, sha1 {}", digests.size, digests.sha1);
                *this.digests = Some(digests);
                Poll::Ready(None)
            }
            Some(Err(e)) => Poll::Ready(Some(Err(e))),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
