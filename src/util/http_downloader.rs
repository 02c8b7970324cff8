use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use failsafe::backoff::Constant;
use failsafe::failure_policy::ConsecutiveFailures;
use failsafe::futures::CircuitBreaker;
use failsafe::StateMachine;
use hyper::{Body, Client, HeaderMap, Method, Request, StatusCode, Uri};
use hyper::body::to_bytes;
use hyper::client::HttpConnector;
use hyper::header::{CONTENT_TYPE, USER_AGENT};
use hyper_tls::HttpsConnector;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::util::digesting_stream::HashAlgorithm;

//NB: Maven Central returns a 403 without a user agent
const USER_AGENT_STRING: &str = concat!("arti-store/", env!("CARGO_PKG_VERSION"));

#[derive(Clone, Debug)]
pub struct RemoteContent {
    pub body: Bytes,
    pub content_type: Option<String>,
    /// checksum published by the remote in response headers, lowercase hex
    pub sha1: Option<String>,
    pub md5: Option<String>,
}
impl RemoteContent {
    pub fn published_checksum(&self, algorithm: HashAlgorithm) -> Option<&str> {
        match algorithm {
            HashAlgorithm::Sha1 => self.sha1.as_deref(),
            HashAlgorithm::Md5 => self.md5.as_deref(),
        }
    }
}

#[derive(Debug)]
pub enum RemoteResponse {
    Found(RemoteContent),
    NotFound,
}

/// Access to a remote repository's content, relative to its base URI
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    fn url_for(&self, path: &str) -> String;

    /// 'not found' is a regular response; errors are connection failures, timeouts, unexpected
    ///  status codes or a blocked remote
    async fn fetch(&self, path: &str) -> anyhow::Result<RemoteResponse>;
}

#[derive(Clone, Debug)]
pub struct HttpDownloaderConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// consecutive failures after which the remote is blocked
    pub failures_before_block: u32,
    pub block_duration: Duration,
}
impl Default for HttpDownloaderConfig {
    fn default() -> Self {
        HttpDownloaderConfig {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            failures_before_block: 5,
            block_duration: Duration::from_secs(60),
        }
    }
}

/// Downloads files relative to a fixed base URI, extracting checksums the remote publishes in
///  response headers.
///
/// Instances do HTTP connection caching internally, so keeping them alive has performance benefits.
///  After repeated failures, the remote is blocked for a while and requests fail without being sent.
pub struct HttpDownloader {
    client: Client<HttpsConnector<HttpConnector>>,
    base_uri: String, // with trailing '/'
    read_timeout: Duration,
    circuit_breaker: StateMachine<ConsecutiveFailures<Constant>, ()>,
}
impl HttpDownloader {
    pub fn new(base_uri: &str, config: &HttpDownloaderConfig) -> anyhow::Result<HttpDownloader> {
        let mut base_uri = base_uri.to_string();
        if !base_uri.ends_with('/') {
            base_uri.push('/');
        }

        // check that the base URI is valid
        Uri::try_from(base_uri.clone())?;

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(config.connect_timeout));

        let circuit_breaker = failsafe::Config::new()
            .failure_policy(failsafe::failure_policy::consecutive_failures(
                config.failures_before_block,
                failsafe::backoff::constant(config.block_duration),
            ))
            .build();

        Ok(HttpDownloader {
            client: Client::builder()
                .build::<_, Body>(HttpsConnector::new_with_connector(http)),
            base_uri,
            read_timeout: config.read_timeout,
            circuit_breaker,
        })
    }

    async fn do_fetch(&self, uri: Uri) -> anyhow::Result<RemoteResponse> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(USER_AGENT, USER_AGENT_STRING)
            .body(Body::empty())?;

        trace!("getting {:?}", request);

        let response = timeout(self.read_timeout, self.client.request(request))
            .await
            .map_err(|_| anyhow!("timed out waiting for response"))??;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                return Ok(RemoteResponse::NotFound);
            }
            status if !status.is_success() => {
                return Err(anyhow!("upstream request failed: {}", status));
            }
            _ => {}
        }

        let sha1 = header_checksum(response.headers(), &["x-checksum-sha1", "x-goog-meta-checksum-sha1", "etag"], 40);
        let md5 = header_checksum(response.headers(), &["x-checksum-md5", "x-goog-meta-checksum-md5"], 32);
        let content_type = response.headers().get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        let body = timeout(self.read_timeout, to_bytes(response.into_body()))
            .await
            .map_err(|_| anyhow!("timed out reading response body"))??;

        Ok(RemoteResponse::Found(RemoteContent {
            body,
            content_type,
            sha1,
            md5,
        }))
    }
}

#[async_trait]
impl RemoteFetcher for HttpDownloader {
    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_uri, path.trim_start_matches('/'))
    }

    async fn fetch(&self, path: &str) -> anyhow::Result<RemoteResponse> {
        let url = self.url_for(path);
        let uri = Uri::try_from(url.clone())?;

        match self.circuit_breaker.call(self.do_fetch(uri)).await {
            Ok(response) => Ok(response),
            Err(failsafe::Error::Inner(e)) => {
                debug!("fetching {} failed: {}", url, e);
                Err(e)
            }
            Err(failsafe::Error::Rejected) => {
                Err(anyhow!("remote {} is blocked after repeated failures", self.base_uri))
            }
        }
    }
}

/// The first of the given headers that holds a plausible hex digest of the given length. ETags are
///  quoted, and only count if they look like a digest.
fn header_checksum(headers: &HeaderMap, names: &[&str], hex_len: usize) -> Option<String> {
    names.iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|h| h.to_str().ok())
        .map(|s| s.trim().trim_matches('"'))
        .find(|s| s.len() == hex_len && s.chars().all(|c| c.is_ascii_hexdigit()))
        .map(|s| s.to_lowercase())
}

#[cfg(test)]
mod test {
    use hyper::header::HeaderValue;
    use rstest::*;
    use super::*;

    fn headers(entries: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut result = HeaderMap::new();
        for (name, value) in entries {
            result.insert(*name, HeaderValue::from_static(*value));
        }
        result
    }

    #[rstest]
    #[case::none(&[], None)]
    #[case::checksum_header(&[("x-checksum-sha1", "A9993E364706816ABA3E25717850C26C9CD0D89D")], Some("a9993e364706816aba3e25717850c26c9cd0d89d"))]
    #[case::google(&[("x-goog-meta-checksum-sha1", "a9993e364706816aba3e25717850c26c9cd0d89d")], Some("a9993e364706816aba3e25717850c26c9cd0d89d"))]
    #[case::quoted_etag(&[("etag", "\"a9993e364706816aba3e25717850c26c9cd0d89d\"")], Some("a9993e364706816aba3e25717850c26c9cd0d89d"))]
    #[case::opaque_etag(&[("etag", "\"5f2a-17b0\"")], None)]
    #[case::header_beats_etag(&[("etag", "\"0000000000000000000000000000000000000000\""), ("x-checksum-sha1", "a9993e364706816aba3e25717850c26c9cd0d89d")], Some("a9993e364706816aba3e25717850c26c9cd0d89d"))]
    fn test_sha1_header(#[case] entries: &[(&'static str, &'static str)], #[case] expected: Option<&str>) {
        let actual = header_checksum(&headers(entries), &["x-checksum-sha1", "x-goog-meta-checksum-sha1", "etag"], 40);
        assert_eq!(actual.as_deref(), expected);
    }

    #[rstest]
    #[case::plain("https://repo.example.com/maven2", "org/a/1.0/a-1.0.jar", "https://repo.example.com/maven2/org/a/1.0/a-1.0.jar")]
    #[case::slashes("https://repo.example.com/maven2/", "/org/a/1.0/a-1.0.jar", "https://repo.example.com/maven2/org/a/1.0/a-1.0.jar")]
    #[tokio::test]
    async fn test_url_for(#[case] base: &str, #[case] path: &str, #[case] expected: &str) {
        let downloader = HttpDownloader::new(base, &Default::default()).unwrap();
        assert_eq!(downloader.url_for(path), expected);
    }

    #[test]
    fn test_invalid_base_uri() {
        assert!(HttpDownloader::new("not a uri", &Default::default()).is_err());
    }
}
