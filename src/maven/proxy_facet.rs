use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::error::{RepoError, RepoResult};
use crate::maven::checksum::read_checksum;
use crate::maven::content_facet::MavenContentFacet;
use crate::maven::coordinates::{HashType, MavenPath};
use crate::maven::policy::{ChecksumPolicy, RedeployPolicy};
use crate::util::digesting_stream::{digest_bytes, HashAlgorithm};
use crate::util::http_downloader::{RemoteContent, RemoteFetcher, RemoteResponse};
use crate::util::payload::Payload;

/// Cache-through access to a remote repository. Implementations provide the seams, the
///  algorithm deciding between cache and remote is shared.
#[async_trait]
pub trait ProxyFacet: Send + Sync {
    async fn get_cached_payload(&self, path: &MavenPath) -> RepoResult<Option<Payload>>;

    async fn get_cached_payload_last_updated_date(&self, path: &MavenPath) -> RepoResult<Option<SystemTime>>;

    async fn get_cached_sha1(&self, path: &MavenPath) -> RepoResult<Option<String>>;

    async fn store(&self, path: &MavenPath, content: RemoteContent) -> RepoResult<()>;

    /// marks cached content as fresh without storing it again
    async fn indicate_up_to_date(&self, path: &MavenPath) -> RepoResult<()>;

    fn get_url(&self, path: &MavenPath) -> String;

    /// Validated remote content; `None` if the remote does not have it
    async fn fetch(&self, path: &MavenPath) -> RepoResult<Option<RemoteContent>>;

    fn max_age(&self, path: &MavenPath) -> Duration;

    fn serve_stale_on_failure(&self) -> bool;

    async fn get(&self, path: &MavenPath) -> RepoResult<Option<Payload>> {
        let last_updated = self.get_cached_payload_last_updated_date(path).await?;
        if let Some(last_updated) = last_updated {
            if is_fresh(last_updated, self.max_age(path)) {
                trace!("serving {} from cache", path.path());
                return self.get_cached_payload(path).await;
            }
        }

        match self.fetch(path).await {
            Ok(Some(content)) => {
                let unchanged = match (last_updated, self.get_cached_sha1(path).await?) {
                    (Some(_), Some(cached)) => digest_bytes(&content.body).sha1 == cached,
                    _ => false,
                };
                if unchanged {
                    debug!("{} is unchanged on remote", path.path());
                    self.indicate_up_to_date(path).await?;
                }
                else {
                    self.store(path, content).await?;
                }
                self.get_cached_payload(path).await
            }
            Ok(None) if last_updated.is_some() => {
                debug!("{} is gone from {}, serving stale content", path.path(), self.get_url(path));
                self.get_cached_payload(path).await
            }
            Ok(None) => Ok(None),
            Err(e @ RepoError::RemoteFetch { .. }) if last_updated.is_some() && self.serve_stale_on_failure() => {
                warn!("serving stale {}: {}", path.path(), e);
                self.get_cached_payload(path).await
            }
            Err(e) => Err(e),
        }
    }
}

fn is_fresh(last_updated: SystemTime, max_age: Duration) -> bool {
    match SystemTime::now().duration_since(last_updated) {
        Ok(age) => age < max_age,
        // last updated in the future
        Err(_) => true,
    }
}

#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub checksum_policy: ChecksumPolicy,
    pub artifact_max_age: Duration,
    pub metadata_max_age: Duration,
    pub serve_stale_on_failure: bool,
}
impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            checksum_policy: Default::default(),
            artifact_max_age: Duration::from_secs(24 * 60 * 60),
            metadata_max_age: Duration::from_secs(24 * 60 * 60),
            serve_stale_on_failure: true,
        }
    }
}

/// Proxy of a remote Maven repository, caching in local storage. Hash files are not fetched as
///  such: they are served from the cached file they belong to.
pub struct MavenProxyFacet {
    content: MavenContentFacet,
    remote: Arc<dyn RemoteFetcher>,
    config: ProxyConfig,
}

impl MavenProxyFacet {
    pub fn new(content: MavenContentFacet, remote: Arc<dyn RemoteFetcher>, config: ProxyConfig) -> MavenProxyFacet {
        MavenProxyFacet {
            content,
            remote,
            config,
        }
    }

    pub fn content(&self) -> &MavenContentFacet {
        &self.content
    }

    /// The checksum the remote publishes for `path`: in response headers, else as a hash file.
    ///  SHA-1 is preferred over MD5.
    async fn published_checksum(&self, path: &MavenPath, content: &RemoteContent) -> Option<(HashAlgorithm, String)> {
        for hash_type in HashType::ALL {
            let algorithm = hash_type.algorithm();
            if let Some(checksum) = content.published_checksum(algorithm) {
                return Some((algorithm, checksum.to_lowercase()));
            }
            if let Some(checksum) = self.fetch_hash_file(path, hash_type).await {
                return Some((algorithm, checksum));
            }
        }
        None
    }

    async fn fetch_hash_file(&self, path: &MavenPath, hash_type: HashType) -> Option<String> {
        let hash_path = path.hash(hash_type)?;
        match self.remote.fetch(hash_path.path()).await {
            Ok(RemoteResponse::Found(content)) => read_checksum(&String::from_utf8_lossy(&content.body)),
            Ok(RemoteResponse::NotFound) => None,
            Err(e) => {
                debug!("could not fetch {}: {:#}", self.remote.url_for(hash_path.path()), e);
                None
            }
        }
    }

    async fn validate_checksum(&self, path: &MavenPath, url: &str, content: &RemoteContent) -> RepoResult<()> {
        let policy = self.config.checksum_policy;
        if policy == ChecksumPolicy::Ignore {
            return Ok(());
        }

        match self.published_checksum(path, content).await {
            None if policy == ChecksumPolicy::Strict => {
                Err(RepoError::PolicyViolation(format!("ChecksumPolicy '{}' requires a checksum for {}, remote publishes none", policy, url)))
            }
            None => {
                debug!("no checksum published for {}", url);
                Ok(())
            }
            Some((algorithm, expected)) => {
                let actual = digest_bytes(&content.body);
                let actual = actual.get(algorithm);
                if actual == expected {
                    return Ok(());
                }

                let msg = format!("{} of {} is {}, remote publishes {}", algorithm.name(), url, actual, expected);
                match policy {
                    ChecksumPolicy::Warn => {
                        warn!("checksum mismatch: {}", msg);
                        Ok(())
                    }
                    _ => Err(RepoError::PolicyViolation(format!("ChecksumPolicy '{}' rejects content: {}", policy, msg))),
                }
            }
        }
    }
}

#[async_trait]
impl ProxyFacet for MavenProxyFacet {
    async fn get_cached_payload(&self, path: &MavenPath) -> RepoResult<Option<Payload>> {
        self.content.get(path).await
    }

    async fn get_cached_payload_last_updated_date(&self, path: &MavenPath) -> RepoResult<Option<SystemTime>> {
        self.content.last_updated(path).await
    }

    async fn get_cached_sha1(&self, path: &MavenPath) -> RepoResult<Option<String>> {
        self.content.computed_checksum(path, HashAlgorithm::Sha1).await
    }

    async fn store(&self, path: &MavenPath, content: RemoteContent) -> RepoResult<()> {
        let payload = Payload::from_bytes(content.body, content.content_type.as_deref());
        // the cache follows the remote, which may change its content
        self.content.put(&path.hash_owner(), payload, RedeployPolicy::Allow).await?;
        Ok(())
    }

    async fn indicate_up_to_date(&self, path: &MavenPath) -> RepoResult<()> {
        self.content.set_last_updated(path, SystemTime::now()).await?;
        Ok(())
    }

    fn get_url(&self, path: &MavenPath) -> String {
        self.remote.url_for(path.hash_owner().path())
    }

    async fn fetch(&self, path: &MavenPath) -> RepoResult<Option<RemoteContent>> {
        let owner = path.hash_owner();
        let url = self.get_url(&owner);

        let content = match self.remote.fetch(owner.path()).await {
            Ok(RemoteResponse::Found(content)) => content,
            Ok(RemoteResponse::NotFound) => {
                trace!("{} not found", url);
                return Ok(None);
            }
            Err(e) => return Err(RepoError::RemoteFetch { url, reason: format!("{:#}", e) }),
        };

        self.validate_checksum(&owner, &url, &content).await?;
        Ok(Some(content))
    }

    fn max_age(&self, path: &MavenPath) -> Duration {
        if path.is_metadata() {
            self.config.metadata_max_age
        }
        else {
            self.config.artifact_max_age
        }
    }

    fn serve_stale_on_failure(&self) -> bool {
        self.config.serve_stale_on_failure
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;
    use rstest::*;
    use crate::maven::paths::parse_path;
    use crate::test_support::{storage_facet, FakeRemote};
    use super::*;

    const JAR: &str = "/g/a/1.0/a-1.0.jar";
    const ABC_SHA1: &str = "a9993e364706816aba3e25717850c26c9cd0d89d";

    async fn proxy(remote: &Arc<FakeRemote>, config: ProxyConfig) -> MavenProxyFacet {
        let content = MavenContentFacet::new(storage_facet("central").await, false);
        MavenProxyFacet::new(content, remote.clone(), config)
    }

    fn ignoring_checksums() -> ProxyConfig {
        ProxyConfig {
            checksum_policy: ChecksumPolicy::Ignore,
            ..Default::default()
        }
    }

    fn stale(config: ProxyConfig) -> ProxyConfig {
        ProxyConfig {
            artifact_max_age: Duration::ZERO,
            metadata_max_age: Duration::ZERO,
            ..config
        }
    }

    async fn read(proxy: &MavenProxyFacet, path: &str) -> Option<String> {
        let payload = proxy.get(&parse_path(path)).await.unwrap()?;
        Some(String::from_utf8(payload.into_bytes().await.unwrap().to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_fresh_content_is_served_from_cache() {
        let remote = Arc::new(FakeRemote::new());
        remote.serve(JAR, b"abc");
        let proxy = proxy(&remote, ignoring_checksums()).await;

        assert_eq!(read(&proxy, JAR).await.as_deref(), Some("abc"));
        assert_eq!(remote.fetches(), 1);
        assert_eq!(read(&proxy, JAR).await.as_deref(), Some("abc"));
        assert_eq!(remote.fetches(), 1);
    }

    #[tokio::test]
    async fn test_stale_content_is_fetched_once_per_request() {
        let remote = Arc::new(FakeRemote::new());
        remote.serve(JAR, b"abc");
        let proxy = proxy(&remote, stale(ignoring_checksums())).await;

        assert_eq!(read(&proxy, JAR).await.as_deref(), Some("abc"));
        let first_update = proxy.content().last_updated(&parse_path(JAR)).await.unwrap();

        assert_eq!(read(&proxy, JAR).await.as_deref(), Some("abc"));
        assert_eq!(remote.fetches(), 2);
        assert!(proxy.content().last_updated(&parse_path(JAR)).await.unwrap() >= first_update);

        remote.serve(JAR, b"new");
        assert_eq!(read(&proxy, JAR).await.as_deref(), Some("new"));
        assert_eq!(remote.fetches(), 3);
    }

    #[tokio::test]
    async fn test_remote_not_found() {
        let remote = Arc::new(FakeRemote::new());
        let proxy = proxy(&remote, stale(ignoring_checksums())).await;
        assert_eq!(read(&proxy, JAR).await, None);

        remote.serve(JAR, b"abc");
        read(&proxy, JAR).await;
        remote.remove(JAR);
        assert_eq!(read(&proxy, JAR).await.as_deref(), Some("abc"));
    }

    #[rstest]
    #[case::serve_stale(true)]
    #[case::propagate(false)]
    #[tokio::test]
    async fn test_remote_failure(#[case] serve_stale_on_failure: bool) {
        let remote = Arc::new(FakeRemote::new());
        remote.serve(JAR, b"abc");
        let proxy = proxy(&remote, stale(ProxyConfig { serve_stale_on_failure, ..ignoring_checksums() })).await;
        read(&proxy, JAR).await;

        remote.set_failing(true);
        let result = proxy.get(&parse_path(JAR)).await;
        if serve_stale_on_failure {
            assert!(result.unwrap().is_some());
        }
        else {
            assert!(matches!(result, Err(RepoError::RemoteFetch { .. })));
        }
    }

    #[tokio::test]
    async fn test_remote_failure_without_cache() {
        let remote = Arc::new(FakeRemote::new());
        remote.set_failing(true);
        let proxy = proxy(&remote, ProxyConfig::default()).await;
        assert!(matches!(proxy.get(&parse_path(JAR)).await, Err(RepoError::RemoteFetch { .. })));
    }

    #[rstest]
    #[case::ignore_mismatch(ChecksumPolicy::Ignore, Some("0000000000000000000000000000000000000000"), true)]
    #[case::warn_mismatch(ChecksumPolicy::Warn, Some("0000000000000000000000000000000000000000"), true)]
    #[case::strict_if_exists_match(ChecksumPolicy::StrictIfExists, Some(ABC_SHA1), true)]
    #[case::strict_if_exists_mismatch(ChecksumPolicy::StrictIfExists, Some("0000000000000000000000000000000000000000"), false)]
    #[case::strict_if_exists_absent(ChecksumPolicy::StrictIfExists, None, true)]
    #[case::strict_match(ChecksumPolicy::Strict, Some(ABC_SHA1), true)]
    #[case::strict_absent(ChecksumPolicy::Strict, None, false)]
    #[tokio::test]
    async fn test_checksum_policy(#[case] checksum_policy: ChecksumPolicy, #[case] hash_file: Option<&'static str>, #[case] accepted: bool) {
        let remote = Arc::new(FakeRemote::new());
        remote.serve(JAR, b"abc");
        if let Some(hash_file) = hash_file {
            remote.serve(&format!("{}.sha1", JAR), hash_file.as_bytes());
        }
        let proxy = proxy(&remote, ProxyConfig { checksum_policy, ..Default::default() }).await;

        let result = proxy.get(&parse_path(JAR)).await;
        if accepted {
            assert!(result.unwrap().is_some());
        }
        else {
            assert!(matches!(result, Err(RepoError::PolicyViolation(_))));
            assert!(!proxy.content().exists(&parse_path(JAR)).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_checksum_from_header_wins() {
        let remote = Arc::new(FakeRemote::new());
        remote.serve_content(JAR, RemoteContent {
            body: Bytes::from_static(b"abc"),
            content_type: None,
            sha1: Some(ABC_SHA1.to_uppercase()),
            md5: None,
        });
        remote.serve(&format!("{}.sha1", JAR), b"0000000000000000000000000000000000000000");
        let proxy = proxy(&remote, ProxyConfig { checksum_policy: ChecksumPolicy::Strict, ..Default::default() }).await;

        assert_eq!(read(&proxy, JAR).await.as_deref(), Some("abc"));
        assert_eq!(remote.fetches(), 1);
    }

    #[tokio::test]
    async fn test_hash_file_is_served_from_cached_owner() {
        let remote = Arc::new(FakeRemote::new());
        remote.serve(JAR, b"abc");
        let proxy = proxy(&remote, ignoring_checksums()).await;

        assert_eq!(read(&proxy, &format!("{}.sha1", JAR)).await.as_deref(), Some(ABC_SHA1));
        assert_eq!(remote.fetches(), 1);
        assert_eq!(read(&proxy, JAR).await.as_deref(), Some("abc"));
        assert_eq!(remote.fetches(), 1);
    }

    #[tokio::test]
    async fn test_max_age_by_path() {
        let remote = Arc::new(FakeRemote::new());
        let proxy = proxy(&remote, ProxyConfig {
            artifact_max_age: Duration::from_secs(1),
            metadata_max_age: Duration::from_secs(2),
            ..Default::default()
        }).await;

        assert_eq!(proxy.max_age(&parse_path(JAR)), Duration::from_secs(1));
        assert_eq!(proxy.max_age(&parse_path("/g/a/maven-metadata.xml")), Duration::from_secs(2));
        assert_eq!(proxy.max_age(&parse_path("/g/a/maven-metadata.xml.sha1")), Duration::from_secs(2));
    }

    #[test]
    fn test_is_fresh() {
        assert!(is_fresh(SystemTime::now(), Duration::from_secs(60)));
        assert!(is_fresh(SystemTime::now() + Duration::from_secs(60), Duration::ZERO));
        assert!(!is_fresh(SystemTime::now() - Duration::from_secs(5), Duration::from_secs(2)));
    }
}
