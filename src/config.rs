use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::blob::manager::DEFAULT_BLOB_STORE_NAME;
use crate::maven::policy::{ChecksumPolicy, RedeployPolicy, VersionPolicy};
use crate::maven::proxy_facet::ProxyConfig;
use crate::util::http_downloader::HttpDownloaderConfig;

/// Server configuration, read from a TOML file:
///
/// ```toml
/// bind_addr = "0.0.0.0:8081"
/// work_dir = "/var/lib/arti-store"
///
/// [[repositories]]
/// name = "releases"
/// kind = "hosted"
/// maven = { version_policy = "release", redeploy_policy = "disallow" }
///
/// [[repositories]]
/// name = "central"
/// [repositories.kind.proxy]
/// remote_url = "https://repo1.maven.org/maven2"
/// checksum_policy = "strictIfExists"
///
/// [[repositories]]
/// name = "public"
/// kind = { group = { members = ["releases", "central"] } }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("./sonatype-work")
}

fn default_max_concurrent_requests() -> usize {
    256
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<ServerConfig> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = Self::parse(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> anyhow::Result<ServerConfig> {
        let config: ServerConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut names = HashSet::new();
        for repository in &self.repositories {
            if repository.name.is_empty() || repository.name.contains('/') {
                return Err(anyhow!("invalid repository name {:?}", repository.name));
            }
            if !names.insert(repository.name.as_str()) {
                return Err(anyhow!("repository {} is configured more than once", repository.name));
            }
        }
        Ok(())
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.work_dir.join("blobs")
    }

    pub fn blob_store_config_file(&self) -> PathBuf {
        self.work_dir.join("blobstores.json")
    }

    pub fn metadata_file(&self) -> PathBuf {
        self.work_dir.join("db").join("metadata.sqlite")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub name: String,
    #[serde(default = "default_blob_store")]
    pub blob_store: String,
    #[serde(default)]
    pub maven: MavenConfig,
    pub kind: RepositoryKindConfig,
}

fn default_blob_store() -> String {
    DEFAULT_BLOB_STORE_NAME.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MavenConfig {
    pub version_policy: VersionPolicy,
    pub redeploy_policy: RedeployPolicy,
    pub strict_content_type_validation: bool,
}
impl Default for MavenConfig {
    fn default() -> Self {
        MavenConfig {
            version_policy: Default::default(),
            redeploy_policy: Default::default(),
            strict_content_type_validation: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKindConfig {
    Hosted,
    Proxy(ProxyRepositoryConfig),
    Group(GroupRepositoryConfig),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyRepositoryConfig {
    pub remote_url: String,
    #[serde(default)]
    pub checksum_policy: ChecksumPolicy,
    #[serde(default = "default_max_age_secs")]
    pub artifact_max_age_secs: u64,
    #[serde(default = "default_max_age_secs")]
    pub metadata_max_age_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub serve_stale_on_failure: bool,
    #[serde(default = "default_auto_block_after_failures")]
    pub auto_block_after_failures: u32,
    #[serde(default = "default_auto_block_secs")]
    pub auto_block_secs: u64,
}

fn default_max_age_secs() -> u64 {
    24 * 60 * 60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_read_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_auto_block_after_failures() -> u32 {
    5
}

fn default_auto_block_secs() -> u64 {
    60
}

impl ProxyRepositoryConfig {
    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            checksum_policy: self.checksum_policy,
            artifact_max_age: Duration::from_secs(self.artifact_max_age_secs),
            metadata_max_age: Duration::from_secs(self.metadata_max_age_secs),
            serve_stale_on_failure: self.serve_stale_on_failure,
        }
    }

    pub fn downloader_config(&self) -> HttpDownloaderConfig {
        HttpDownloaderConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            failures_before_block: self.auto_block_after_failures,
            block_duration: Duration::from_secs(self.auto_block_secs),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupRepositoryConfig {
    pub members: Vec<String>,
}
