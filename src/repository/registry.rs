use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::info;

use crate::blob::manager::BlobStoreManager;
use crate::config::{RepositoryConfig, RepositoryKindConfig};
use crate::maven::content_facet::MavenContentFacet;
use crate::maven::proxy_facet::MavenProxyFacet;
use crate::repository::{Repository, Request, Response};
use crate::storage::facet::StorageFacet;
use crate::storage::metadata_store::MetadataStore;
use crate::util::http_downloader::HttpDownloader;

/// All repositories of a server by name. Built once at startup and passed to whoever needs it.
#[derive(Default)]
pub struct RepositoryRegistry {
    repositories: HashMap<String, Arc<Repository>>,
}

impl RepositoryRegistry {
    pub fn new() -> RepositoryRegistry {
        Default::default()
    }

    pub async fn build(configs: &[RepositoryConfig], metadata: Arc<MetadataStore>, blob_stores: Arc<BlobStoreManager>) -> anyhow::Result<RepositoryRegistry> {
        let mut result = RepositoryRegistry::new();
        for config in configs {
            let repository = match &config.kind {
                RepositoryKindConfig::Hosted => {
                    let storage = StorageFacet::new(&config.name, &config.blob_store, metadata.clone(), blob_stores.clone()).await?;
                    let content = MavenContentFacet::new(storage, config.maven.strict_content_type_validation);
                    Repository::hosted(&config.name, content, config.maven.version_policy, config.maven.redeploy_policy)
                }
                RepositoryKindConfig::Proxy(proxy) => {
                    let storage = StorageFacet::new(&config.name, &config.blob_store, metadata.clone(), blob_stores.clone()).await?;
                    let content = MavenContentFacet::new(storage, config.maven.strict_content_type_validation);
                    let remote = HttpDownloader::new(&proxy.remote_url, &proxy.downloader_config())?;
                    let proxy_facet = MavenProxyFacet::new(content, Arc::new(remote), proxy.proxy_config());
                    Repository::proxy(&config.name, proxy_facet, config.maven.version_policy)
                }
                RepositoryKindConfig::Group(group) => Repository::group(&config.name, group.members.clone()),
            };
            info!("registering {} repository {}", repository.kind(), repository.name());
            result.add(repository)?;
        }
        Ok(result)
    }

    pub fn add(&mut self, repository: Repository) -> anyhow::Result<()> {
        if self.repositories.contains_key(repository.name()) {
            return Err(anyhow!("repository {} exists already", repository.name()));
        }
        self.repositories.insert(repository.name().to_string(), Arc::new(repository));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Repository>> {
        self.repositories.get(name).cloned()
    }

    /// ordered by name
    pub fn repositories(&self) -> Vec<Arc<Repository>> {
        let mut result: Vec<Arc<Repository>> = self.repositories.values().cloned().collect();
        result.sort_by(|a, b| a.name().cmp(b.name()));
        result
    }

    /// `None` if there is no such repository
    pub async fn dispatch(&self, repository: &str, request: Request) -> Option<Response> {
        let repository = self.get(repository)?;
        Some(repository.handle(self, request).await)
    }
}

#[cfg(test)]
mod test {
    use crate::config::ServerConfig;
    use crate::test_support::blob_stores;
    use super::*;

    #[tokio::test]
    async fn test_build_from_config() {
        let config = ServerConfig::parse(r#"
            [[repositories]]
            name = "releases"
            kind = "hosted"

            [[repositories]]
            name = "central"
            kind = { proxy = { remote_url = "https://repo1.maven.org/maven2" } }

            [[repositories]]
            name = "public"
            kind = { group = { members = ["releases", "central"] } }
        "#).unwrap();
        let registry = RepositoryRegistry::build(&config.repositories, Arc::new(MetadataStore::in_memory().unwrap()), blob_stores().await)
            .await
            .unwrap();

        let kinds: Vec<(String, &str)> = registry.repositories().iter()
            .map(|r| (r.name().to_string(), r.kind()))
            .collect();
        assert_eq!(kinds, vec![
            ("central".to_string(), "proxy"),
            ("public".to_string(), "group"),
            ("releases".to_string(), "hosted"),
        ]);
        assert!(registry.get("releases").unwrap().storage().is_some());
        assert!(registry.get("public").unwrap().storage().is_none());
        assert!(registry.dispatch("nothing", Request::get("a/b/1/b-1.jar")).await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_remote_url() {
        let config = ServerConfig::parse(r#"
            [[repositories]]
            name = "central"
            kind = { proxy = { remote_url = "not a url" } }
        "#).unwrap();
        let result = RepositoryRegistry::build(&config.repositories, Arc::new(MetadataStore::in_memory().unwrap()), blob_stores().await).await;
        assert!(result.is_err());
    }
}
