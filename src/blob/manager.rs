use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tokio::fs::{create_dir_all, read_to_string, rename, write};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::blob::blob_store::BlobStore;
use crate::blob::fs_blob_store::FsBlobStore;
use crate::blob::transient_blob_store::TransientBlobStore;

pub const DEFAULT_BLOB_STORE_NAME: &str = "default";

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "recipe", rename_all = "lowercase")]
pub enum BlobStoreRecipe {
    /// blobs live in `<path>/<name>`
    File { path: PathBuf },
    Transient,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlobStoreConfiguration {
    pub name: String,
    #[serde(flatten)]
    pub recipe: BlobStoreRecipe,
}

/// Persistent list of blob store configurations, either in a JSON file or only in memory
pub struct BlobStoreConfigurationStore {
    file: Option<PathBuf>,
    configurations: Mutex<Vec<BlobStoreConfiguration>>,
}
impl BlobStoreConfigurationStore {
    pub fn in_memory() -> BlobStoreConfigurationStore {
        BlobStoreConfigurationStore {
            file: None,
            configurations: Default::default(),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> BlobStoreConfigurationStore {
        BlobStoreConfigurationStore {
            file: Some(path.into()),
            configurations: Default::default(),
        }
    }

    pub async fn load(&self) -> anyhow::Result<Vec<BlobStoreConfiguration>> {
        let mut configurations = self.configurations.lock().await;
        if let Some(file) = &self.file {
            match read_to_string(file).await {
                Ok(json) => *configurations = serde_json::from_str(&json)?,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(configurations.clone())
    }

    pub async fn list(&self) -> Vec<BlobStoreConfiguration> {
        self.configurations.lock().await.clone()
    }

    pub async fn create(&self, configuration: &BlobStoreConfiguration) -> anyhow::Result<()> {
        let mut configurations = self.configurations.lock().await;
        if configurations.iter().any(|c| c.name == configuration.name) {
            return Err(anyhow!("blob store configuration {} exists already", configuration.name));
        }
        let mut updated = configurations.clone();
        updated.push(configuration.clone());
        self.persist(&updated).await?;
        *configurations = updated;
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> anyhow::Result<()> {
        let mut configurations = self.configurations.lock().await;
        let updated: Vec<BlobStoreConfiguration> = configurations.iter()
            .filter(|c| c.name != name)
            .cloned()
            .collect();
        self.persist(&updated).await?;
        *configurations = updated;
        Ok(())
    }

    async fn persist(&self, configurations: &[BlobStoreConfiguration]) -> anyhow::Result<()> {
        if let Some(file) = &self.file {
            if let Some(parent) = file.parent() {
                create_dir_all(parent).await?;
            }
            let temp_file = file.with_extension("json.writing");
            write(&temp_file, serde_json::to_string_pretty(configurations)?).await?;
            rename(&temp_file, file).await?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct ManagerState {
    started: bool,
    stores: HashMap<String, Arc<dyn BlobStore>>,
}

/// Registry of named blob stores. Operations fail unless the manager is started; `stop` stops
///  all stores and forgets them.
pub struct BlobStoreManager {
    base_dir: PathBuf,
    configuration_store: BlobStoreConfigurationStore,
    state: Mutex<ManagerState>,
}
impl BlobStoreManager {
    /// `base_dir` is where default blob stores are created
    pub fn new(base_dir: impl Into<PathBuf>, configuration_store: BlobStoreConfigurationStore) -> BlobStoreManager {
        BlobStoreManager {
            base_dir: base_dir.into(),
            configuration_store,
            state: Default::default(),
        }
    }

    fn instantiate(configuration: &BlobStoreConfiguration) -> Arc<dyn BlobStore> {
        match &configuration.recipe {
            BlobStoreRecipe::File { path } => Arc::new(FsBlobStore::new(path.join(&configuration.name))),
            BlobStoreRecipe::Transient => Arc::new(TransientBlobStore::new()),
        }
    }

    fn check_started(state: &ManagerState) -> anyhow::Result<()> {
        if state.started {
            Ok(())
        }
        else {
            Err(anyhow!("blob store manager is not started"))
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if state.started {
            return Ok(());
        }

        for configuration in self.configuration_store.load().await? {
            info!("starting blob store {}", configuration.name);
            let store = Self::instantiate(&configuration);
            store.start().await?;
            state.stores.insert(configuration.name, store);
        }
        state.started = true;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        for (name, store) in state.stores.drain() {
            info!("stopping blob store {}", name);
            if let Err(e) = store.stop().await {
                error!("error stopping blob store {}: {}", name, e);
            }
        }
        state.started = false;
        Ok(())
    }

    /// all stores, ordered by name
    pub async fn browse(&self) -> anyhow::Result<Vec<(String, Arc<dyn BlobStore>)>> {
        let state = self.state.lock().await;
        Self::check_started(&state)?;

        let mut result: Vec<(String, Arc<dyn BlobStore>)> = state.stores.iter()
            .map(|(name, store)| (name.clone(), store.clone()))
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(result)
    }

    pub async fn create(&self, configuration: BlobStoreConfiguration) -> anyhow::Result<Arc<dyn BlobStore>> {
        let mut state = self.state.lock().await;
        Self::check_started(&state)?;
        self.do_create(&mut state, configuration).await
    }

    async fn do_create(&self, state: &mut ManagerState, configuration: BlobStoreConfiguration) -> anyhow::Result<Arc<dyn BlobStore>> {
        if state.stores.contains_key(&configuration.name) {
            return Err(anyhow!("blob store {} exists already", configuration.name));
        }

        info!("creating blob store {}", configuration.name);
        let store = Self::instantiate(&configuration);
        store.start().await?;
        self.configuration_store.create(&configuration).await?;
        state.stores.insert(configuration.name, store.clone());
        Ok(store)
    }

    /// Stops the store and removes its configuration. Content is left in place.
    pub async fn delete(&self, name: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        Self::check_started(&state)?;

        let store = state.stores.remove(name)
            .ok_or_else(|| anyhow!("no blob store named {}", name))?;
        info!("deleting blob store {}", name);
        store.stop().await?;
        self.configuration_store.delete(name).await
    }

    /// No side effects: unknown names yield `None`.
    pub async fn get(&self, name: &str) -> anyhow::Result<Option<Arc<dyn BlobStore>>> {
        let state = self.state.lock().await;
        Self::check_started(&state)?;
        Ok(state.stores.get(name).cloned())
    }

    /// The named store, creating a file blob store below the base directory if it does not exist
    pub async fn get_or_create_default(&self, name: &str) -> anyhow::Result<Arc<dyn BlobStore>> {
        let mut state = self.state.lock().await;
        Self::check_started(&state)?;

        if let Some(store) = state.stores.get(name) {
            return Ok(store.clone());
        }
        let configuration = BlobStoreConfiguration {
            name: name.to_string(),
            recipe: BlobStoreRecipe::File { path: self.base_dir.clone() },
        };
        self.do_create(&mut state, configuration).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn transient(name: &str) -> BlobStoreConfiguration {
        BlobStoreConfiguration {
            name: name.to_string(),
            recipe: BlobStoreRecipe::Transient,
        }
    }

    #[tokio::test]
    async fn test_operations_require_start() {
        let manager = BlobStoreManager::new("/nonexistent", BlobStoreConfigurationStore::in_memory());
        assert!(manager.get("default").await.is_err());
        assert!(manager.browse().await.is_err());
        assert!(manager.create(transient("a")).await.is_err());

        manager.start().await.unwrap();
        assert!(manager.get("default").await.unwrap().is_none());

        manager.stop().await.unwrap();
        assert!(manager.get("default").await.is_err());
    }

    #[tokio::test]
    async fn test_get_has_no_side_effects() {
        let manager = BlobStoreManager::new("/nonexistent", BlobStoreConfigurationStore::in_memory());
        manager.start().await.unwrap();

        assert!(manager.get("x").await.unwrap().is_none());
        assert!(manager.get("x").await.unwrap().is_none());
        assert!(manager.browse().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_browse_delete() {
        let manager = BlobStoreManager::new("/nonexistent", BlobStoreConfigurationStore::in_memory());
        manager.start().await.unwrap();

        manager.create(transient("b")).await.unwrap();
        manager.create(transient("a")).await.unwrap();
        assert!(manager.create(transient("a")).await.is_err());

        let names: Vec<String> = manager.browse().await.unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);

        manager.delete("a").await.unwrap();
        assert!(manager.get("a").await.unwrap().is_none());
        assert!(manager.delete("a").await.is_err());
    }

    #[tokio::test]
    async fn test_default_store_and_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config_file = dir.path().join("blobstores.json");

        let manager = BlobStoreManager::new(dir.path().join("blobs"), BlobStoreConfigurationStore::file(&config_file));
        manager.start().await.unwrap();
        let first = manager.get_or_create_default(DEFAULT_BLOB_STORE_NAME).await.unwrap();
        let second = manager.get_or_create_default(DEFAULT_BLOB_STORE_NAME).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(dir.path().join("blobs").join("default").join("content").is_dir());
        manager.stop().await.unwrap();

        let restarted = BlobStoreManager::new(dir.path().join("blobs"), BlobStoreConfigurationStore::file(&config_file));
        restarted.start().await.unwrap();
        assert!(restarted.get(DEFAULT_BLOB_STORE_NAME).await.unwrap().is_some());
    }

    #[test]
    fn test_configuration_json() {
        let configuration = BlobStoreConfiguration {
            name: "default".to_string(),
            recipe: BlobStoreRecipe::File { path: PathBuf::from("/var/blobs") },
        };
        let json = serde_json::to_string(&configuration).unwrap();
        assert_eq!(json, r#"{"name":"default","recipe":"file","path":"/var/blobs"}"#);
        assert_eq!(serde_json::from_str::<BlobStoreConfiguration>(&json).unwrap(), configuration);
    }
}
