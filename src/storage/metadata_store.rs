use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use rusqlite::{params, Connection, OptionalExtension, Params, Transaction, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task::spawn_blocking;
use tracing::{debug, info};

use crate::error::{RepoError, RepoResult};
use crate::storage::records::{Asset, Component, EntityId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// the store revision that last wrote this record
    pub revision: u64,
    pub record: T,
}

/// The writes of a transaction, with the revisions of the records it read. `None` means delete.
#[derive(Clone, Default)]
pub struct ChangeSet {
    pub read_revisions: HashMap<EntityId, u64>,
    pub components: HashMap<EntityId, Option<Component>>,
    pub assets: HashMap<EntityId, Option<Asset>>,
}
impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.assets.is_empty()
    }
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );
    INSERT OR IGNORE INTO meta(key, value) VALUES ('revision', 0);

    CREATE TABLE IF NOT EXISTS components (
        id TEXT PRIMARY KEY,
        bucket TEXT NOT NULL,
        key TEXT NOT NULL,
        revision INTEGER NOT NULL,
        record TEXT NOT NULL,
        UNIQUE(bucket, key)
    );

    CREATE TABLE IF NOT EXISTS assets (
        id TEXT PRIMARY KEY,
        bucket TEXT NOT NULL,
        component_id TEXT REFERENCES components(id),
        key TEXT NOT NULL,
        revision INTEGER NOT NULL,
        record TEXT NOT NULL,
        UNIQUE(bucket, component_id, key)
    );
    -- NULLs never collide in a UNIQUE constraint
    CREATE UNIQUE INDEX IF NOT EXISTS assets_without_component ON assets(bucket, key) WHERE component_id IS NULL;
    CREATE INDEX IF NOT EXISTS assets_by_component ON assets(component_id);
"#;

/// Component and asset records in SQLite. Every record carries the store revision that last
///  wrote it; commits check these revisions optimistically and the unique key constraints of the
///  schema, so racing writers get `RepoError::Conflict`.
///
/// Records are stored as JSON next to their indexed columns.
pub struct MetadataStore {
    connection: Arc<Mutex<Connection>>,
}
impl MetadataStore {
    pub fn in_memory() -> anyhow::Result<MetadataStore> {
        let connection = Connection::open_in_memory()
            .context("failed to open in-memory metadata store")?;
        Self::init(connection)
    }

    pub async fn open(file: impl Into<PathBuf>) -> anyhow::Result<MetadataStore> {
        let file = file.into();
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let path = file.clone();
        let store = spawn_blocking(move || -> anyhow::Result<MetadataStore> {
            let connection = Connection::open(&path)
                .with_context(|| format!("failed to open metadata store at {}", path.display()))?;
            connection.pragma_update(None, "journal_mode", "WAL")
                .context("failed to enable WAL for metadata store")?;
            Self::init(connection)
        }).await??;

        info!("opened metadata store {} at revision {}", file.display(), store.revision().await?);
        Ok(store)
    }

    fn init(connection: Connection) -> anyhow::Result<MetadataStore> {
        connection.pragma_update(None, "foreign_keys", "ON")
            .context("failed to enable foreign keys for metadata store")?;
        connection.execute_batch(SCHEMA)
            .context("failed to initialize metadata store schema")?;
        Ok(MetadataStore {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Runs blocking SQLite work off the async runtime
    async fn with_connection<T, F>(&self, work: F) -> RepoResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> RepoResult<T> + Send + 'static,
    {
        let connection = self.connection.clone();
        spawn_blocking(move || {
            let mut connection = match connection.lock() {
                Ok(c) => c,
                Err(poisoned) => poisoned.into_inner(),
            };
            work(&mut *connection)
        })
            .await
            .map_err(|e| anyhow!("metadata store task failed: {}", e))?
    }

    pub async fn revision(&self) -> RepoResult<u64> {
        self.with_connection(|connection| {
            let revision: i64 = connection.query_row("SELECT value FROM meta WHERE key = 'revision'", [], |row| row.get(0))?;
            Ok(revision as u64)
        }).await
    }

    pub async fn component(&self, id: EntityId) -> RepoResult<Option<Versioned<Component>>> {
        self.with_connection(move |connection| {
            query_one(connection, "SELECT revision, record FROM components WHERE id = ?1", params![id.to_string()])
        }).await
    }

    pub async fn asset(&self, id: EntityId) -> RepoResult<Option<Versioned<Asset>>> {
        self.with_connection(move |connection| {
            query_one(connection, "SELECT revision, record FROM assets WHERE id = ?1", params![id.to_string()])
        }).await
    }

    pub async fn component_by_key(&self, bucket: &str, key: &str) -> RepoResult<Option<Versioned<Component>>> {
        let (bucket, key) = (bucket.to_string(), key.to_string());
        self.with_connection(move |connection| {
            query_one(connection, "SELECT revision, record FROM components WHERE bucket = ?1 AND key = ?2", params![bucket, key])
        }).await
    }

    /// `component` is `None` for assets that belong to no component
    pub async fn asset_by_key(&self, bucket: &str, component: Option<EntityId>, key: &str) -> RepoResult<Option<Versioned<Asset>>> {
        let (bucket, key) = (bucket.to_string(), key.to_string());
        let component = component.map(|id| id.to_string());
        self.with_connection(move |connection| {
            query_one(connection, "SELECT revision, record FROM assets WHERE bucket = ?1 AND component_id IS ?2 AND key = ?3", params![bucket, component, key])
        }).await
    }

    pub async fn bucket_components(&self, bucket: &str) -> RepoResult<Vec<Versioned<Component>>> {
        let bucket = bucket.to_string();
        self.with_connection(move |connection| {
            query_all(connection, "SELECT revision, record FROM components WHERE bucket = ?1 ORDER BY key", params![bucket])
        }).await
    }

    pub async fn bucket_assets(&self, bucket: &str) -> RepoResult<Vec<Versioned<Asset>>> {
        let bucket = bucket.to_string();
        self.with_connection(move |connection| {
            query_all(connection, "SELECT revision, record FROM assets WHERE bucket = ?1 ORDER BY key", params![bucket])
        }).await
    }

    pub async fn component_assets(&self, component: EntityId) -> RepoResult<Vec<Versioned<Asset>>> {
        self.with_connection(move |connection| {
            query_all(connection, "SELECT revision, record FROM assets WHERE component_id = ?1 ORDER BY key", params![component.to_string()])
        }).await
    }

    /// Validates and applies the changes in one SQLite transaction, returning the new revision
    pub async fn commit(&self, changes: &ChangeSet) -> RepoResult<u64> {
        let changes = changes.clone();
        let revision = self.with_connection(move |connection| {
            let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let revision = apply(&tx, &changes)?;
            tx.commit()?;
            debug!("committed revision {}: {} component and {} asset changes", revision, changes.components.len(), changes.assets.len());
            Ok(revision)
        }).await?;
        Ok(revision)
    }
}

fn decode<T: DeserializeOwned>(revision: i64, record: &str) -> RepoResult<Versioned<T>> {
    Ok(Versioned {
        revision: revision as u64,
        record: serde_json::from_str(record).map_err(anyhow::Error::from)?,
    })
}

fn encode<T: Serialize>(record: &T) -> RepoResult<String> {
    Ok(serde_json::to_string(record).map_err(anyhow::Error::from)?)
}

fn query_one<T: DeserializeOwned, P: Params>(connection: &Connection, sql: &str, params: P) -> RepoResult<Option<Versioned<T>>> {
    let row: Option<(i64, String)> = connection.prepare_cached(sql)?
        .query_row(params, |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?;
    row.map(|(revision, record)| decode(revision, &record)).transpose()
}

fn query_all<T: DeserializeOwned, P: Params>(connection: &Connection, sql: &str, params: P) -> RepoResult<Vec<Versioned<T>>> {
    let mut statement = connection.prepare_cached(sql)?;
    let rows = statement.query_map(params, |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;

    let mut result = vec![];
    for row in rows {
        let (revision, record) = row?;
        result.push(decode(revision, &record)?);
    }
    Ok(result)
}

/// `table` is one of the schema's record tables
fn check_revision(tx: &Transaction, table: &str, id: &EntityId, changes: &ChangeSet) -> RepoResult<()> {
    let committed: Option<i64> = tx.query_row(&format!("SELECT revision FROM {} WHERE id = ?1", table), params![id.to_string()], |row| row.get(0))
        .optional()?;

    match (changes.read_revisions.get(id), committed) {
        (Some(read), Some(current)) if *read == current as u64 => Ok(()),
        (None, None) => Ok(()),
        (Some(_), None) => Err(RepoError::Conflict(format!("record {} was deleted concurrently", id))),
        _ => Err(RepoError::Conflict(format!("record {} was modified concurrently", id))),
    }
}

fn apply(tx: &Transaction, changes: &ChangeSet) -> RepoResult<u64> {
    let previous: i64 = tx.query_row("SELECT value FROM meta WHERE key = 'revision'", [], |row| row.get(0))?;
    let revision = previous + 1;

    for id in changes.components.keys() {
        check_revision(tx, "components", id, changes)?;
    }
    for id in changes.assets.keys() {
        check_revision(tx, "assets", id, changes)?;
    }

    // removals first, so that their keys are free for records written by the same commit
    for (id, _) in changes.assets.iter().filter(|(_, a)| a.is_none()) {
        tx.execute("DELETE FROM assets WHERE id = ?1", params![id.to_string()])?;
    }
    for (id, _) in changes.components.iter().filter(|(_, c)| c.is_none()) {
        tx.execute("DELETE FROM components WHERE id = ?1", params![id.to_string()])?;
    }

    for component in changes.components.values().flatten() {
        tx.execute(
            "INSERT INTO components(id, bucket, key, revision, record) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET bucket = excluded.bucket, key = excluded.key, revision = excluded.revision, record = excluded.record",
            params![component.id.to_string(), component.bucket, component.key, revision, encode(component)?],
        )?;
    }
    for asset in changes.assets.values().flatten() {
        tx.execute(
            "INSERT INTO assets(id, bucket, component_id, key, revision, record) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET bucket = excluded.bucket, component_id = excluded.component_id, key = excluded.key, revision = excluded.revision, record = excluded.record",
            params![asset.id.to_string(), asset.bucket, asset.component.map(|id| id.to_string()), asset.key, revision, encode(asset)?],
        )?;
    }

    tx.execute("UPDATE meta SET value = ?1 WHERE key = 'revision'", params![revision])?;
    Ok(revision as u64)
}

#[cfg(test)]
mod test {
    use uuid::Uuid;
    use super::*;
    use crate::storage::attributes::NestedAttributesMap;

    fn component(key: &str) -> Component {
        Component {
            id: Uuid::new_v4(),
            bucket: "releases".to_string(),
            format: "maven2".to_string(),
            key: key.to_string(),
            group: None,
            name: key.to_string(),
            version: None,
            attributes: NestedAttributesMap::new(),
        }
    }

    fn asset(key: &str, component: Option<&Component>) -> Asset {
        Asset {
            id: Uuid::new_v4(),
            bucket: "releases".to_string(),
            component: component.map(|c| c.id),
            format: "maven2".to_string(),
            key: key.to_string(),
            name: key.to_string(),
            blob_ref: None,
            content_type: None,
            size: None,
            last_updated: None,
            attributes: NestedAttributesMap::new(),
        }
    }

    fn create_component(component: &Component) -> ChangeSet {
        let mut changes = ChangeSet::default();
        changes.components.insert(component.id, Some(component.clone()));
        changes
    }

    fn create_asset(asset: &Asset) -> ChangeSet {
        let mut changes = ChangeSet::default();
        changes.assets.insert(asset.id, Some(asset.clone()));
        changes
    }

    #[tokio::test]
    async fn test_duplicate_component_key_conflicts() {
        let store = MetadataStore::in_memory().unwrap();
        store.commit(&create_component(&component("g:a:1"))).await.unwrap();

        let result = store.commit(&create_component(&component("g:a:1"))).await;
        assert!(matches!(result, Err(RepoError::Conflict(_))));
        assert_eq!(store.bucket_components("releases").await.unwrap().len(), 1);
        assert_eq!(store.revision().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_asset_key_without_component_conflicts() {
        let store = MetadataStore::in_memory().unwrap();
        store.commit(&create_asset(&asset("g/a/maven-metadata.xml", None))).await.unwrap();

        let result = store.commit(&create_asset(&asset("g/a/maven-metadata.xml", None))).await;
        assert!(matches!(result, Err(RepoError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_asset_keys_are_unique_per_component() {
        let store = MetadataStore::in_memory().unwrap();
        let first = component("g:a:1");
        let second = component("g:a:2");
        store.commit(&create_component(&first)).await.unwrap();
        store.commit(&create_component(&second)).await.unwrap();

        store.commit(&create_asset(&asset("a.jar", Some(&first)))).await.unwrap();
        store.commit(&create_asset(&asset("a.jar", Some(&second)))).await.unwrap();
        assert!(matches!(store.commit(&create_asset(&asset("a.jar", Some(&first)))).await, Err(RepoError::Conflict(_))));

        let found = store.asset_by_key("releases", Some(second.id), "a.jar").await.unwrap().unwrap();
        assert_eq!(found.record.component, Some(second.id));
        assert!(store.asset_by_key("releases", None, "a.jar").await.unwrap().is_none());
        assert_eq!(store.component_assets(first.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_asset_of_missing_component_conflicts() {
        let store = MetadataStore::in_memory().unwrap();
        let result = store.commit(&create_asset(&asset("a.jar", Some(&component("g:a:1"))))).await;
        assert!(matches!(result, Err(RepoError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_stale_revision_conflicts() {
        let store = MetadataStore::in_memory().unwrap();
        let c = component("g:a:1");
        let first_revision = store.commit(&create_component(&c)).await.unwrap();

        let mut update = ChangeSet::default();
        update.read_revisions.insert(c.id, first_revision);
        update.components.insert(c.id, Some(c.clone()));
        store.commit(&update).await.unwrap();

        // same read revision again: stale now
        let result = store.commit(&update).await;
        assert!(matches!(result, Err(RepoError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_delete_frees_key() {
        let store = MetadataStore::in_memory().unwrap();
        let c = component("g:a:1");
        let revision = store.commit(&create_component(&c)).await.unwrap();

        let mut delete = ChangeSet::default();
        delete.read_revisions.insert(c.id, revision);
        delete.components.insert(c.id, None);
        store.commit(&delete).await.unwrap();

        assert!(store.component_by_key("releases", "g:a:1").await.unwrap().is_none());
        assert!(store.component(c.id).await.unwrap().is_none());
        store.commit(&create_component(&component("g:a:1"))).await.unwrap();
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("db").join("metadata.sqlite");
        let c = component("g:a:1");
        {
            let store = MetadataStore::open(&file).await.unwrap();
            store.commit(&create_component(&c)).await.unwrap();
        }

        let reopened = MetadataStore::open(&file).await.unwrap();
        assert_eq!(reopened.revision().await.unwrap(), 1);
        let found = reopened.component_by_key("releases", "g:a:1").await.unwrap().unwrap();
        assert_eq!(found, Versioned { revision: 1, record: c });
    }
}
