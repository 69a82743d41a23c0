// src/database.rs
// Embedded database facade: collections, transactions, maintenance

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::info;

use crate::collection::{Collection, CollectionState};
use crate::config::EngineConfig;
use crate::error::{FerricError, Result};
use crate::index::IndexManager;
use crate::query::Filter;
use crate::storage::{GcStats, StorageEngine};
use crate::transaction::TransactionManager;

/// An embedded FerricDB database rooted at one directory. Opening runs
/// crash recovery; dropping the handle leaves all durable state on disk.
pub struct Database {
    storage: Arc<StorageEngine>,
    registry: Arc<DashMap<String, Arc<CollectionState>>>,
    txns: Arc<TransactionManager>,
    path: String,
}

impl Database {
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let (engine, recovery) = StorageEngine::open(&path, config)?;
        let storage = Arc::new(engine);
        let registry: Arc<DashMap<String, Arc<CollectionState>>> = Arc::new(DashMap::new());
        let txns = Arc::new(TransactionManager::new(
            Arc::clone(&storage),
            Arc::clone(&registry),
            recovery.max_ts,
        ));

        // Rebuild index structures from the catalog: specs come from the
        // manifest, contents from the recovered documents.
        for catalog in recovery.catalog {
            let store = storage.store_or_create(&catalog.name)?;
            let mut manager = IndexManager::new(&catalog.name);
            for entry in catalog.indexes {
                manager.install_from_catalog(entry);
            }
            for (id, doc) in store.scan(recovery.max_ts) {
                manager.insert_document(&id, &doc).map_err(|e| {
                    FerricError::StorageCorruption(format!(
                        "index rebuild failed for '{}': {}",
                        catalog.name, e
                    ))
                })?;
            }
            registry.insert(
                catalog.name.clone(),
                Arc::new(CollectionState {
                    name: catalog.name,
                    indexes: RwLock::new(manager),
                    validator: None,
                }),
            );
        }

        info!(path = %path_str, collections = registry.len(), "database open");
        Ok(Database {
            storage,
            registry,
            txns,
            path: path_str,
        })
    }

    pub fn open_default(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path, EngineConfig::default())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Open a collection, creating it (with its implicit `_id` index) on
    /// first use.
    pub fn collection(&self, name: &str) -> Result<Collection> {
        self.collection_inner(name, None)
    }

    /// Open a collection with a schema validator: a filter every inserted
    /// or updated document must match. The validator only takes effect
    /// when this call creates the collection.
    pub fn collection_with_validator(
        &self,
        name: &str,
        validator: &serde_json::Value,
    ) -> Result<Collection> {
        let filter = Filter::parse(validator)?;
        self.collection_inner(name, Some(filter))
    }

    fn collection_inner(&self, name: &str, validator: Option<Filter>) -> Result<Collection> {
        self.storage.check_usable()?;
        if name.is_empty() || name.starts_with("system.") {
            return Err(FerricError::InvalidDocument(format!(
                "invalid collection name '{}'",
                name
            )));
        }

        let mut created = false;
        let state = Arc::clone(
            self.registry
                .entry(name.to_string())
                .or_insert_with(|| {
                    created = true;
                    Arc::new(CollectionState {
                        name: name.to_string(),
                        indexes: RwLock::new(IndexManager::new(name)),
                        validator,
                    })
                })
                .value(),
        );
        if created {
            self.storage.create_store(name)?;
            self.storage.update_catalog(self.txns.catalog_snapshot())?;
        }

        let store = self.storage.store(name)?;
        Ok(Collection::new(
            state,
            store,
            Arc::clone(&self.storage),
            Arc::clone(&self.txns),
        ))
    }

    pub fn list_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Drop a collection: its documents, version history and indexes.
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        self.storage.check_usable()?;
        if self.registry.remove(name).is_none() {
            return Err(FerricError::CollectionNotFound(name.to_string()));
        }
        self.storage.remove_store(name)?;
        self.storage.update_catalog(self.txns.catalog_snapshot())
    }

    /// Handle to the transaction manager for explicit multi-document
    /// transactions.
    pub fn transactions(&self) -> Arc<TransactionManager> {
        Arc::clone(&self.txns)
    }

    /// Flush committed state to segments and truncate the WAL.
    pub fn checkpoint(&self) -> Result<()> {
        self.txns.force_checkpoint()
    }

    /// Drop document versions no open snapshot can observe.
    pub fn vacuum(&self) -> GcStats {
        self.txns.vacuum()
    }

    pub fn stats(&self) -> serde_json::Value {
        let snapshot_ts = self.txns.current_ts();
        let collections: Vec<serde_json::Value> = self
            .registry
            .iter()
            .map(|entry| {
                let count = self
                    .storage
                    .store(entry.key())
                    .map(|s| s.live_count(snapshot_ts))
                    .unwrap_or(0);
                serde_json::json!({
                    "name": entry.key(),
                    "documents": count,
                    "indexes": entry.value().indexes.read().catalog().len(),
                })
            })
            .collect();

        serde_json::json!({
            "path": self.path,
            "commit_ts": snapshot_ts,
            "collections": collections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::find_options::FindOptions;
    use crate::index::IndexOptions;
    use crate::value::Value;

    fn open(dir: &tempfile::TempDir) -> Database {
        Database::open_default(dir.path().join("db")).unwrap()
    }

    #[test]
    fn test_insert_and_find_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        let users = db.collection("users").unwrap();

        let id = users
            .insert(&serde_json::json!({"name": "Alice", "age": 30}))
            .unwrap();

        let found = users
            .find_one(&serde_json::json!({"name": "Alice"}))
            .unwrap()
            .expect("document missing");
        assert_eq!(found.id(), Some(id));
        assert_eq!(found.get("age"), Some(&Value::Int64(30)));
    }

    #[test]
    fn test_collection_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        {
            let db = Database::open_default(&path).unwrap();
            let users = db.collection("users").unwrap();
            users.insert(&serde_json::json!({"_id": 1, "name": "A"})).unwrap();
            users
                .create_index(&serde_json::json!({"name": 1}), IndexOptions::default())
                .unwrap();
        }

        let db = Database::open_default(&path).unwrap();
        assert_eq!(db.list_collections(), vec!["users".to_string()]);

        let users = db.collection("users").unwrap();
        assert_eq!(users.len(), 1);
        // Index definitions survive and their contents are rebuilt.
        let indexes = users.list_indexes();
        assert!(indexes.iter().any(|i| i["name"] == "name_1"));

        let found = users.find_one(&serde_json::json!({"name": "A"})).unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_drop_collection() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        db.collection("temp").unwrap();
        assert_eq!(db.list_collections().len(), 1);

        db.drop_collection("temp").unwrap();
        assert!(db.list_collections().is_empty());
        assert!(matches!(
            db.drop_collection("temp"),
            Err(FerricError::CollectionNotFound(_))
        ));
    }

    #[test]
    fn test_validator_rejects_nonconforming() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        let users = db
            .collection_with_validator(
                "users",
                &serde_json::json!({"age": {"$gte": 0}}),
            )
            .unwrap();

        assert!(users.insert(&serde_json::json!({"age": 30})).is_ok());
        let err = users.insert(&serde_json::json!({"age": -1})).unwrap_err();
        assert!(matches!(err, FerricError::InvalidDocument(_)));
    }

    #[test]
    fn test_checkpoint_and_vacuum() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        let users = db.collection("users").unwrap();

        for i in 0..10 {
            users.insert(&serde_json::json!({"_id": i})).unwrap();
        }
        users
            .update(&serde_json::json!({}), &serde_json::json!({"$set": {"x": 1}}))
            .unwrap();

        db.checkpoint().unwrap();
        let stats = db.vacuum();
        // Update left one superseded version per document.
        assert!(stats.reclaimed_versions >= 10);

        let cursor = users.find(&serde_json::json!({}), FindOptions::new()).unwrap();
        assert_eq!(cursor.collect_docs().unwrap().len(), 10);
    }

    #[test]
    fn test_stats_shape() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        let users = db.collection("users").unwrap();
        users.insert(&serde_json::json!({"a": 1})).unwrap();

        let stats = db.stats();
        assert_eq!(stats["collections"][0]["name"], "users");
        assert_eq!(stats["collections"][0]["documents"], 1);
    }

    #[test]
    fn test_invalid_collection_names() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        assert!(db.collection("").is_err());
        assert!(db.collection("system.users").is_err());
    }
}
