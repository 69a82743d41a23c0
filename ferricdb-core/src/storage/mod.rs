// storage/mod.rs
// MVCC version-chain store with WAL-backed durability

mod checkpoint;
mod gc;
mod io;
mod metadata;

pub use gc::GcStats;
pub use metadata::{CollectionCatalog, Manifest};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::config::{DurabilityPolicy, EngineConfig};
use crate::document::{Document, DocumentId};
use crate::error::{FerricError, Result};
use crate::wal::{RecoveredOp, WalRecord, WriteAheadLog};

/// One historical state of a document. A tombstone marks deletion.
#[derive(Debug, Clone)]
pub struct VersionRecord {
    pub ts: u64,
    pub doc: Option<Arc<Document>>,
}

impl VersionRecord {
    pub fn is_tombstone(&self) -> bool {
        self.doc.is_none()
    }
}

/// All versions of one document, newest first. History is append-only;
/// pruning happens only through GC once no snapshot can observe a version.
#[derive(Debug, Default)]
pub struct VersionChain {
    versions: Vec<VersionRecord>,
}

impl VersionChain {
    fn push_version(&mut self, ts: u64, doc: Option<Arc<Document>>) {
        debug_assert!(
            self.versions.first().map_or(true, |head| head.ts < ts),
            "version timestamps must be strictly increasing"
        );
        self.versions.insert(0, VersionRecord { ts, doc });
    }

    /// Newest version with `ts <= snapshot_ts`.
    pub fn visible_at(&self, snapshot_ts: u64) -> Option<&VersionRecord> {
        self.versions.iter().find(|v| v.ts <= snapshot_ts)
    }

    pub fn latest_ts(&self) -> Option<u64> {
        self.versions.first().map(|v| v.ts)
    }

    pub fn latest(&self) -> Option<&VersionRecord> {
        self.versions.first()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Drop versions no open snapshot can observe. Keeps everything newer
    /// than `oldest_active` plus the one version visible at it. Returns
    /// (reclaimed, chain_now_removable).
    fn prune(&mut self, oldest_active: u64) -> (usize, bool) {
        let keep = self
            .versions
            .iter()
            .position(|v| v.ts <= oldest_active)
            .map(|idx| idx + 1)
            .unwrap_or(self.versions.len());
        let reclaimed = self.versions.len() - keep;
        self.versions.truncate(keep);

        let removable = self.versions.len() == 1
            && self.versions[0].is_tombstone()
            && self.versions[0].ts <= oldest_active;
        (reclaimed, removable)
    }
}

/// Versioned storage for one collection.
#[derive(Debug)]
pub struct VersionStore {
    pub name: String,
    chains: RwLock<HashMap<DocumentId, VersionChain>>,
}

impl VersionStore {
    fn new(name: impl Into<String>) -> Self {
        VersionStore {
            name: name.into(),
            chains: RwLock::new(HashMap::new()),
        }
    }

    /// Append a new committed version. Never rewrites history.
    pub fn put(&self, id: DocumentId, doc: Arc<Document>, ts: u64) {
        let mut chains = self.chains.write();
        chains.entry(id).or_default().push_version(ts, Some(doc));
    }

    /// Append a tombstone version.
    pub fn delete(&self, id: DocumentId, ts: u64) {
        let mut chains = self.chains.write();
        chains.entry(id).or_default().push_version(ts, None);
    }

    /// Latest non-tombstone version visible at the snapshot.
    pub fn get(&self, id: &DocumentId, snapshot_ts: u64) -> Option<Arc<Document>> {
        let chains = self.chains.read();
        chains
            .get(id)?
            .visible_at(snapshot_ts)
            .and_then(|v| v.doc.clone())
    }

    /// Timestamp of the newest committed version of a document, used by
    /// optimistic conflict validation.
    pub fn latest_ts(&self, id: &DocumentId) -> Option<u64> {
        self.chains.read().get(id).and_then(VersionChain::latest_ts)
    }

    /// Latest committed document state regardless of snapshot (None when
    /// absent or deleted). Used inside the commit critical section.
    pub fn latest_doc(&self, id: &DocumentId) -> Option<Arc<Document>> {
        let chains = self.chains.read();
        chains.get(id)?.latest().and_then(|v| v.doc.clone())
    }

    /// Materialize the set of documents visible at a snapshot, in
    /// engine-defined physical order. Callers snapshot-iterate: the
    /// returned set is fixed at call time and unaffected by later writes.
    pub fn scan(&self, snapshot_ts: u64) -> Vec<(DocumentId, Arc<Document>)> {
        let chains = self.chains.read();
        let mut out = Vec::new();
        for (id, chain) in chains.iter() {
            if let Some(version) = chain.visible_at(snapshot_ts) {
                if let Some(doc) = &version.doc {
                    out.push((id.clone(), doc.clone()));
                }
            }
        }
        out
    }

    pub fn live_count(&self, snapshot_ts: u64) -> u64 {
        let chains = self.chains.read();
        chains
            .values()
            .filter(|c| c.visible_at(snapshot_ts).is_some_and(|v| !v.is_tombstone()))
            .count() as u64
    }

    fn with_chains<R>(&self, f: impl FnOnce(&mut HashMap<DocumentId, VersionChain>) -> R) -> R {
        f(&mut self.chains.write())
    }
}

/// Outcome of startup recovery, fed into the transaction manager and the
/// collection registry.
#[derive(Debug)]
pub struct RecoveryInfo {
    /// Highest committed timestamp observed; the commit counter resumes here.
    pub max_ts: u64,
    /// Collection and index definitions from the manifest.
    pub catalog: Vec<CollectionCatalog>,
}

/// Durable, versioned document storage for one database directory.
///
/// Layout: `MANIFEST`, `wal.log`, one `<collection>.seg` per collection.
pub struct StorageEngine {
    root: PathBuf,
    config: EngineConfig,
    wal: Mutex<WriteAheadLog>,
    stores: RwLock<HashMap<String, Arc<VersionStore>>>,
    commits_since_sync: AtomicU32,
    /// Timestamp the current on-disk segments were taken at.
    checkpoint_ts: AtomicU64,
    poisoned: AtomicBool,
}

impl StorageEngine {
    /// Open or create the database directory, run crash recovery, and
    /// return the engine plus what recovery learned.
    pub fn open(root: impl AsRef<Path>, config: EngineConfig) -> Result<(Self, RecoveryInfo)> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        let manifest = Manifest::load_or_default(&root)?;
        let mut wal = WriteAheadLog::open(root.join("wal.log"))?;
        let committed = wal.replay()?;

        let engine = StorageEngine {
            root: root.clone(),
            config,
            wal: Mutex::new(wal),
            stores: RwLock::new(HashMap::new()),
            commits_since_sync: AtomicU32::new(0),
            checkpoint_ts: AtomicU64::new(manifest.checkpoint_ts),
            poisoned: AtomicBool::new(false),
        };

        // Phase 1: load checkpointed segments.
        let mut max_ts = manifest.checkpoint_ts;
        for catalog in &manifest.collections {
            let store = engine.create_store(&catalog.name)?;
            let segment_max = checkpoint::load_segment(&root, &store)?;
            max_ts = max_ts.max(segment_max);
        }

        // Phase 2: replay the WAL tail.
        let replayed = committed.len();
        for tx in committed {
            max_ts = max_ts.max(tx.ts);
            for op in tx.ops {
                match op {
                    RecoveredOp::Put {
                        collection,
                        id,
                        doc,
                    } => {
                        let store = engine.store_or_create(&collection)?;
                        store.put(id, Arc::new(doc), tx.ts);
                    }
                    RecoveredOp::Delete { collection, id } => {
                        let store = engine.store_or_create(&collection)?;
                        store.delete(id, tx.ts);
                    }
                }
            }
        }

        info!(
            path = %root.display(),
            checkpoint_ts = manifest.checkpoint_ts,
            replayed_transactions = replayed,
            max_ts,
            "storage recovered"
        );

        Ok((
            engine,
            RecoveryInfo {
                max_ts,
                catalog: manifest.collections,
            },
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Corruption poisons the engine; every subsequent operation refuses.
    pub fn check_usable(&self) -> Result<()> {
        if self.poisoned.load(AtomicOrdering::SeqCst) {
            return Err(FerricError::StorageCorruption(
                "engine poisoned by earlier corruption".into(),
            ));
        }
        Ok(())
    }

    pub fn poison(&self) {
        self.poisoned.store(true, AtomicOrdering::SeqCst);
    }

    pub fn create_store(&self, name: &str) -> Result<Arc<VersionStore>> {
        let mut stores = self.stores.write();
        if let Some(store) = stores.get(name) {
            return Ok(store.clone());
        }
        let store = Arc::new(VersionStore::new(name));
        stores.insert(name.to_string(), store.clone());
        Ok(store)
    }

    pub fn store(&self, name: &str) -> Result<Arc<VersionStore>> {
        self.stores
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| FerricError::CollectionNotFound(name.to_string()))
    }

    pub(crate) fn store_or_create(&self, name: &str) -> Result<Arc<VersionStore>> {
        match self.store(name) {
            Ok(store) => Ok(store),
            Err(_) => self.create_store(name),
        }
    }

    pub fn store_names(&self) -> Vec<String> {
        self.stores.read().keys().cloned().collect()
    }

    pub fn remove_store(&self, name: &str) -> Result<()> {
        let removed = self.stores.write().remove(name);
        if removed.is_none() {
            return Err(FerricError::CollectionNotFound(name.to_string()));
        }
        let segment = checkpoint::segment_path(&self.root, name);
        if segment.exists() {
            std::fs::remove_file(segment)?;
        }
        Ok(())
    }

    /// Append a commit's records to the WAL and make them durable per the
    /// configured policy. Called inside the commit critical section; an IO
    /// failure here aborts that transaction only.
    pub fn log_commit(&self, records: &[WalRecord]) -> Result<()> {
        let mut wal = self.wal.lock();
        for record in records {
            wal.append(record)?;
        }
        match self.config.durability {
            DurabilityPolicy::Always => {
                wal.sync()?;
            }
            DurabilityPolicy::Batched { every_n } => {
                let n = self.commits_since_sync.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                if n >= every_n {
                    wal.sync()?;
                    self.commits_since_sync.store(0, AtomicOrdering::SeqCst);
                }
            }
        }
        Ok(())
    }

    pub fn wal_len(&self) -> Result<u64> {
        self.wal.lock().len()
    }

    /// Persist a catalog change (collection or index DDL) without moving
    /// the checkpoint position.
    pub fn update_catalog(&self, catalog: Vec<CollectionCatalog>) -> Result<()> {
        let ts = self.checkpoint_ts.load(AtomicOrdering::SeqCst);
        Manifest::new(ts, catalog).store(&self.root)
    }

    /// Whether the WAL has grown past the checkpoint threshold.
    pub fn wants_checkpoint(&self) -> bool {
        self.wal_len()
            .map(|len| len >= self.config.checkpoint_log_bytes)
            .unwrap_or(false)
    }
}
