// src/transaction.rs
// Snapshot-isolation transactions with optimistic conflict detection

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::collection::CollectionState;
use crate::document::{Document, DocumentId};
use crate::error::{FerricError, Result};
use crate::index::extract_key_tuples;
use crate::storage::{CollectionCatalog, GcStats, StorageEngine};
use crate::wal::{TxId, WalRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committing,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Default)]
pub struct TxnOptions {
    /// Relative deadline for everything the transaction does, commit
    /// included.
    pub deadline: Option<Duration>,
}

impl TxnOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// One staged write: the new version of a document (None deletes it).
#[derive(Debug, Clone)]
pub(crate) struct StagedWrite {
    pub collection: String,
    pub id: DocumentId,
    pub doc: Option<Arc<Document>>,
}

/// Tracks the read timestamps of open snapshots so GC knows what must be
/// retained.
#[derive(Debug, Default)]
pub(crate) struct SnapshotRegistry {
    pinned: Mutex<BTreeMap<u64, usize>>,
}

impl SnapshotRegistry {
    fn pin(self: &Arc<Self>, ts: u64) -> SnapshotGuard {
        *self.pinned.lock().entry(ts).or_insert(0) += 1;
        SnapshotGuard {
            ts,
            registry: Arc::clone(self),
        }
    }

    fn release(&self, ts: u64) {
        let mut pinned = self.pinned.lock();
        if let Some(count) = pinned.get_mut(&ts) {
            *count -= 1;
            if *count == 0 {
                pinned.remove(&ts);
            }
        }
    }

    fn oldest(&self) -> Option<u64> {
        self.pinned.lock().keys().next().copied()
    }
}

/// RAII pin on a snapshot timestamp. Long scans hold one of these, not a
/// lock; dropping it lets GC reclaim versions the snapshot was keeping
/// alive.
#[derive(Debug)]
pub struct SnapshotGuard {
    ts: u64,
    registry: Arc<SnapshotRegistry>,
}

impl SnapshotGuard {
    pub fn ts(&self) -> u64 {
        self.ts
    }
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        self.registry.release(self.ts);
    }
}

/// A multi-document transaction. Holds its snapshot, its private
/// write-set, and sees its own uncommitted writes layered over the
/// snapshot. Nothing is visible to others before commit.
pub struct Transaction {
    id: TxId,
    read_ts: u64,
    state: TransactionState,
    writes: Vec<StagedWrite>,
    overlay: AHashMap<(String, DocumentId), Option<Arc<Document>>>,
    /// Pins the snapshot for GC; dropped on commit or abort.
    snapshot_pin: Option<SnapshotGuard>,
    deadline: Option<Instant>,
}

impl Transaction {
    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn read_ts(&self) -> u64 {
        self.read_ts
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn check_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(FerricError::TransactionClosed)
        }
    }

    pub(crate) fn check_deadline(&self) -> Result<()> {
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                return Err(FerricError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Stage a write; visible to this transaction's own reads immediately.
    pub(crate) fn stage(
        &mut self,
        collection: &str,
        id: DocumentId,
        doc: Option<Arc<Document>>,
    ) {
        self.overlay
            .insert((collection.to_string(), id.clone()), doc.clone());
        // A later write to the same document supersedes the earlier one.
        self.writes
            .retain(|w| !(w.collection == collection && w.id == id));
        self.writes.push(StagedWrite {
            collection: collection.to_string(),
            id,
            doc,
        });
    }

    /// Staged state for a document, if this transaction wrote it.
    pub(crate) fn staged(&self, collection: &str, id: &DocumentId) -> Option<Option<Arc<Document>>> {
        self.overlay
            .get(&(collection.to_string(), id.clone()))
            .cloned()
    }

    /// All staged writes touching one collection.
    pub(crate) fn staged_in(&self, collection: &str) -> Vec<(DocumentId, Option<Arc<Document>>)> {
        self.writes
            .iter()
            .filter(|w| w.collection == collection)
            .map(|w| (w.id.clone(), w.doc.clone()))
            .collect()
    }

    /// Whether this transaction still holds its snapshot pin.
    pub fn holds_snapshot(&self) -> bool {
        self.snapshot_pin.is_some()
    }

    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        self.writes.clear();
        self.overlay.clear();
        self.snapshot_pin = None;
    }
}

type CommitHook = Box<dyn Fn(u64) + Send + Sync>;

/// Owns the global commit counter and coordinates begin/commit/abort.
/// All components receive it by handle; there is no ambient global.
pub struct TransactionManager {
    next_tx_id: AtomicU64,
    commit_counter: AtomicU64,
    commit_lock: Mutex<()>,
    snapshots: Arc<SnapshotRegistry>,
    storage: Arc<StorageEngine>,
    registry: Arc<DashMap<String, Arc<CollectionState>>>,
    /// Extension point for a replication log consumer; called with each
    /// commit timestamp after publication.
    commit_hook: RwLock<Option<CommitHook>>,
}

impl TransactionManager {
    pub(crate) fn new(
        storage: Arc<StorageEngine>,
        registry: Arc<DashMap<String, Arc<CollectionState>>>,
        initial_ts: u64,
    ) -> Self {
        TransactionManager {
            next_tx_id: AtomicU64::new(1),
            commit_counter: AtomicU64::new(initial_ts),
            commit_lock: Mutex::new(()),
            snapshots: Arc::new(SnapshotRegistry::default()),
            storage,
            registry,
            commit_hook: RwLock::new(None),
        }
    }

    /// Current global commit timestamp.
    pub fn current_ts(&self) -> u64 {
        self.commit_counter.load(AtomicOrdering::SeqCst)
    }

    /// Oldest snapshot any open transaction or cursor can observe.
    pub fn oldest_active(&self) -> u64 {
        self.snapshots.oldest().unwrap_or_else(|| self.current_ts())
    }

    /// Pin the current timestamp for a non-transactional read.
    pub(crate) fn pin_snapshot(&self) -> SnapshotGuard {
        self.snapshots.pin(self.current_ts())
    }

    pub fn begin(&self) -> Transaction {
        self.begin_with(TxnOptions::default())
    }

    pub fn begin_with(&self, opts: TxnOptions) -> Transaction {
        let read_ts = self.current_ts();
        let deadline = opts
            .deadline
            .or(self.storage.config().default_deadline)
            .map(|d| Instant::now() + d);
        Transaction {
            id: self.next_tx_id.fetch_add(1, AtomicOrdering::SeqCst),
            read_ts,
            state: TransactionState::Active,
            writes: Vec::new(),
            overlay: AHashMap::new(),
            snapshot_pin: Some(self.snapshots.pin(read_ts)),
            deadline,
        }
    }

    /// Validate and atomically publish the write-set.
    ///
    /// First-committer-wins: a document committed by someone else after
    /// this transaction's read timestamp aborts it with
    /// `TransientConflict`. Publication (versions plus index updates)
    /// happens under the commit lock, so no reader observes a half-applied
    /// commit.
    pub fn commit(&self, tx: &mut Transaction) -> Result<u64> {
        tx.check_active()?;
        self.storage.check_usable()?;

        // A commit racing its deadline must resolve all-or-nothing; we
        // refuse before publishing anything, which is safe to retry.
        if tx.check_deadline().is_err() {
            tx.finish(TransactionState::Aborted);
            return Err(FerricError::TransientConflict(
                "commit deadline exceeded".into(),
            ));
        }

        if tx.writes.is_empty() {
            tx.finish(TransactionState::Committed);
            return Ok(tx.read_ts);
        }

        tx.state = TransactionState::Committing;
        let _commit_guard = self.commit_lock.lock();

        // Write-write conflict validation against versions committed
        // after our snapshot.
        let mut conflict: Option<DocumentId> = None;
        for write in &tx.writes {
            let latest = match self.storage.store(&write.collection) {
                Ok(store) => store.latest_ts(&write.id),
                Err(_) => None,
            };
            if latest.is_some_and(|latest| latest > tx.read_ts) {
                conflict = Some(write.id.clone());
                break;
            }
        }
        if let Some(id) = conflict {
            tx.finish(TransactionState::Aborted);
            return Err(FerricError::TransientConflict(format!(
                "document {} was modified concurrently",
                id
            )));
        }

        if let Err(e) = self.validate_unique(tx) {
            tx.finish(TransactionState::Aborted);
            return Err(e);
        }

        let commit_ts = self.current_ts() + 1;

        // Durability first: the WAL records must be on disk (per policy)
        // before any in-memory state changes. An append failure aborts
        // this transaction and nothing has been published.
        let mut records = Vec::with_capacity(tx.writes.len() + 2);
        records.push(WalRecord::Begin { tx: tx.id });
        for write in &tx.writes {
            records.push(match &write.doc {
                Some(doc) => WalRecord::Put {
                    tx: tx.id,
                    collection: write.collection.clone(),
                    id: write.id.clone(),
                    doc: (**doc).clone(),
                },
                None => WalRecord::Delete {
                    tx: tx.id,
                    collection: write.collection.clone(),
                    id: write.id.clone(),
                },
            });
        }
        records.push(WalRecord::Commit {
            tx: tx.id,
            ts: commit_ts,
        });
        if let Err(e) = self.storage.log_commit(&records) {
            tx.finish(TransactionState::Aborted);
            return Err(e);
        }

        // Publish versions and index updates atomically.
        let mut publish_failure = false;
        for write in &tx.writes {
            let store = match self.storage.store_or_create(&write.collection) {
                Ok(store) => store,
                Err(_) => {
                    publish_failure = true;
                    break;
                }
            };
            let old_doc = store.latest_doc(&write.id);

            if let Some(state) = self.registry.get(&write.collection) {
                let mut indexes = state.indexes.write();
                if let Some(old) = &old_doc {
                    indexes.remove_document(&write.id, old);
                }
                if let Some(new) = &write.doc {
                    if let Err(e) = indexes.insert_document(&write.id, new) {
                        // Validation guaranteed this cannot collide; a
                        // failure here means the index diverged from the
                        // version store.
                        warn!(error = %e, "index update failed after validation");
                        publish_failure = true;
                        break;
                    }
                }
            }

            match &write.doc {
                Some(doc) => store.put(write.id.clone(), doc.clone(), commit_ts),
                None => store.delete(write.id.clone(), commit_ts),
            }
        }
        if publish_failure {
            self.storage.poison();
            tx.finish(TransactionState::Aborted);
            return Err(FerricError::StorageCorruption(
                "commit publication failed mid-flight".into(),
            ));
        }

        self.commit_counter.store(commit_ts, AtomicOrdering::SeqCst);
        let write_count = tx.writes.len();
        tx.finish(TransactionState::Committed);

        if let Some(hook) = self.commit_hook.read().as_ref() {
            hook(commit_ts);
        }

        // Opportunistic maintenance while we still hold the commit lock.
        if self.storage.wants_checkpoint() {
            let catalog = self.catalog_snapshot();
            if let Err(e) = self.storage.checkpoint(commit_ts, catalog) {
                warn!(error = %e, "checkpoint failed, continuing on WAL");
            }
            self.storage.collect_garbage(self.oldest_active());
        }

        debug!(tx = tx.id, commit_ts, writes = write_count, "committed");
        Ok(commit_ts)
    }

    /// Unique-index validation for the staged write-set: committed
    /// postings that will not be replaced by this transaction, plus
    /// collisions between two staged documents.
    fn validate_unique(&self, tx: &Transaction) -> Result<()> {
        let mut staged_ids: HashSet<(&str, &DocumentId)> = HashSet::new();
        for write in &tx.writes {
            staged_ids.insert((write.collection.as_str(), &write.id));
        }

        // (collection, index, tuple) -> staged doc id, to catch two staged
        // documents claiming the same unique key.
        let mut staged_tuples: AHashMap<(String, u64, String), DocumentId> = AHashMap::new();

        for write in &tx.writes {
            let Some(doc) = &write.doc else {
                continue;
            };
            let Some(state) = self.registry.get(&write.collection) else {
                continue;
            };
            let indexes = state.indexes.read();
            for index in indexes.iter() {
                if !index.options.unique {
                    continue;
                }
                let Some(tuples) = extract_key_tuples(doc, &index.spec, index.options.sparse)?
                else {
                    continue;
                };
                for tuple in &tuples {
                    index.check_unique_excluding(tuple, |id| {
                        staged_ids.contains(&(write.collection.as_str(), id))
                    })?;

                    let key = (
                        write.collection.clone(),
                        index.id,
                        format!("{:?}", tuple),
                    );
                    if let Some(other) = staged_tuples.get(&key) {
                        if *other != write.id {
                            return Err(FerricError::DuplicateKey {
                                index: index.name.clone(),
                                key: format!("{:?}", tuple),
                            });
                        }
                    }
                    staged_tuples.insert(key, write.id.clone());
                }
            }
        }
        Ok(())
    }

    /// Discard staged writes and release the snapshot.
    pub fn abort(&self, tx: &mut Transaction) {
        if matches!(
            tx.state,
            TransactionState::Active | TransactionState::Committing
        ) {
            tx.finish(TransactionState::Aborted);
        }
    }

    /// Bounded retry loop for `TransientConflict` - the caller-facing
    /// retry convention. The body runs against a fresh transaction per
    /// attempt.
    pub fn with_retry<T>(
        &self,
        opts: TxnOptions,
        max_attempts: usize,
        mut body: impl FnMut(&mut Transaction) -> Result<T>,
    ) -> Result<T> {
        let mut last_err = None;
        for _ in 0..max_attempts {
            let mut tx = self.begin_with(opts.clone());
            match body(&mut tx) {
                Ok(value) => match self.commit(&mut tx) {
                    Ok(_) => return Ok(value),
                    Err(e) if e.is_retryable() => {
                        last_err = Some(e);
                    }
                    Err(e) => return Err(e),
                },
                Err(e) => {
                    self.abort(&mut tx);
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| FerricError::TransientConflict("retry budget exhausted".into())))
    }

    /// Install the commit-event hook (replication extension point).
    pub fn set_commit_hook(&self, hook: impl Fn(u64) + Send + Sync + 'static) {
        *self.commit_hook.write() = Some(Box::new(hook));
    }

    /// Reclaim versions below the oldest active snapshot.
    pub fn vacuum(&self) -> GcStats {
        self.storage.collect_garbage(self.oldest_active())
    }

    /// Checkpoint immediately, regardless of WAL size. Takes the commit
    /// lock so chain heads are stable while segments are written.
    pub fn force_checkpoint(&self) -> Result<()> {
        let _commit_guard = self.commit_lock.lock();
        self.storage
            .checkpoint(self.current_ts(), self.catalog_snapshot())
    }

    pub(crate) fn catalog_snapshot(&self) -> Vec<CollectionCatalog> {
        self.registry
            .iter()
            .map(|entry| CollectionCatalog {
                name: entry.key().clone(),
                indexes: entry.value().indexes.read().catalog(),
            })
            .collect()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("current_ts", &self.current_ts())
            .finish()
    }
}
