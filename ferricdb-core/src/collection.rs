// src/collection.rs
// Collection API: CRUD, find, aggregate and index DDL over one namespace

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::aggregation::{DocStream, Pipeline};
use crate::cursor::Cursor;
use crate::document::{Document, DocumentId};
use crate::error::{FerricError, Result};
use crate::find_options::{sort_documents, FindOptions, Projection};
use crate::index::{IndexId, IndexManager, IndexOptions, IndexSpec, ID_INDEX_NAME};
use crate::planner::{QueryPlan, QueryPlanner};
use crate::query::Filter;
use crate::storage::{StorageEngine, VersionStore};
use crate::transaction::{SnapshotGuard, Transaction, TransactionManager};
use crate::value::Value;

/// Shared per-collection state: the index manager and the optional
/// schema validator. Registered with the transaction manager so commits
/// can apply index updates.
pub struct CollectionState {
    pub name: String,
    pub indexes: RwLock<IndexManager>,
    pub validator: Option<Filter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteResult {
    pub deleted: u64,
}

/// Handle to one collection. Cheap to clone; all handles share state.
#[derive(Clone)]
pub struct Collection {
    state: Arc<CollectionState>,
    store: Arc<VersionStore>,
    storage: Arc<StorageEngine>,
    txns: Arc<TransactionManager>,
}

impl Collection {
    pub(crate) fn new(
        state: Arc<CollectionState>,
        store: Arc<VersionStore>,
        storage: Arc<StorageEngine>,
        txns: Arc<TransactionManager>,
    ) -> Self {
        Collection {
            state,
            store,
            storage,
            txns,
        }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Number of documents visible right now.
    pub fn len(&self) -> u64 {
        self.store.live_count(self.txns.current_ts())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ===== Writes =====

    /// Insert one document inside an implicit single-operation transaction.
    pub fn insert(&self, doc: &serde_json::Value) -> Result<DocumentId> {
        let mut tx = self.txns.begin();
        match self.insert_with(&mut tx, doc) {
            Ok(id) => {
                self.txns.commit(&mut tx)?;
                Ok(id)
            }
            Err(e) => {
                self.txns.abort(&mut tx);
                Err(e)
            }
        }
    }

    /// Stage an insert in the caller's transaction. A validation failure
    /// leaves the transaction active; only commit-time conflicts abort it.
    pub fn insert_with(
        &self,
        tx: &mut Transaction,
        doc: &serde_json::Value,
    ) -> Result<DocumentId> {
        tx.check_active()?;
        tx.check_deadline()?;
        self.storage.check_usable()?;

        let mut doc = Document::from_json(doc)?;
        doc.validate()?;
        let id = doc.ensure_id()?;
        doc.check_size()?;
        self.check_validator(&doc)?;

        // _id uniqueness against the snapshot plus our own staged writes.
        let exists = match tx.staged(&self.state.name, &id) {
            Some(staged) => staged.is_some(),
            None => self.store.get(&id, tx.read_ts()).is_some(),
        };
        if exists {
            return Err(FerricError::DuplicateKey {
                index: ID_INDEX_NAME.to_string(),
                key: id.to_string(),
            });
        }

        {
            let indexes = self.state.indexes.read();
            // Multikey restrictions surface now, unique collisions against
            // committed state too; commit revalidates under its lock.
            indexes.validate_document(&doc)?;
            indexes.probe_unique(&doc, Some(&id))?;
        }

        tx.stage(&self.state.name, id.clone(), Some(Arc::new(doc)));
        Ok(id)
    }

    /// Update every matching document inside an implicit transaction.
    pub fn update(
        &self,
        filter: &serde_json::Value,
        update: &serde_json::Value,
    ) -> Result<UpdateResult> {
        let mut tx = self.txns.begin();
        match self.update_with(&mut tx, filter, update) {
            Ok(result) => {
                self.txns.commit(&mut tx)?;
                Ok(result)
            }
            Err(e) => {
                self.txns.abort(&mut tx);
                Err(e)
            }
        }
    }

    pub fn update_with(
        &self,
        tx: &mut Transaction,
        filter: &serde_json::Value,
        update: &serde_json::Value,
    ) -> Result<UpdateResult> {
        tx.check_active()?;
        tx.check_deadline()?;
        self.storage.check_usable()?;

        let spec = UpdateSpec::parse(update)?;
        let matches = self.find_with(tx, filter, FindOptions::new())?.collect_docs()?;

        let mut result = UpdateResult {
            matched: 0,
            modified: 0,
        };
        for old in matches {
            result.matched += 1;
            let id = old.id().ok_or_else(|| {
                FerricError::InvalidDocument("stored document lost its _id".into())
            })?;

            let new = spec.apply(&old)?;
            if new.id() != Some(id.clone()) {
                return Err(FerricError::InvalidDocument(
                    "update cannot change _id".into(),
                ));
            }
            if new == old {
                continue;
            }

            new.validate()?;
            new.check_size()?;
            self.check_validator(&new)?;
            {
                let indexes = self.state.indexes.read();
                indexes.validate_document(&new)?;
                indexes.probe_unique(&new, Some(&id))?;
            }

            tx.stage(&self.state.name, id, Some(Arc::new(new)));
            result.modified += 1;
        }
        Ok(result)
    }

    /// Delete every matching document inside an implicit transaction.
    /// Deleting nothing is not an error.
    pub fn delete(&self, filter: &serde_json::Value) -> Result<DeleteResult> {
        let mut tx = self.txns.begin();
        match self.delete_with(&mut tx, filter) {
            Ok(result) => {
                self.txns.commit(&mut tx)?;
                Ok(result)
            }
            Err(e) => {
                self.txns.abort(&mut tx);
                Err(e)
            }
        }
    }

    pub fn delete_with(
        &self,
        tx: &mut Transaction,
        filter: &serde_json::Value,
    ) -> Result<DeleteResult> {
        tx.check_active()?;
        tx.check_deadline()?;
        self.storage.check_usable()?;

        let matches = self.find_with(tx, filter, FindOptions::new())?.collect_docs()?;
        let mut deleted = 0;
        for doc in matches {
            let id = doc.id().ok_or_else(|| {
                FerricError::InvalidDocument("stored document lost its _id".into())
            })?;
            tx.stage(&self.state.name, id, None);
            deleted += 1;
        }
        Ok(DeleteResult { deleted })
    }

    // ===== Reads =====

    /// Execute a find against a fresh snapshot. The returned cursor pins
    /// the snapshot until closed or exhausted.
    pub fn find(&self, filter: &serde_json::Value, opts: FindOptions) -> Result<Cursor> {
        self.storage.check_usable()?;
        let filter = Filter::parse(filter)?;
        let guard = self.txns.pin_snapshot();
        let snapshot_ts = guard.ts();
        self.execute_find(filter, opts, snapshot_ts, Some(guard), None)
    }

    /// Find inside a transaction: the transaction's snapshot overlaid
    /// with its own staged writes.
    pub fn find_with(
        &self,
        tx: &mut Transaction,
        filter: &serde_json::Value,
        opts: FindOptions,
    ) -> Result<Cursor> {
        tx.check_active()?;
        tx.check_deadline()?;
        self.storage.check_usable()?;
        let filter = Filter::parse(filter)?;
        let overlay = tx.staged_in(&self.state.name);
        self.execute_find(filter, opts, tx.read_ts(), None, Some(overlay))
    }

    pub fn find_one(&self, filter: &serde_json::Value) -> Result<Option<Document>> {
        self.find(filter, FindOptions::new().with_limit(1))?.next_doc()
    }

    pub fn count(&self, filter: &serde_json::Value) -> Result<u64> {
        let mut cursor = self.find(filter, FindOptions::new())?;
        let mut count = 0;
        while cursor.next_doc()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Distinct values of a field among matching documents, including
    /// array element fan-out.
    pub fn distinct(&self, field: &str, filter: &serde_json::Value) -> Result<Vec<Value>> {
        let docs = self.find(filter, FindOptions::new())?.collect_docs()?;
        let mut values: Vec<Value> = Vec::new();
        for doc in &docs {
            for value in doc.resolve_path_values(field) {
                match value {
                    Value::Array(items) => values.extend(items.iter().cloned()),
                    other => values.push(other.clone()),
                }
            }
        }
        values.sort();
        values.dedup();
        Ok(values)
    }

    /// The access path find would choose, without executing.
    pub fn explain(&self, filter: &serde_json::Value, opts: &FindOptions) -> Result<serde_json::Value> {
        let filter = Filter::parse(filter)?;
        let indexes = self.state.indexes.read();
        QueryPlanner::explain(&filter, opts.sort.as_deref(), &indexes, opts.hint.as_ref())
    }

    // ===== Aggregation =====

    /// Run an aggregation pipeline against a fresh snapshot. A leading
    /// `$match` is pushed down into the access path.
    pub fn aggregate(&self, pipeline: &serde_json::Value) -> Result<Cursor> {
        self.storage.check_usable()?;
        let pipeline = Pipeline::parse(pipeline)?;
        let source_filter = pipeline
            .leading_match()
            .map(|f| f.clone())
            .unwrap_or(Filter::And(Vec::new()));

        let guard = self.txns.pin_snapshot();
        let snapshot_ts = guard.ts();
        let input = self.execute_find(
            source_filter,
            FindOptions::new(),
            snapshot_ts,
            Some(guard),
            None,
        )?;

        self.run_pipeline(pipeline, input)
    }

    /// Aggregation over the transaction's view of the collection.
    pub fn aggregate_with(
        &self,
        tx: &mut Transaction,
        pipeline: &serde_json::Value,
    ) -> Result<Cursor> {
        tx.check_active()?;
        self.storage.check_usable()?;
        let pipeline = Pipeline::parse(pipeline)?;
        let source_filter = pipeline
            .leading_match()
            .map(|f| f.clone())
            .unwrap_or(Filter::And(Vec::new()));

        let overlay = tx.staged_in(&self.state.name);
        let input = self.execute_find(
            source_filter,
            FindOptions::new(),
            tx.read_ts(),
            None,
            Some(overlay),
        )?;

        self.run_pipeline(pipeline, input)
    }

    fn run_pipeline(&self, pipeline: Pipeline, input: Cursor) -> Result<Cursor> {
        let memory_limit = self.storage.config().aggregation_memory_limit;
        let deadline = self
            .storage
            .config()
            .default_deadline
            .map(|d| Instant::now() + d);
        let stream: DocStream = Box::new(input);
        let output = pipeline.execute(stream, memory_limit);
        Ok(Cursor::new(output, None, deadline))
    }

    // ===== Index DDL =====

    /// Create an index over current committed state. Fails with
    /// `DuplicateKey` if a unique constraint is already violated.
    pub fn create_index(
        &self,
        keys: &serde_json::Value,
        options: IndexOptions,
    ) -> Result<IndexId> {
        self.storage.check_usable()?;
        let spec = IndexSpec::from_json(keys)?;

        let guard = self.txns.pin_snapshot();
        let docs = self.store.scan(guard.ts());

        let id = {
            let mut indexes = self.state.indexes.write();
            indexes.create_index(
                spec,
                options,
                docs.iter().map(|(id, doc)| (id.clone(), &**doc)),
            )?
        };
        drop(guard);

        self.persist_catalog()?;
        debug!(collection = %self.state.name, index_id = id, "index created");
        Ok(id)
    }

    pub fn drop_index(&self, id: IndexId) -> Result<()> {
        self.storage.check_usable()?;
        self.state.indexes.write().drop_index(id)?;
        self.persist_catalog()
    }

    /// Index descriptions: name, keys and options.
    pub fn list_indexes(&self) -> Vec<serde_json::Value> {
        let indexes = self.state.indexes.read();
        let mut entries = indexes.catalog();
        entries.sort_by_key(|e| e.id);
        entries
            .into_iter()
            .map(|e| {
                let keys: serde_json::Map<String, serde_json::Value> = e
                    .spec
                    .fields
                    .iter()
                    .map(|f| {
                        let dir = match f.direction {
                            crate::index::IndexDirection::Ascending => 1,
                            crate::index::IndexDirection::Descending => -1,
                        };
                        (f.path.clone(), serde_json::Value::from(dir))
                    })
                    .collect();
                serde_json::json!({
                    "id": e.id,
                    "name": e.name,
                    "keys": keys,
                    "unique": e.options.unique,
                    "sparse": e.options.sparse,
                })
            })
            .collect()
    }

    fn persist_catalog(&self) -> Result<()> {
        self.storage.update_catalog(self.txns.catalog_snapshot())
    }

    fn check_validator(&self, doc: &Document) -> Result<()> {
        if let Some(validator) = &self.state.validator {
            if !validator.matches(doc) {
                return Err(FerricError::InvalidDocument(format!(
                    "document failed validation for collection '{}'",
                    self.state.name
                )));
            }
        }
        Ok(())
    }

    // ===== Execution =====

    /// Plan and execute a find: candidate ids from the chosen access
    /// path, snapshot-consistent fetch, residual filter re-check, then
    /// sort / skip / limit / projection.
    fn execute_find(
        &self,
        filter: Filter,
        opts: FindOptions,
        snapshot_ts: u64,
        guard: Option<SnapshotGuard>,
        overlay: Option<Vec<(DocumentId, Option<Arc<Document>>)>>,
    ) -> Result<Cursor> {
        let (plan, sort_covered) = {
            let indexes = self.state.indexes.read();
            let plan = QueryPlanner::plan(
                &filter,
                opts.sort.as_deref(),
                &indexes,
                opts.hint.as_ref(),
            )?;
            let sort_covered = match &plan {
                QueryPlan::IndexScan { sort_covered, .. } => *sort_covered,
                QueryPlan::CollectionScan { .. } => false,
            };
            (plan, sort_covered)
        };

        let overlay_map: Option<AHashMap<DocumentId, Option<Arc<Document>>>> =
            overlay.map(|entries| entries.into_iter().collect());

        // Gather candidates. Index-derived candidates are a superset and
        // are always re-checked against the fetched document.
        let mut docs: Vec<Arc<Document>> = Vec::new();
        match plan {
            QueryPlan::IndexScan {
                index_id,
                lower,
                upper,
                reverse,
                ..
            } => {
                let mut ids = {
                    let indexes = self.state.indexes.read();
                    match indexes.get(index_id) {
                        Some(index) => index.lookup(
                            lower.as_ref().map(|(k, incl)| (k, *incl)),
                            upper.as_ref().map(|(k, incl)| (k, *incl)),
                        ),
                        None => Vec::new(),
                    }
                };
                if reverse {
                    ids.reverse();
                }
                // Multikey entries can repeat a document.
                let mut seen: HashSet<DocumentId> = HashSet::with_capacity(ids.len());
                for id in ids {
                    if !seen.insert(id.clone()) {
                        continue;
                    }
                    let fetched = match overlay_map.as_ref().and_then(|m| m.get(&id)) {
                        Some(staged) => staged.clone(),
                        None => self.store.get(&id, snapshot_ts),
                    };
                    if let Some(doc) = fetched {
                        docs.push(doc);
                    }
                }
                // Staged documents the (committed) index cannot know about.
                if let Some(map) = overlay_map.as_ref() {
                    for (id, staged) in map.iter() {
                        if seen.contains(id) {
                            continue;
                        }
                        if let Some(doc) = staged {
                            docs.push(doc.clone());
                        }
                    }
                }
            }
            QueryPlan::CollectionScan { .. } => {
                for (id, doc) in self.store.scan(snapshot_ts) {
                    match overlay_map.as_ref().and_then(|m| m.get(&id)) {
                        Some(Some(staged)) => docs.push(staged.clone()),
                        Some(None) => {} // deleted by this transaction
                        None => docs.push(doc),
                    }
                }
                if let Some(map) = overlay_map.as_ref() {
                    for (id, staged) in map.iter() {
                        let already = self.store.get(id, snapshot_ts).is_some();
                        if already {
                            continue;
                        }
                        if let Some(doc) = staged {
                            docs.push(doc.clone());
                        }
                    }
                }
            }
        }

        // Staged writes bypass the index, so a covered sort no longer
        // holds once a transaction overlay contributed documents.
        let overlay_contributed = overlay_map.as_ref().is_some_and(|m| !m.is_empty());

        // Residual filter re-check against the actual documents.
        let mut matched: Vec<Document> = docs
            .into_iter()
            .filter(|doc| filter.matches(doc))
            .map(|doc| (*doc).clone())
            .collect();

        if let Some(sort) = &opts.sort {
            if !sort_covered || overlay_contributed {
                sort_documents(&mut matched, sort);
            }
        }

        let skip = opts.skip.unwrap_or(0);
        let take = opts.limit.unwrap_or(usize::MAX);
        let projection: Option<Projection> = opts.projection;
        let deadline = opts
            .deadline
            .or_else(|| {
                self.storage
                    .config()
                    .default_deadline
                    .map(|d| Instant::now() + d)
            });

        let results = matched
            .into_iter()
            .skip(skip)
            .take(take)
            .map(move |doc| {
                Ok(match &projection {
                    Some(projection) => projection.apply(&doc),
                    None => doc,
                })
            });

        Ok(Cursor::new(Box::new(results), guard, deadline))
    }
}

// ===== Update specs =====

#[derive(Debug, Clone)]
enum UpdateSpec {
    Operators(Vec<UpdateOp>),
    Replace(Document),
}

#[derive(Debug, Clone)]
enum UpdateOp {
    Set(Vec<(String, Value)>),
    Inc(Vec<(String, Value)>),
    Unset(Vec<String>),
    Push(Vec<(String, Value)>),
}

impl UpdateSpec {
    fn parse(json: &serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(map) = json else {
            return Err(FerricError::InvalidQueryOperator(
                "update spec must be an object".into(),
            ));
        };

        let has_operators = map.keys().any(|k| k.starts_with('$'));
        if !has_operators {
            // Full document replacement.
            return Ok(UpdateSpec::Replace(Document::from_json(json)?));
        }
        if !map.keys().all(|k| k.starts_with('$')) {
            return Err(FerricError::InvalidQueryOperator(
                "cannot mix update operators and replacement fields".into(),
            ));
        }

        let mut ops = Vec::new();
        for (op, operand) in map {
            let serde_json::Value::Object(fields) = operand else {
                return Err(FerricError::InvalidQueryOperator(format!(
                    "{} requires an object",
                    op
                )));
            };
            match op.as_str() {
                "$set" => {
                    let mut pairs = Vec::new();
                    for (path, value) in fields {
                        pairs.push((path.clone(), Value::from_json(value)?));
                    }
                    ops.push(UpdateOp::Set(pairs));
                }
                "$inc" => {
                    let mut pairs = Vec::new();
                    for (path, value) in fields {
                        let value = Value::from_json(value)?;
                        if !value.is_number() {
                            return Err(FerricError::InvalidQueryOperator(
                                "$inc requires numeric amounts".into(),
                            ));
                        }
                        pairs.push((path.clone(), value));
                    }
                    ops.push(UpdateOp::Inc(pairs));
                }
                "$unset" => {
                    ops.push(UpdateOp::Unset(fields.keys().cloned().collect()));
                }
                "$push" => {
                    let mut pairs = Vec::new();
                    for (path, value) in fields {
                        pairs.push((path.clone(), Value::from_json(value)?));
                    }
                    ops.push(UpdateOp::Push(pairs));
                }
                other => {
                    return Err(FerricError::InvalidQueryOperator(format!(
                        "unsupported update operator {}",
                        other
                    )))
                }
            }
        }
        Ok(UpdateSpec::Operators(ops))
    }

    fn apply(&self, old: &Document) -> Result<Document> {
        match self {
            UpdateSpec::Replace(replacement) => {
                let mut new = replacement.clone();
                if new.get("_id").is_none() {
                    if let Some(id) = old.get("_id").cloned() {
                        let mut with_id = Document::new();
                        with_id.set("_id", id);
                        for (name, value) in new.iter() {
                            with_id.set(name.to_string(), value.clone());
                        }
                        new = with_id;
                    }
                }
                new.validate()?;
                Ok(new)
            }
            UpdateSpec::Operators(ops) => {
                let mut new = old.clone();
                for op in ops {
                    match op {
                        UpdateOp::Set(pairs) => {
                            for (path, value) in pairs {
                                new.set_path(path, value.clone())?;
                            }
                        }
                        UpdateOp::Inc(pairs) => {
                            for (path, amount) in pairs {
                                let current = new.get_path(path).cloned();
                                let next = match current {
                                    None => amount.clone(),
                                    Some(current) => {
                                        numeric_add(&current, amount).ok_or_else(|| {
                                            FerricError::InvalidDocument(format!(
                                                "$inc target '{}' is not numeric",
                                                path
                                            ))
                                        })?
                                    }
                                };
                                new.set_path(path, next)?;
                            }
                        }
                        UpdateOp::Unset(paths) => {
                            for path in paths {
                                new.remove_path(path);
                            }
                        }
                        UpdateOp::Push(pairs) => {
                            for (path, value) in pairs {
                                match new.get_path(path).cloned() {
                                    None => {
                                        new.set_path(path, Value::Array(vec![value.clone()]))?;
                                    }
                                    Some(Value::Array(mut items)) => {
                                        items.push(value.clone());
                                        new.set_path(path, Value::Array(items))?;
                                    }
                                    Some(_) => {
                                        return Err(FerricError::InvalidDocument(format!(
                                            "$push target '{}' is not an array",
                                            path
                                        )))
                                    }
                                }
                            }
                        }
                    }
                }
                Ok(new)
            }
        }
    }
}

fn numeric_add(a: &Value, b: &Value) -> Option<Value> {
    match (a, b) {
        (Value::Int64(x), Value::Int64(y)) => Some(Value::Int64(x.wrapping_add(*y))),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Some(Value::Float64(x + y)),
            _ => None,
        },
    }
}
