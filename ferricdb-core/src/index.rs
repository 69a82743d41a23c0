// src/index.rs
// Secondary index specs, key extraction and per-collection index manager

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::btree::{BPlusTree, Bound};
use crate::document::{Document, DocumentId};
use crate::error::{FerricError, Result};
use crate::value::Value;

pub type IndexId = u64;

/// One compound index key: the projected field values in spec order.
pub type KeyTuple = Vec<Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexDirection {
    Ascending,
    Descending,
}

/// Key-tuple comparison honoring per-field directions. Shorter tuples
/// sort first on ties.
pub fn cmp_key_tuples(a: &KeyTuple, b: &KeyTuple, directions: &[IndexDirection]) -> Ordering {
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let mut ord = x.compare(y);
        if directions.get(i) == Some(&IndexDirection::Descending) {
            ord = ord.reverse();
        }
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexField {
    pub path: String,
    pub direction: IndexDirection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexOptions {
    pub unique: bool,
    pub sparse: bool,
}

impl IndexOptions {
    pub fn unique() -> Self {
        IndexOptions {
            unique: true,
            sparse: false,
        }
    }
}

/// Immutable definition of an index: the field list with directions.
/// Changing a spec means drop-and-recreate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub fields: Vec<IndexField>,
}

impl IndexSpec {
    pub fn single(path: impl Into<String>) -> Self {
        IndexSpec {
            fields: vec![IndexField {
                path: path.into(),
                direction: IndexDirection::Ascending,
            }],
        }
    }

    /// Parse `{"age": 1, "name": -1}` style specs.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(map) = json else {
            return Err(FerricError::InvalidDocument(
                "index spec must be an object".into(),
            ));
        };
        if map.is_empty() {
            return Err(FerricError::InvalidDocument("index spec is empty".into()));
        }

        let mut fields = Vec::new();
        for (path, dir) in map {
            let direction = match dir.as_i64() {
                Some(1) => IndexDirection::Ascending,
                Some(-1) => IndexDirection::Descending,
                _ => {
                    return Err(FerricError::InvalidDocument(format!(
                        "index direction for '{}' must be 1 or -1",
                        path
                    )))
                }
            };
            fields.push(IndexField {
                path: path.clone(),
                direction,
            });
        }
        Ok(IndexSpec { fields })
    }

    /// Canonical name, e.g. `age_1_name_-1`.
    pub fn name(&self) -> String {
        self.fields
            .iter()
            .map(|f| {
                let dir = match f.direction {
                    IndexDirection::Ascending => "1",
                    IndexDirection::Descending => "-1",
                };
                format!("{}_{}", f.path, dir)
            })
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn directions(&self) -> Vec<IndexDirection> {
        self.fields.iter().map(|f| f.direction).collect()
    }
}

/// Catalog form of an index, persisted in the manifest so indexes can be
/// rebuilt at recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexCatalogEntry {
    pub id: IndexId,
    pub name: String,
    pub spec: IndexSpec,
    pub options: IndexOptions,
}

/// Project a document onto an index spec.
///
/// An array-valued field fans out into one key per element (multikey).
/// At most one field of a compound index may be array-valued for any
/// given document; more is rejected. Returns `None` when a sparse index
/// skips the document (every indexed field missing).
pub fn extract_key_tuples(
    doc: &Document,
    spec: &IndexSpec,
    sparse: bool,
) -> Result<Option<Vec<KeyTuple>>> {
    enum Component {
        Missing,
        Single(Value),
        Multi(Vec<Value>),
    }

    let mut components = Vec::with_capacity(spec.fields.len());
    let mut multikey_field: Option<&str> = None;

    for field in &spec.fields {
        let resolved = doc.resolve_path_values(&field.path);
        let component = match resolved.len() {
            0 => Component::Missing,
            1 => match resolved[0] {
                Value::Array(items) => {
                    if items.is_empty() {
                        Component::Single(Value::Null)
                    } else {
                        Component::Multi(items.clone())
                    }
                }
                other => Component::Single(other.clone()),
            },
            // Path fan-out through nested arrays of documents is multikey too.
            _ => Component::Multi(resolved.into_iter().cloned().collect()),
        };

        if matches!(component, Component::Multi(_)) {
            if let Some(first) = multikey_field {
                return Err(FerricError::UnsupportedMultikeyCombination(format!(
                    "'{}' and '{}'",
                    first, field.path
                )));
            }
            multikey_field = Some(&field.path);
        }
        components.push(component);
    }

    if sparse && components.iter().all(|c| matches!(c, Component::Missing)) {
        return Ok(None);
    }

    // Expand the single multikey dimension (if any) into one tuple per element.
    let fan_out: Vec<Option<Value>> = match components
        .iter()
        .find_map(|c| match c {
            Component::Multi(items) => Some(items.clone()),
            _ => None,
        }) {
        Some(items) => items.into_iter().map(Some).collect(),
        None => vec![None],
    };

    let mut tuples = Vec::with_capacity(fan_out.len());
    for element in fan_out {
        let tuple: KeyTuple = components
            .iter()
            .map(|c| match c {
                Component::Missing => Value::Null,
                Component::Single(v) => v.clone(),
                Component::Multi(_) => element.clone().expect("multikey element present"),
            })
            .collect();
        tuples.push(tuple);
    }
    tuples.sort();
    tuples.dedup();
    Ok(Some(tuples))
}

/// One live index: definition plus its B+ tree.
#[derive(Debug)]
pub struct Index {
    pub id: IndexId,
    pub name: String,
    pub spec: IndexSpec,
    pub options: IndexOptions,
    tree: BPlusTree,
}

impl Index {
    pub fn lookup(&self, lower: Bound<'_>, upper: Bound<'_>) -> Vec<DocumentId> {
        self.tree.range_scan(lower, upper)
    }

    pub fn estimate_fraction(&self, lower: Bound<'_>, upper: Bound<'_>) -> f64 {
        self.tree.estimate_fraction(lower, upper)
    }

    pub fn distinct_keys(&self) -> u64 {
        self.tree.distinct_keys()
    }

    /// Unique-constraint check for one key tuple, ignoring postings the
    /// caller knows will be replaced (e.g. documents staged for rewrite
    /// in the committing transaction).
    pub fn check_unique_excluding(
        &self,
        tuple: &KeyTuple,
        excluded: impl Fn(&DocumentId) -> bool,
    ) -> Result<()> {
        if let Some(posting) = self.tree.search(tuple) {
            if posting.iter().any(|id| !excluded(id)) {
                return Err(FerricError::DuplicateKey {
                    index: self.name.clone(),
                    key: format!("{:?}", tuple),
                });
            }
        }
        Ok(())
    }

    pub fn catalog_entry(&self) -> IndexCatalogEntry {
        IndexCatalogEntry {
            id: self.id,
            name: self.name.clone(),
            spec: self.spec.clone(),
            options: self.options,
        }
    }
}

/// All indexes of one collection. Structure mutation happens inside the
/// owning transaction's commit scope; readers go through `lookup`.
#[derive(Debug)]
pub struct IndexManager {
    collection: String,
    next_id: IndexId,
    indexes: HashMap<IndexId, Index>,
}

pub const ID_INDEX_NAME: &str = "_id_";

impl IndexManager {
    /// Fresh manager with the implicit unique `_id` index.
    pub fn new(collection: impl Into<String>) -> Self {
        let mut mgr = IndexManager {
            collection: collection.into(),
            next_id: 1,
            indexes: HashMap::new(),
        };
        mgr.install(
            ID_INDEX_NAME.to_string(),
            IndexSpec::single("_id"),
            IndexOptions::unique(),
        );
        mgr
    }

    fn install(&mut self, name: String, spec: IndexSpec, options: IndexOptions) -> IndexId {
        let id = self.next_id;
        self.next_id += 1;
        let tree = BPlusTree::new(
            format!("{}.{}", self.collection, name),
            spec.directions(),
        );
        self.indexes.insert(
            id,
            Index {
                id,
                name,
                spec,
                options,
                tree,
            },
        );
        id
    }

    /// Create an index and build it from the supplied committed documents.
    /// Fails with `DuplicateKey` (and installs nothing) when a unique
    /// constraint is already violated by existing data.
    pub fn create_index<'a>(
        &mut self,
        spec: IndexSpec,
        options: IndexOptions,
        docs: impl Iterator<Item = (DocumentId, &'a Document)>,
    ) -> Result<IndexId> {
        let name = spec.name();
        if self.by_name(&name).is_some() {
            return Err(FerricError::IndexExists(name));
        }

        let id = self.install(name, spec, options);
        for (doc_id, doc) in docs {
            if let Err(e) = self.index_document_into(id, &doc_id, doc) {
                self.indexes.remove(&id);
                return Err(e);
            }
        }
        Ok(id)
    }

    /// Re-install an index definition from the catalog (recovery path);
    /// the tree is rebuilt by replaying documents afterwards.
    pub fn install_from_catalog(&mut self, entry: IndexCatalogEntry) {
        if entry.name == ID_INDEX_NAME {
            return; // already present
        }
        self.next_id = self.next_id.max(entry.id + 1);
        let tree = BPlusTree::new(
            format!("{}.{}", self.collection, entry.name),
            entry.spec.directions(),
        );
        self.indexes.insert(
            entry.id,
            Index {
                id: entry.id,
                name: entry.name,
                spec: entry.spec,
                options: entry.options,
                tree,
            },
        );
    }

    pub fn drop_index(&mut self, id: IndexId) -> Result<()> {
        match self.indexes.get(&id) {
            None => Err(FerricError::IndexNotFound(id.to_string())),
            Some(index) if index.name == ID_INDEX_NAME => Err(
                FerricError::InvalidIndexOperation("the _id index cannot be dropped".into()),
            ),
            Some(_) => {
                self.indexes.remove(&id);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: IndexId) -> Option<&Index> {
        self.indexes.get(&id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Index> {
        self.indexes.values().find(|idx| idx.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Index> {
        self.indexes.values()
    }

    /// Catalog entries for the manifest, `_id` index included.
    pub fn catalog(&self) -> Vec<IndexCatalogEntry> {
        let mut entries: Vec<_> = self.indexes.values().map(Index::catalog_entry).collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    /// Unique-constraint probe against current index contents, used before
    /// publishing a write. `exclude` is the document being rewritten.
    pub fn probe_unique(&self, doc: &Document, exclude: Option<&DocumentId>) -> Result<()> {
        for index in self.indexes.values() {
            if !index.options.unique {
                continue;
            }
            let Some(tuples) = extract_key_tuples(doc, &index.spec, index.options.sparse)? else {
                continue;
            };
            for tuple in &tuples {
                if let Some(posting) = index.tree.search(tuple) {
                    let conflicting = posting.iter().any(|id| Some(id) != exclude);
                    if conflicting {
                        return Err(FerricError::DuplicateKey {
                            index: index.name.clone(),
                            key: format!("{:?}", tuple),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate a document against every index spec without mutating
    /// anything (multikey restrictions surface here at staging time).
    pub fn validate_document(&self, doc: &Document) -> Result<()> {
        for index in self.indexes.values() {
            extract_key_tuples(doc, &index.spec, index.options.sparse)?;
        }
        Ok(())
    }

    fn index_document_into(
        &mut self,
        index_id: IndexId,
        doc_id: &DocumentId,
        doc: &Document,
    ) -> Result<()> {
        let index = self
            .indexes
            .get_mut(&index_id)
            .expect("index disappeared during build");
        let Some(tuples) = extract_key_tuples(doc, &index.spec, index.options.sparse)? else {
            return Ok(());
        };
        for (i, tuple) in tuples.iter().enumerate() {
            if let Err(e) = index
                .tree
                .insert(tuple.clone(), doc_id.clone(), index.options.unique)
            {
                // Undo the partial fan-out before reporting.
                for done in &tuples[..i] {
                    index.tree.remove(done, doc_id);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Add a committed document to every index. On failure the already
    /// touched indexes are rolled back, leaving all trees unchanged.
    pub fn insert_document(&mut self, doc_id: &DocumentId, doc: &Document) -> Result<()> {
        let ids: Vec<IndexId> = self.indexes.keys().copied().collect();
        for (i, index_id) in ids.iter().enumerate() {
            if let Err(e) = self.index_document_into(*index_id, doc_id, doc) {
                for done in &ids[..i] {
                    self.remove_document_from(*done, doc_id, doc);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn remove_document_from(&mut self, index_id: IndexId, doc_id: &DocumentId, doc: &Document) {
        let Some(index) = self.indexes.get_mut(&index_id) else {
            return;
        };
        let tuples = match extract_key_tuples(doc, &index.spec, index.options.sparse) {
            Ok(Some(tuples)) => tuples,
            _ => return,
        };
        for tuple in &tuples {
            index.tree.remove(tuple, doc_id);
        }
    }

    /// Remove a no-longer-visible document version from every index.
    pub fn remove_document(&mut self, doc_id: &DocumentId, doc: &Document) {
        let ids: Vec<IndexId> = self.indexes.keys().copied().collect();
        for index_id in ids {
            self.remove_document_from(index_id, doc_id, doc);
        }
    }
}
