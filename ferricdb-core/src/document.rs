// src/document.rs
// Ordered document model and dot-path resolution

use serde::{Deserialize, Serialize};

use crate::error::{FerricError, Result};
use crate::value::{ObjectId, Value};

/// Hard cap on the serialized size of a single document (16 MiB).
pub const MAX_DOCUMENT_SIZE: u64 = 16 * 1024 * 1024;

/// Primary key of a document. Generated as an ObjectId when the caller
/// does not supply `_id`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DocumentId {
    Int64(i64),
    String(String),
    ObjectId(ObjectId),
}

impl DocumentId {
    pub fn to_value(&self) -> Value {
        match self {
            DocumentId::Int64(i) => Value::Int64(*i),
            DocumentId::String(s) => Value::String(s.clone()),
            DocumentId::ObjectId(oid) => Value::ObjectId(*oid),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int64(i) => Ok(DocumentId::Int64(*i)),
            Value::String(s) => Ok(DocumentId::String(s.clone())),
            Value::ObjectId(oid) => Ok(DocumentId::ObjectId(*oid)),
            other => Err(FerricError::InvalidDocument(format!(
                "unsupported _id type: {}",
                other.type_name()
            ))),
        }
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentId::Int64(i) => write!(f, "{}", i),
            DocumentId::String(s) => write!(f, "{}", s),
            DocumentId::ObjectId(oid) => write!(f, "{}", oid),
        }
    }
}

/// An ordered sequence of (field, value) pairs with unique field names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Document { fields: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, field: &str) -> bool {
        self.fields.iter().any(|(name, _)| name == field)
    }

    /// Set a field, replacing in place (position preserved) or appending.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((field, value)),
        }
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        let pos = self.fields.iter().position(|(name, _)| name == field)?;
        Some(self.fields.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// The `_id` field, if present and of a supported id type.
    pub fn id(&self) -> Option<DocumentId> {
        self.get("_id").and_then(|v| DocumentId::from_value(v).ok())
    }

    /// Guarantee an `_id`, generating an ObjectId at the front when absent.
    pub fn ensure_id(&mut self) -> Result<DocumentId> {
        if let Some(value) = self.get("_id") {
            return DocumentId::from_value(value);
        }
        let id = DocumentId::ObjectId(ObjectId::new());
        self.fields.insert(0, ("_id".to_string(), id.to_value()));
        Ok(id)
    }

    /// Resolve a dot path (`a.b.c`, `a.0`) to a single value. Numeric
    /// segments index into arrays; there is no fan-out here.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.get(first)?;

        for segment in segments {
            current = match current {
                Value::Document(doc) => doc.get(segment)?,
                Value::Array(items) => {
                    let idx: usize = segment.parse().ok()?;
                    items.get(idx)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Resolve a dot path with array fan-out: when an intermediate segment
    /// lands on an array of documents, the remaining path is resolved
    /// against every element. Used by filter evaluation and multikey
    /// index extraction.
    pub fn resolve_path_values<'a>(&'a self, path: &str) -> Vec<&'a Value> {
        fn walk<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
            let Some((head, rest)) = segments.split_first() else {
                out.push(value);
                return;
            };
            match value {
                Value::Document(doc) => {
                    if let Some(next) = doc.get(head) {
                        walk(next, rest, out);
                    }
                }
                Value::Array(items) => {
                    if let Ok(idx) = head.parse::<usize>() {
                        if let Some(next) = items.get(idx) {
                            walk(next, rest, out);
                        }
                    }
                    for item in items {
                        if let Value::Document(doc) = item {
                            if let Some(next) = doc.get(head) {
                                walk(next, rest, out);
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        let segments: Vec<&str> = path.split('.').collect();
        let mut out = Vec::new();
        if let Some((head, rest)) = segments.split_first() {
            if let Some(value) = self.get(head) {
                walk(value, rest, &mut out);
            }
        }
        out
    }

    /// Set a value at a dot path, creating intermediate documents as needed.
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<()> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(FerricError::InvalidDocument(format!(
                "malformed field path '{}'",
                path
            )));
        }
        set_path_in(self, &segments, value)
    }

    /// Remove the value at a dot path. Returns whether anything was removed.
    pub fn remove_path(&mut self, path: &str) -> bool {
        let segments: Vec<&str> = path.split('.').collect();
        let Some((&last, parents)) = segments.split_last() else {
            return false;
        };
        if parents.is_empty() {
            return self.remove(last).is_some();
        }

        let mut current: &mut Value = {
            let Some(slot) = self.get_mut_field(parents[0]) else {
                return false;
            };
            slot
        };
        for segment in &parents[1..] {
            current = match current {
                Value::Document(doc) => match doc.get_mut_field(segment) {
                    Some(next) => next,
                    None => return false,
                },
                Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                    Some(next) => next,
                    None => return false,
                },
                _ => return false,
            };
        }
        match current {
            Value::Document(doc) => doc.remove(last).is_some(),
            _ => false,
        }
    }

    fn get_mut_field(&mut self, field: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Basic structural validation applied at write time.
    pub fn validate(&self) -> Result<()> {
        for (name, _) in &self.fields {
            if name.is_empty() {
                return Err(FerricError::InvalidDocument("empty field name".into()));
            }
            if name.starts_with('$') {
                return Err(FerricError::InvalidDocument(format!(
                    "top-level field name cannot start with '$': {}",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Serialized size as stored, checked against the 16 MiB cap.
    pub fn check_size(&self) -> Result<()> {
        let size = bincode::serialized_size(self)
            .map_err(|e| FerricError::Serialization(e.to_string()))?;
        if size > MAX_DOCUMENT_SIZE {
            return Err(FerricError::DocumentTooLarge {
                size,
                limit: MAX_DOCUMENT_SIZE,
            });
        }
        Ok(())
    }

    pub fn approx_size(&self) -> usize {
        self.iter()
            .map(|(name, value)| 24 + name.len() + value.approx_size())
            .sum()
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Object(map) => Self::from_json_object(map),
            _ => Err(FerricError::InvalidDocument(
                "document must be a JSON object".into(),
            )),
        }
    }

    pub fn from_json_object(map: &serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        let mut doc = Document::new();
        for (name, value) in map {
            doc.fields.push((name.clone(), Value::from_json(value)?));
        }
        Ok(doc)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, value) in self.iter() {
            map.insert(name.to_string(), value.to_json());
        }
        serde_json::Value::Object(map)
    }
}

fn set_path_in(doc: &mut Document, segments: &[&str], value: Value) -> Result<()> {
    let (head, rest) = segments
        .split_first()
        .expect("set_path_in called with empty path");

    if rest.is_empty() {
        doc.set(*head, value);
        return Ok(());
    }

    if !doc.contains_key(head) {
        doc.set(*head, Value::Document(Document::new()));
    }
    match doc.get_mut_field(head).unwrap() {
        Value::Document(inner) => set_path_in(inner, rest, value),
        Value::Array(items) => {
            let idx: usize = rest[0].parse().map_err(|_| {
                FerricError::InvalidDocument(format!(
                    "cannot descend into array without index at '{}'",
                    rest[0]
                ))
            })?;
            match items.get_mut(idx) {
                Some(slot) if rest.len() == 1 => {
                    *slot = value;
                    Ok(())
                }
                Some(Value::Document(inner)) => set_path_in(inner, &rest[1..], value),
                _ => Err(FerricError::InvalidDocument(format!(
                    "array index {} out of bounds",
                    idx
                ))),
            }
        }
        _ => Err(FerricError::InvalidDocument(format!(
            "cannot create path through non-document field '{}'",
            head
        ))),
    }
}
