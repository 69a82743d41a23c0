// src/find_options.rs
// Find query options: projection, sort, limit, skip, hint, deadline

use std::cmp::Ordering;
use std::time::Instant;

use crate::document::Document;
use crate::error::{FerricError, Result};
use crate::value::Value;

/// Force or forbid index use for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hint {
    /// Use the named index, bypassing plan selection.
    Index(String),
    /// Force a full collection scan (`$natural`).
    Natural,
}

/// Options for find queries.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub projection: Option<Projection>,
    /// `[(field, direction)]`, direction 1 (asc) or -1 (desc)
    pub sort: Option<Vec<(String, i32)>>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
    pub hint: Option<Hint>,
    /// Absolute deadline; iteration past it fails with `DeadlineExceeded`.
    pub deadline: Option<Instant>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, sort: Vec<(String, i32)>) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_hint(mut self, hint: Hint) -> Self {
        self.hint = Some(hint);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Parse a `{"age": 1, "name": -1}` sort spec.
pub fn parse_sort(json: &serde_json::Value) -> Result<Vec<(String, i32)>> {
    let serde_json::Value::Object(map) = json else {
        return Err(FerricError::InvalidQueryOperator(
            "sort spec must be an object".into(),
        ));
    };
    let mut fields = Vec::new();
    for (field, dir) in map {
        match dir.as_i64() {
            Some(1) => fields.push((field.clone(), 1)),
            Some(-1) => fields.push((field.clone(), -1)),
            _ => {
                return Err(FerricError::InvalidQueryOperator(format!(
                    "sort direction for '{}' must be 1 or -1",
                    field
                )))
            }
        }
    }
    Ok(fields)
}

/// Sort documents in place by a multi-field spec. Missing fields sort as
/// Null, per the value total order.
pub fn sort_documents(docs: &mut [Document], sort: &[(String, i32)]) {
    docs.sort_by(|a, b| compare_documents(a, b, sort));
}

pub fn compare_documents(a: &Document, b: &Document, sort: &[(String, i32)]) -> Ordering {
    for (field, direction) in sort {
        let va = a.get_path(field).unwrap_or(&Value::Null);
        let vb = b.get_path(field).unwrap_or(&Value::Null);
        let mut ord = va.compare(vb);
        if *direction == -1 {
            ord = ord.reverse();
        }
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProjectionMode {
    Include,
    Exclude,
}

/// A validated projection spec. Inclusion and exclusion are mutually
/// exclusive, except `_id` which may be excluded alongside inclusions.
#[derive(Debug, Clone)]
pub struct Projection {
    mode: ProjectionMode,
    paths: Vec<String>,
    id_excluded: bool,
}

impl Projection {
    /// Parse `{"name": 1, "age": 1, "_id": 0}` style specs.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(map) = json else {
            return Err(FerricError::InvalidProjection(
                "projection must be an object".into(),
            ));
        };
        if map.is_empty() {
            return Err(FerricError::InvalidProjection("projection is empty".into()));
        }

        let mut includes = Vec::new();
        let mut excludes = Vec::new();
        let mut id_excluded = false;

        for (path, flag) in map {
            if path.is_empty() || path.split('.').any(|seg| seg.is_empty()) {
                return Err(FerricError::InvalidProjection(format!(
                    "malformed field path '{}'",
                    path
                )));
            }
            let include = match flag.as_i64() {
                Some(1) => true,
                Some(0) => false,
                _ => match flag.as_bool() {
                    Some(b) => b,
                    None => {
                        return Err(FerricError::InvalidProjection(format!(
                            "projection value for '{}' must be 0 or 1",
                            path
                        )))
                    }
                },
            };

            if path == "_id" && !include {
                id_excluded = true;
            } else if include {
                includes.push(path.clone());
            } else {
                excludes.push(path.clone());
            }
        }

        if !includes.is_empty() && !excludes.is_empty() {
            return Err(FerricError::InvalidProjection(
                "cannot mix inclusion and exclusion (except _id)".into(),
            ));
        }

        if includes.is_empty() && excludes.is_empty() && id_excluded {
            // Pure {_id: 0} behaves as an exclusion projection.
            return Ok(Projection {
                mode: ProjectionMode::Exclude,
                paths: Vec::new(),
                id_excluded: true,
            });
        }

        Ok(if includes.is_empty() {
            Projection {
                mode: ProjectionMode::Exclude,
                paths: excludes,
                id_excluded,
            }
        } else {
            Projection {
                mode: ProjectionMode::Include,
                paths: includes,
                id_excluded,
            }
        })
    }

    /// Apply to a document, producing the projected copy.
    pub fn apply(&self, doc: &Document) -> Document {
        match self.mode {
            ProjectionMode::Include => {
                let mut out = Document::new();
                if !self.id_excluded {
                    if let Some(id) = doc.get("_id") {
                        out.set("_id", id.clone());
                    }
                }
                for path in &self.paths {
                    if let Some(value) = doc.get_path(path) {
                        // set_path only fails on malformed paths, which
                        // were rejected at parse time
                        let _ = out.set_path(path, value.clone());
                    }
                }
                out
            }
            ProjectionMode::Exclude => {
                let mut out = doc.clone();
                for path in &self.paths {
                    out.remove_path(path);
                }
                if self.id_excluded {
                    out.remove("_id");
                }
                out
            }
        }
    }
}
