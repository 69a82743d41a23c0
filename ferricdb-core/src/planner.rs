// src/planner.rs
// Access path selection: index choice by estimated selectivity

use tracing::debug;

use crate::error::{FerricError, Result};
use crate::find_options::Hint;
use crate::index::{Index, IndexDirection, IndexId, IndexManager, KeyTuple};
use crate::query::{FieldConstraint, Filter};
use crate::value::Value;

/// How a query will be executed. Index-derived candidates are always a
/// superset; the executor re-applies the full filter either way.
#[derive(Debug, Clone)]
pub enum QueryPlan {
    CollectionScan {
        reason: String,
    },
    IndexScan {
        index_id: IndexId,
        index_name: String,
        lower: Option<(KeyTuple, bool)>,
        upper: Option<(KeyTuple, bool)>,
        /// Index key order already satisfies the requested sort.
        sort_covered: bool,
        /// Walk the index backwards (sort matched in reverse).
        reverse: bool,
    },
}

impl QueryPlan {
    pub fn is_index_scan(&self) -> bool {
        matches!(self, QueryPlan::IndexScan { .. })
    }
}

pub struct QueryPlanner;

impl QueryPlanner {
    /// Choose an access path for (filter, sort) given the collection's
    /// indexes. A hint short-circuits selection.
    pub fn plan(
        filter: &Filter,
        sort: Option<&[(String, i32)]>,
        indexes: &IndexManager,
        hint: Option<&Hint>,
    ) -> Result<QueryPlan> {
        match hint {
            Some(Hint::Natural) => {
                return Ok(QueryPlan::CollectionScan {
                    reason: "hinted $natural".into(),
                })
            }
            Some(Hint::Index(name)) => {
                let index = indexes
                    .by_name(name)
                    .ok_or_else(|| FerricError::IndexNotFound(name.clone()))?;
                let constraints = filter.index_constraints();
                let (lower, upper) = build_bounds(index, &constraints);
                let (sort_covered, reverse) = sort_coverage(index, sort);
                return Ok(QueryPlan::IndexScan {
                    index_id: index.id,
                    index_name: index.name.clone(),
                    lower,
                    upper,
                    sort_covered,
                    reverse,
                });
            }
            None => {}
        }

        let constraints = filter.index_constraints();
        let mut best: Option<(f64, &Index)> = None;

        let sort_requested = sort.is_some_and(|s| !s.is_empty());
        for index in indexes.iter() {
            let usable_prefix = prefix_coverage(index, &constraints);
            let (sort_covered, _) = sort_coverage(index, sort);
            // Usable when predicates cover a prefix, or when an explicit
            // sort can be absorbed by a full index walk.
            if usable_prefix == 0 && !(sort_requested && sort_covered) {
                continue;
            }

            let (lower, upper) = build_bounds(index, &constraints);
            let selectivity = index.estimate_fraction(
                lower.as_ref().map(|(k, incl)| (k, *incl)),
                upper.as_ref().map(|(k, incl)| (k, *incl)),
            );
            // Covering the sort is worth a small edge on close calls.
            let cost = if sort_covered {
                selectivity * 0.9
            } else {
                selectivity
            };

            let better = match best {
                Some((best_cost, _)) => cost < best_cost,
                None => true,
            };
            if better {
                best = Some((cost, index));
            }
        }

        match best {
            Some((cost, index)) => {
                let (lower, upper) = build_bounds(index, &constraints);
                let (sort_covered, reverse) = sort_coverage(index, sort);
                debug!(index = %index.name, cost, "selected index scan");
                Ok(QueryPlan::IndexScan {
                    index_id: index.id,
                    index_name: index.name.clone(),
                    lower,
                    upper,
                    sort_covered,
                    reverse,
                })
            }
            None => Ok(QueryPlan::CollectionScan {
                reason: "no usable index".into(),
            }),
        }
    }

    /// Plan description without executing, in the shape drivers expect
    /// from an explain call.
    pub fn explain(
        filter: &Filter,
        sort: Option<&[(String, i32)]>,
        indexes: &IndexManager,
        hint: Option<&Hint>,
    ) -> Result<serde_json::Value> {
        let plan = Self::plan(filter, sort, indexes, hint)?;
        Ok(match plan {
            QueryPlan::CollectionScan { reason } => serde_json::json!({
                "stage": "COLLSCAN",
                "reason": reason,
            }),
            QueryPlan::IndexScan {
                index_name,
                lower,
                upper,
                sort_covered,
                reverse,
                ..
            } => serde_json::json!({
                "stage": "IXSCAN",
                "indexName": index_name,
                "bounds": {
                    "lower": lower.map(|(k, incl)| format!("{:?} (inclusive: {})", k, incl)),
                    "upper": upper.map(|(k, incl)| format!("{:?} (inclusive: {})", k, incl)),
                },
                "sortCovered": sort_covered,
                "direction": if reverse { "backward" } else { "forward" },
            }),
        })
    }
}

/// Number of leading index fields constrained by the filter. An index is
/// usable only when its first field is constrained.
fn prefix_coverage(index: &Index, constraints: &[FieldConstraint]) -> usize {
    let mut covered = 0;
    for field in &index.spec.fields {
        let Some(constraint) = constraints.iter().find(|c| c.path == field.path) else {
            break;
        };
        covered += 1;
        // Only an equality lets the next field stay constrained.
        if constraint.eq.is_none() {
            break;
        }
    }
    covered
}

fn key_space_min(direction: IndexDirection) -> Value {
    match direction {
        IndexDirection::Ascending => Value::MinKey,
        IndexDirection::Descending => Value::MaxKey,
    }
}

fn key_space_max(direction: IndexDirection) -> Value {
    match direction {
        IndexDirection::Ascending => Value::MaxKey,
        IndexDirection::Descending => Value::MinKey,
    }
}

/// Build key-space range bounds: an equality prefix, then at most one
/// range component, sentinel-padded to full tuple width. `$in` collapses
/// to [min, max] of its values; the residual filter restores exactness.
fn build_bounds(
    index: &Index,
    constraints: &[FieldConstraint],
) -> (Option<(KeyTuple, bool)>, Option<(KeyTuple, bool)>) {
    let fields = &index.spec.fields;
    let mut prefix: Vec<Value> = Vec::new();
    let mut range: Option<(IndexDirection, FieldConstraint)> = None;
    let mut range_pos = fields.len();

    for (pos, field) in fields.iter().enumerate() {
        let Some(constraint) = constraints.iter().find(|c| c.path == field.path) else {
            break;
        };
        if let Some(eq) = &constraint.eq {
            prefix.push(eq.clone());
            continue;
        }
        range = Some((field.direction, constraint.clone()));
        range_pos = pos;
        break;
    }

    if prefix.is_empty() && range.is_none() {
        return (None, None); // unbounded full index scan
    }

    let mut lower = prefix.clone();
    let mut upper = prefix.clone();
    let mut lower_incl = true;
    let mut upper_incl = true;

    let pad_from = if let Some((direction, constraint)) = &range {
        // In-set constraints become a contiguous bracket over the set.
        let (value_min, value_max) = match &constraint.in_set {
            Some(values) => {
                let min = values.iter().min().cloned().map(|v| (v, true));
                let max = values.iter().max().cloned().map(|v| (v, true));
                (min, max)
            }
            None => (constraint.min.clone(), constraint.max.clone()),
        };
        // A descending field flips which value-bound becomes the
        // key-space lower bound.
        let (key_lo, key_hi) = match direction {
            IndexDirection::Ascending => (value_min, value_max),
            IndexDirection::Descending => (value_max, value_min),
        };

        match key_lo {
            Some((value, inclusive)) => {
                lower.push(value);
                lower_incl = inclusive;
            }
            None => {
                lower.push(key_space_min(*direction));
            }
        }
        match key_hi {
            Some((value, inclusive)) => {
                upper.push(value);
                upper_incl = inclusive;
            }
            None => {
                upper.push(key_space_max(*direction));
            }
        }
        range_pos + 1
    } else {
        prefix.len()
    };

    // Pad the remaining fields with direction-aware sentinels. An
    // exclusive bound pads toward the bound itself so the whole prefix
    // group is excluded.
    for field in &fields[pad_from..] {
        lower.push(if lower_incl {
            key_space_min(field.direction)
        } else {
            key_space_max(field.direction)
        });
        upper.push(if upper_incl {
            key_space_max(field.direction)
        } else {
            key_space_min(field.direction)
        });
    }

    (Some((lower, lower_incl)), Some((upper, upper_incl)))
}

/// Whether index key order satisfies the sort spec: the sort fields must
/// be a prefix of the index fields with all directions matching
/// (forward) or all opposed (backward).
fn sort_coverage(index: &Index, sort: Option<&[(String, i32)]>) -> (bool, bool) {
    let Some(sort) = sort else {
        return (true, false); // no sort requested
    };
    if sort.is_empty() {
        return (true, false);
    }
    if sort.len() > index.spec.fields.len() {
        return (false, false);
    }

    let mut forward = true;
    let mut backward = true;
    for (spec_field, (sort_path, sort_dir)) in index.spec.fields.iter().zip(sort.iter()) {
        if spec_field.path != *sort_path {
            return (false, false);
        }
        let index_dir = match spec_field.direction {
            IndexDirection::Ascending => 1,
            IndexDirection::Descending => -1,
        };
        if index_dir == *sort_dir {
            backward = false;
        } else {
            forward = false;
        }
    }

    if forward {
        (true, false)
    } else if backward {
        (true, true)
    } else {
        (false, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, DocumentId};
    use crate::index::{IndexOptions, IndexSpec};

    fn manager_with_ages() -> IndexManager {
        let mut mgr = IndexManager::new("users");
        let docs: Vec<(DocumentId, Document)> = (0..100)
            .map(|i| {
                (
                    DocumentId::Int64(i),
                    Document::from_json(
                        &serde_json::json!({"_id": i, "age": i, "city": format!("c{}", i % 3)}),
                    )
                    .unwrap(),
                )
            })
            .collect();
        mgr.create_index(
            IndexSpec::single("age"),
            IndexOptions::default(),
            docs.iter().map(|(id, d)| (id.clone(), d)),
        )
        .unwrap();
        // Populate the _id index too.
        // (create_index only builds its own tree)
        mgr
    }

    fn parse(json: serde_json::Value) -> Filter {
        Filter::parse(&json).unwrap()
    }

    #[test]
    fn test_equality_selects_index() {
        let mgr = manager_with_ages();
        let filter = parse(serde_json::json!({"age": 42}));
        let plan = QueryPlanner::plan(&filter, None, &mgr, None).unwrap();

        match plan {
            QueryPlan::IndexScan {
                index_name,
                lower,
                upper,
                ..
            } => {
                assert_eq!(index_name, "age_1");
                assert_eq!(lower.unwrap().0, vec![Value::Int64(42)]);
                assert_eq!(upper.unwrap().0, vec![Value::Int64(42)]);
            }
            other => panic!("expected IndexScan, got {:?}", other),
        }
    }

    #[test]
    fn test_range_bounds() {
        let mgr = manager_with_ages();
        let filter = parse(serde_json::json!({"age": {"$gte": 18, "$lt": 65}}));
        let plan = QueryPlanner::plan(&filter, None, &mgr, None).unwrap();

        match plan {
            QueryPlan::IndexScan { lower, upper, .. } => {
                let (lo, lo_incl) = lower.unwrap();
                let (hi, hi_incl) = upper.unwrap();
                assert_eq!(lo, vec![Value::Int64(18)]);
                assert!(lo_incl);
                assert_eq!(hi, vec![Value::Int64(65)]);
                assert!(!hi_incl);
            }
            other => panic!("expected IndexScan, got {:?}", other),
        }
    }

    #[test]
    fn test_unindexed_field_falls_back_to_scan() {
        let mgr = manager_with_ages();
        let filter = parse(serde_json::json!({"name": "Alice"}));
        let plan = QueryPlanner::plan(&filter, None, &mgr, None).unwrap();
        assert!(!plan.is_index_scan());
    }

    #[test]
    fn test_hint_natural_forces_scan() {
        let mgr = manager_with_ages();
        let filter = parse(serde_json::json!({"age": 42}));
        let plan = QueryPlanner::plan(&filter, None, &mgr, Some(&Hint::Natural)).unwrap();
        assert!(!plan.is_index_scan());
    }

    #[test]
    fn test_hint_unknown_index_errors() {
        let mgr = manager_with_ages();
        let filter = parse(serde_json::json!({"age": 42}));
        let err = QueryPlanner::plan(&filter, None, &mgr, Some(&Hint::Index("nope".into())))
            .unwrap_err();
        assert!(matches!(err, FerricError::IndexNotFound(_)));
    }

    #[test]
    fn test_sort_coverage_forward_and_reverse() {
        let mgr = manager_with_ages();
        let filter = parse(serde_json::json!({"age": {"$gt": 10}}));

        let sort = vec![("age".to_string(), 1)];
        let plan = QueryPlanner::plan(&filter, Some(&sort), &mgr, None).unwrap();
        match plan {
            QueryPlan::IndexScan {
                sort_covered,
                reverse,
                ..
            } => {
                assert!(sort_covered);
                assert!(!reverse);
            }
            other => panic!("expected IndexScan, got {:?}", other),
        }

        let sort = vec![("age".to_string(), -1)];
        let plan = QueryPlanner::plan(&filter, Some(&sort), &mgr, None).unwrap();
        match plan {
            QueryPlan::IndexScan {
                sort_covered,
                reverse,
                ..
            } => {
                assert!(sort_covered);
                assert!(reverse);
            }
            other => panic!("expected IndexScan, got {:?}", other),
        }
    }

    #[test]
    fn test_sort_on_other_field_not_covered() {
        let mgr = manager_with_ages();
        let filter = parse(serde_json::json!({"age": {"$gt": 10}}));
        let sort = vec![("city".to_string(), 1)];
        let plan = QueryPlanner::plan(&filter, Some(&sort), &mgr, None).unwrap();
        match plan {
            QueryPlan::IndexScan { sort_covered, .. } => assert!(!sort_covered),
            other => panic!("expected IndexScan, got {:?}", other),
        }
    }

    #[test]
    fn test_compound_prefix_usable() {
        let mut mgr = IndexManager::new("users");
        let docs: Vec<(DocumentId, Document)> = (0..50)
            .map(|i| {
                (
                    DocumentId::Int64(i),
                    Document::from_json(&serde_json::json!({
                        "_id": i, "city": format!("c{}", i % 5), "age": i
                    }))
                    .unwrap(),
                )
            })
            .collect();
        mgr.create_index(
            IndexSpec::from_json(&serde_json::json!({"city": 1, "age": 1})).unwrap(),
            IndexOptions::default(),
            docs.iter().map(|(id, d)| (id.clone(), d)),
        )
        .unwrap();

        // Equality on the prefix + range on the next field.
        let filter = parse(serde_json::json!({"city": "c1", "age": {"$gte": 10}}));
        let plan = QueryPlanner::plan(&filter, None, &mgr, None).unwrap();
        match plan {
            QueryPlan::IndexScan { index_name, lower, .. } => {
                assert_eq!(index_name, "city_1_age_1");
                let (lo, _) = lower.unwrap();
                assert_eq!(lo[0], Value::String("c1".into()));
                assert_eq!(lo[1], Value::Int64(10));
            }
            other => panic!("expected IndexScan, got {:?}", other),
        }

        // Predicate on the second field only: prefix not covered.
        let filter = parse(serde_json::json!({"age": {"$gte": 10}}));
        let plan = QueryPlanner::plan(&filter, None, &mgr, None).unwrap();
        assert!(!plan.is_index_scan());
    }

    #[test]
    fn test_anchored_regex_uses_index() {
        let mut mgr = IndexManager::new("users");
        let docs: Vec<(DocumentId, Document)> = ["alpha", "beta", "alpine"]
            .iter()
            .enumerate()
            .map(|(i, name)| {
                (
                    DocumentId::Int64(i as i64),
                    Document::from_json(&serde_json::json!({"_id": i, "name": name})).unwrap(),
                )
            })
            .collect();
        mgr.create_index(
            IndexSpec::single("name"),
            IndexOptions::default(),
            docs.iter().map(|(id, d)| (id.clone(), d)),
        )
        .unwrap();

        let filter = parse(serde_json::json!({"name": {"$regex": "^al"}}));
        let plan = QueryPlanner::plan(&filter, None, &mgr, None).unwrap();
        assert!(plan.is_index_scan());

        // Unanchored regex cannot bound an index scan.
        let filter = parse(serde_json::json!({"name": {"$regex": "al"}}));
        let plan = QueryPlanner::plan(&filter, None, &mgr, None).unwrap();
        assert!(!plan.is_index_scan());
    }
}
