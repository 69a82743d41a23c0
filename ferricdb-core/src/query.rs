// src/query.rs
// Filter expression tree: parsing from JSON specs and evaluation

use std::cmp::Ordering;

use regex::Regex;

use crate::document::Document;
use crate::error::{FerricError, Result};
use crate::value::Value;

/// A parsed filter expression.
#[derive(Debug, Clone)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Field {
        path: String,
        predicates: Vec<Predicate>,
    },
}

#[derive(Debug, Clone)]
pub enum Predicate {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Type(String),
    Size(usize),
    All(Vec<Value>),
    ElemMatch(ElemMatch),
    Regex(RegexPredicate),
    Not(Vec<Predicate>),
}

#[derive(Debug, Clone)]
pub enum ElemMatch {
    /// `{"$elemMatch": {"$gt": 5}}` - predicates on the element itself
    Predicates(Vec<Predicate>),
    /// `{"$elemMatch": {"qty": {"$gt": 5}}}` - a filter on element documents
    Filter(Box<Filter>),
}

#[derive(Debug, Clone)]
pub struct RegexPredicate {
    pub pattern: String,
    pub case_insensitive: bool,
    compiled: Regex,
}

impl RegexPredicate {
    fn new(pattern: &str, case_insensitive: bool) -> Result<Self> {
        let source = if case_insensitive {
            format!("(?i){}", pattern)
        } else {
            pattern.to_string()
        };
        let compiled = Regex::new(&source)
            .map_err(|e| FerricError::InvalidQueryOperator(format!("bad $regex: {}", e)))?;
        Ok(RegexPredicate {
            pattern: pattern.to_string(),
            case_insensitive,
            compiled,
        })
    }

    /// Literal anchored prefix (`^abc...`) usable as an index range, if any.
    /// Case-insensitive patterns never qualify.
    pub fn literal_prefix(&self) -> Option<String> {
        if self.case_insensitive {
            return None;
        }
        let rest = self.pattern.strip_prefix('^')?;
        let mut prefix = String::new();
        for c in rest.chars() {
            if ".^$*+?()[]{}|\\".contains(c) {
                break;
            }
            prefix.push(c);
        }
        if prefix.is_empty() {
            None
        } else {
            Some(prefix)
        }
    }
}

const KNOWN_TYPE_NAMES: &[&str] = &[
    "minKey", "null", "long", "int", "double", "decimal", "number", "string", "binData",
    "objectId", "bool", "date", "array", "object", "maxKey",
];

impl Filter {
    /// Parse a filter document, e.g. `{"age": {"$gt": 25}, "active": true}`.
    pub fn parse(json: &serde_json::Value) -> Result<Filter> {
        let serde_json::Value::Object(map) = json else {
            return Err(FerricError::InvalidQueryOperator(
                "filter must be an object".into(),
            ));
        };

        let mut clauses = Vec::new();
        for (key, value) in map {
            if let Some(op) = key.strip_prefix('$') {
                let filters = Self::parse_filter_list(key, value)?;
                match op {
                    "and" => clauses.push(Filter::And(filters)),
                    "or" => clauses.push(Filter::Or(filters)),
                    "nor" => clauses.push(Filter::Nor(filters)),
                    _ => return Err(FerricError::InvalidQueryOperator(key.clone())),
                }
            } else {
                clauses.push(Self::parse_field(key, value)?);
            }
        }

        match clauses.len() {
            1 => Ok(clauses.pop().unwrap()),
            _ => Ok(Filter::And(clauses)),
        }
    }

    fn parse_filter_list(op: &str, value: &serde_json::Value) -> Result<Vec<Filter>> {
        let serde_json::Value::Array(items) = value else {
            return Err(FerricError::InvalidQueryOperator(format!(
                "{} requires an array",
                op
            )));
        };
        if items.is_empty() {
            return Err(FerricError::InvalidQueryOperator(format!(
                "{} requires a non-empty array",
                op
            )));
        }
        items.iter().map(Filter::parse).collect()
    }

    fn parse_field(path: &str, value: &serde_json::Value) -> Result<Filter> {
        let predicates = match value {
            serde_json::Value::Object(map)
                if map.keys().any(|k| k.starts_with('$'))
                    && !crate::value::is_extended_literal(map) =>
            {
                if !map.keys().all(|k| k.starts_with('$')) {
                    return Err(FerricError::InvalidQueryOperator(format!(
                        "cannot mix operators and literal fields in condition on '{}'",
                        path
                    )));
                }
                Self::parse_predicates(map)?
            }
            other => vec![Predicate::Eq(Value::from_json(other)?)],
        };
        Ok(Filter::Field {
            path: path.to_string(),
            predicates,
        })
    }

    fn parse_predicates(
        map: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<Predicate>> {
        let mut predicates = Vec::new();
        for (op, operand) in map {
            if op == "$options" {
                continue; // consumed alongside $regex
            }
            predicates.push(Self::parse_predicate(op, operand, map)?);
        }
        if predicates.is_empty() {
            return Err(FerricError::InvalidQueryOperator(
                "empty operator object".into(),
            ));
        }
        Ok(predicates)
    }

    fn parse_predicate(
        op: &str,
        operand: &serde_json::Value,
        siblings: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Predicate> {
        match op {
            "$eq" => Ok(Predicate::Eq(Value::from_json(operand)?)),
            "$ne" => Ok(Predicate::Ne(Value::from_json(operand)?)),
            "$gt" => Ok(Predicate::Gt(Value::from_json(operand)?)),
            "$gte" => Ok(Predicate::Gte(Value::from_json(operand)?)),
            "$lt" => Ok(Predicate::Lt(Value::from_json(operand)?)),
            "$lte" => Ok(Predicate::Lte(Value::from_json(operand)?)),
            "$in" => Ok(Predicate::In(Self::parse_value_list(op, operand)?)),
            "$nin" => Ok(Predicate::Nin(Self::parse_value_list(op, operand)?)),
            "$exists" => match operand {
                serde_json::Value::Bool(b) => Ok(Predicate::Exists(*b)),
                _ => Err(FerricError::InvalidQueryOperator(
                    "$exists requires a boolean".into(),
                )),
            },
            "$type" => match operand.as_str() {
                Some(name) if KNOWN_TYPE_NAMES.contains(&name) => {
                    Ok(Predicate::Type(name.to_string()))
                }
                Some(name) => Err(FerricError::InvalidQueryOperator(format!(
                    "unknown $type name '{}'",
                    name
                ))),
                None => Err(FerricError::InvalidQueryOperator(
                    "$type requires a type name string".into(),
                )),
            },
            "$size" => match operand.as_u64() {
                Some(n) => Ok(Predicate::Size(n as usize)),
                None => Err(FerricError::InvalidQueryOperator(
                    "$size requires a non-negative integer".into(),
                )),
            },
            "$all" => Ok(Predicate::All(Self::parse_value_list(op, operand)?)),
            "$elemMatch" => {
                let serde_json::Value::Object(inner) = operand else {
                    return Err(FerricError::InvalidQueryOperator(
                        "$elemMatch requires an object".into(),
                    ));
                };
                if inner.keys().all(|k| k.starts_with('$')) && !inner.is_empty() {
                    Ok(Predicate::ElemMatch(ElemMatch::Predicates(
                        Self::parse_predicates(inner)?,
                    )))
                } else {
                    Ok(Predicate::ElemMatch(ElemMatch::Filter(Box::new(
                        Filter::parse(operand)?,
                    ))))
                }
            }
            "$regex" => {
                let Some(pattern) = operand.as_str() else {
                    return Err(FerricError::InvalidQueryOperator(
                        "$regex requires a string pattern".into(),
                    ));
                };
                let case_insensitive = siblings
                    .get("$options")
                    .and_then(|o| o.as_str())
                    .map(|o| o.contains('i'))
                    .unwrap_or(false);
                Ok(Predicate::Regex(RegexPredicate::new(
                    pattern,
                    case_insensitive,
                )?))
            }
            "$not" => {
                let serde_json::Value::Object(inner) = operand else {
                    return Err(FerricError::InvalidQueryOperator(
                        "$not requires an operator object".into(),
                    ));
                };
                if !inner.keys().all(|k| k.starts_with('$')) {
                    return Err(FerricError::InvalidQueryOperator(
                        "$not requires an operator object".into(),
                    ));
                }
                Ok(Predicate::Not(Self::parse_predicates(inner)?))
            }
            _ => Err(FerricError::InvalidQueryOperator(op.to_string())),
        }
    }

    fn parse_value_list(op: &str, operand: &serde_json::Value) -> Result<Vec<Value>> {
        let serde_json::Value::Array(items) = operand else {
            return Err(FerricError::InvalidQueryOperator(format!(
                "{} requires an array",
                op
            )));
        };
        items.iter().map(Value::from_json).collect()
    }

    /// Whether a document satisfies this filter.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::And(clauses) => clauses.iter().all(|c| c.matches(doc)),
            Filter::Or(clauses) => clauses.iter().any(|c| c.matches(doc)),
            Filter::Nor(clauses) => !clauses.iter().any(|c| c.matches(doc)),
            Filter::Field { path, predicates } => {
                let values = doc.resolve_path_values(path);
                predicates.iter().all(|p| p.matches_field(&values))
            }
        }
    }

    /// Conjunctive per-field constraints usable for index selection.
    /// Only the top-level conjunction is considered; `$or`/`$nor` branches
    /// are opaque to the planner and fall back to scans.
    pub fn index_constraints(&self) -> Vec<FieldConstraint> {
        let mut out = Vec::new();
        self.collect_constraints(&mut out);
        out
    }

    fn collect_constraints(&self, out: &mut Vec<FieldConstraint>) {
        match self {
            Filter::And(clauses) => {
                for clause in clauses {
                    clause.collect_constraints(out);
                }
            }
            Filter::Field { path, predicates } => {
                let mut constraint = FieldConstraint::new(path.clone());
                for predicate in predicates {
                    match predicate {
                        Predicate::Eq(v) => constraint.eq = Some(v.clone()),
                        Predicate::Gt(v) => constraint.set_min(v.clone(), false),
                        Predicate::Gte(v) => constraint.set_min(v.clone(), true),
                        Predicate::Lt(v) => constraint.set_max(v.clone(), false),
                        Predicate::Lte(v) => constraint.set_max(v.clone(), true),
                        Predicate::In(values) if !values.is_empty() => {
                            constraint.in_set = Some(values.clone())
                        }
                        Predicate::Regex(re) => {
                            if let Some(prefix) = re.literal_prefix() {
                                // [prefix, prefix + U+10FFFF) brackets every
                                // string starting with the literal prefix.
                                let mut end = prefix.clone();
                                end.push('\u{10FFFF}');
                                constraint.set_min(Value::String(prefix), true);
                                constraint.set_max(Value::String(end), false);
                            }
                        }
                        _ => {}
                    }
                }
                if constraint.is_sargable() {
                    out.push(constraint);
                }
            }
            Filter::Or(_) | Filter::Nor(_) => {}
        }
    }
}

/// Range/equality constraint on one field, distilled for the planner.
#[derive(Debug, Clone)]
pub struct FieldConstraint {
    pub path: String,
    pub eq: Option<Value>,
    pub min: Option<(Value, bool)>,
    pub max: Option<(Value, bool)>,
    pub in_set: Option<Vec<Value>>,
}

impl FieldConstraint {
    fn new(path: String) -> Self {
        FieldConstraint {
            path,
            eq: None,
            min: None,
            max: None,
            in_set: None,
        }
    }

    fn set_min(&mut self, value: Value, inclusive: bool) {
        let tighter = match &self.min {
            Some((current, _)) => value.compare(current) == Ordering::Greater,
            None => true,
        };
        if tighter {
            self.min = Some((value, inclusive));
        }
    }

    fn set_max(&mut self, value: Value, inclusive: bool) {
        let tighter = match &self.max {
            Some((current, _)) => value.compare(current) == Ordering::Less,
            None => true,
        };
        if tighter {
            self.max = Some((value, inclusive));
        }
    }

    fn is_sargable(&self) -> bool {
        self.eq.is_some() || self.min.is_some() || self.max.is_some() || self.in_set.is_some()
    }
}

impl Predicate {
    /// Evaluate against every value the field path resolved to. An empty
    /// slice means the field is missing.
    fn matches_field(&self, values: &[&Value]) -> bool {
        match self {
            Predicate::Eq(target) => {
                if values.is_empty() && matches!(target, Value::Null) {
                    return true; // {field: null} matches a missing field
                }
                leaf_candidates(values).into_iter().any(|v| v == target)
            }
            Predicate::Ne(target) => !Predicate::Eq(target.clone()).matches_field(values),
            Predicate::Gt(target) => compare_match(values, target, |o| o == Ordering::Greater),
            Predicate::Gte(target) => {
                compare_match(values, target, |o| o != Ordering::Less)
            }
            Predicate::Lt(target) => compare_match(values, target, |o| o == Ordering::Less),
            Predicate::Lte(target) => {
                compare_match(values, target, |o| o != Ordering::Greater)
            }
            Predicate::In(targets) => {
                if values.is_empty() && targets.iter().any(|t| matches!(t, Value::Null)) {
                    return true;
                }
                leaf_candidates(values)
                    .into_iter()
                    .any(|v| targets.iter().any(|t| v == t))
            }
            Predicate::Nin(targets) => {
                !Predicate::In(targets.clone()).matches_field(values)
            }
            Predicate::Exists(should_exist) => !values.is_empty() == *should_exist,
            Predicate::Type(name) => leaf_candidates(values).into_iter().any(|v| {
                match name.as_str() {
                    "number" => v.is_number(),
                    "long" | "int" => matches!(v, Value::Int64(_)),
                    other => v.type_name() == other,
                }
            }),
            Predicate::Size(n) => values
                .iter()
                .any(|v| matches!(v, Value::Array(items) if items.len() == *n)),
            Predicate::All(targets) => {
                if targets.is_empty() {
                    return false;
                }
                let candidates = leaf_candidates(values);
                targets
                    .iter()
                    .all(|t| candidates.iter().any(|v| *v == t))
            }
            Predicate::ElemMatch(spec) => values.iter().any(|v| match v {
                Value::Array(items) => items.iter().any(|element| match spec {
                    ElemMatch::Predicates(preds) => {
                        let single = [element];
                        preds.iter().all(|p| p.matches_field(&single))
                    }
                    ElemMatch::Filter(filter) => match element {
                        Value::Document(doc) => filter.matches(doc),
                        _ => false,
                    },
                }),
                _ => false,
            }),
            Predicate::Regex(re) => leaf_candidates(values)
                .into_iter()
                .any(|v| matches!(v, Value::String(s) if re.compiled.is_match(s))),
            Predicate::Not(preds) => !preds.iter().all(|p| p.matches_field(values)),
        }
    }
}

/// Resolved values plus the elements of resolved arrays: a comparison on
/// an array field matches when any element matches.
fn leaf_candidates<'a>(values: &[&'a Value]) -> Vec<&'a Value> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        out.push(*value);
        if let Value::Array(items) = value {
            out.extend(items.iter());
        }
    }
    out
}

/// Ordered comparisons only match within the same type class; a string
/// field compared against a number yields no match rather than an error.
fn compare_match(values: &[&Value], target: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    leaf_candidates(values)
        .into_iter()
        .filter(|v| v.type_class() == target.type_class())
        .any(|v| accept(v.compare(target)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: serde_json::Value) -> Document {
        Document::from_json(&json).unwrap()
    }

    fn filter(json: serde_json::Value) -> Filter {
        Filter::parse(&json).unwrap()
    }

    #[test]
    fn test_implicit_equality() {
        let f = filter(serde_json::json!({"name": "Alice"}));
        assert!(f.matches(&doc(serde_json::json!({"name": "Alice"}))));
        assert!(!f.matches(&doc(serde_json::json!({"name": "Bob"}))));
        assert!(!f.matches(&doc(serde_json::json!({}))));
    }

    #[test]
    fn test_comparison_operators() {
        let f = filter(serde_json::json!({"age": {"$gte": 18, "$lt": 65}}));
        assert!(f.matches(&doc(serde_json::json!({"age": 18}))));
        assert!(f.matches(&doc(serde_json::json!({"age": 40}))));
        assert!(!f.matches(&doc(serde_json::json!({"age": 65}))));
        assert!(!f.matches(&doc(serde_json::json!({"age": 17}))));
    }

    #[test]
    fn test_type_mismatch_yields_no_match() {
        let f = filter(serde_json::json!({"age": {"$gt": 25}}));
        // String field vs numeric literal: no match, no error.
        assert!(!f.matches(&doc(serde_json::json!({"age": "old"}))));
    }

    #[test]
    fn test_in_nin() {
        let f = filter(serde_json::json!({"city": {"$in": ["NYC", "LA"]}}));
        assert!(f.matches(&doc(serde_json::json!({"city": "NYC"}))));
        assert!(!f.matches(&doc(serde_json::json!({"city": "Chicago"}))));

        let f = filter(serde_json::json!({"city": {"$nin": ["NYC"]}}));
        assert!(!f.matches(&doc(serde_json::json!({"city": "NYC"}))));
        assert!(f.matches(&doc(serde_json::json!({"city": "LA"}))));
        assert!(f.matches(&doc(serde_json::json!({}))));
    }

    #[test]
    fn test_logical_operators() {
        let f = filter(serde_json::json!({
            "$or": [{"age": {"$lt": 18}}, {"age": {"$gt": 65}}]
        }));
        assert!(f.matches(&doc(serde_json::json!({"age": 10}))));
        assert!(f.matches(&doc(serde_json::json!({"age": 70}))));
        assert!(!f.matches(&doc(serde_json::json!({"age": 30}))));

        let f = filter(serde_json::json!({
            "$nor": [{"status": "deleted"}, {"status": "archived"}]
        }));
        assert!(f.matches(&doc(serde_json::json!({"status": "active"}))));
        assert!(!f.matches(&doc(serde_json::json!({"status": "deleted"}))));
    }

    #[test]
    fn test_field_level_not() {
        let f = filter(serde_json::json!({"age": {"$not": {"$gt": 30}}}));
        assert!(f.matches(&doc(serde_json::json!({"age": 20}))));
        assert!(!f.matches(&doc(serde_json::json!({"age": 40}))));
        // Missing field: $not matches.
        assert!(f.matches(&doc(serde_json::json!({}))));
    }

    #[test]
    fn test_exists_and_type() {
        let f = filter(serde_json::json!({"email": {"$exists": true}}));
        assert!(f.matches(&doc(serde_json::json!({"email": "a@x.io"}))));
        assert!(!f.matches(&doc(serde_json::json!({}))));

        let f = filter(serde_json::json!({"age": {"$type": "number"}}));
        assert!(f.matches(&doc(serde_json::json!({"age": 1.5}))));
        assert!(!f.matches(&doc(serde_json::json!({"age": "x"}))));
    }

    #[test]
    fn test_array_implicit_element_match() {
        let f = filter(serde_json::json!({"tags": "red"}));
        assert!(f.matches(&doc(serde_json::json!({"tags": ["red", "blue"]}))));
        assert!(!f.matches(&doc(serde_json::json!({"tags": ["green"]}))));
    }

    #[test]
    fn test_size_and_all() {
        let f = filter(serde_json::json!({"tags": {"$size": 2}}));
        assert!(f.matches(&doc(serde_json::json!({"tags": ["a", "b"]}))));
        assert!(!f.matches(&doc(serde_json::json!({"tags": ["a"]}))));

        let f = filter(serde_json::json!({"tags": {"$all": ["a", "b"]}}));
        assert!(f.matches(&doc(serde_json::json!({"tags": ["b", "c", "a"]}))));
        assert!(!f.matches(&doc(serde_json::json!({"tags": ["a", "c"]}))));
    }

    #[test]
    fn test_elem_match_document_form() {
        let f = filter(serde_json::json!({
            "orders": {"$elemMatch": {"qty": {"$gt": 3}, "sku": "a1"}}
        }));
        assert!(f.matches(&doc(serde_json::json!({
            "orders": [{"sku": "a1", "qty": 5}, {"sku": "b2", "qty": 1}]
        }))));
        // qty>3 and sku=a1 must hold on the same element.
        assert!(!f.matches(&doc(serde_json::json!({
            "orders": [{"sku": "a1", "qty": 1}, {"sku": "b2", "qty": 5}]
        }))));
    }

    #[test]
    fn test_elem_match_predicate_form() {
        let f = filter(serde_json::json!({"scores": {"$elemMatch": {"$gte": 90}}}));
        assert!(f.matches(&doc(serde_json::json!({"scores": [50, 92]}))));
        assert!(!f.matches(&doc(serde_json::json!({"scores": [50, 60]}))));
    }

    #[test]
    fn test_regex() {
        let f = filter(serde_json::json!({"name": {"$regex": "^Al"}}));
        assert!(f.matches(&doc(serde_json::json!({"name": "Alice"}))));
        assert!(!f.matches(&doc(serde_json::json!({"name": "Bob"}))));

        let f = filter(serde_json::json!({"name": {"$regex": "ali", "$options": "i"}}));
        assert!(f.matches(&doc(serde_json::json!({"name": "ALICE"}))));
    }

    #[test]
    fn test_null_matches_missing() {
        let f = filter(serde_json::json!({"nickname": null}));
        assert!(f.matches(&doc(serde_json::json!({}))));
        assert!(f.matches(&doc(serde_json::json!({"nickname": null}))));
        assert!(!f.matches(&doc(serde_json::json!({"nickname": "Al"}))));
    }

    #[test]
    fn test_nested_path() {
        let f = filter(serde_json::json!({"address.city": "NYC"}));
        assert!(f.matches(&doc(serde_json::json!({"address": {"city": "NYC"}}))));
        assert!(!f.matches(&doc(serde_json::json!({"address": {"city": "LA"}}))));
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let err = Filter::parse(&serde_json::json!({"age": {"$gte2": 5}})).unwrap_err();
        assert!(matches!(err, FerricError::InvalidQueryOperator(_)));

        let err = Filter::parse(&serde_json::json!({"$xor": []})).unwrap_err();
        assert!(matches!(err, FerricError::InvalidQueryOperator(_)));
    }

    #[test]
    fn test_embedded_document_exact_match() {
        let f = filter(serde_json::json!({"address": {"city": "NYC"}}));
        assert!(f.matches(&doc(serde_json::json!({"address": {"city": "NYC"}}))));
        // Exact match: extra fields break it.
        assert!(!f.matches(&doc(serde_json::json!({"address": {"city": "NYC", "zip": "1"}}))));
    }

    #[test]
    fn test_index_constraints_extraction() {
        let f = filter(serde_json::json!({"age": {"$gte": 18, "$lt": 65}, "city": "NYC"}));
        let constraints = f.index_constraints();
        assert_eq!(constraints.len(), 2);

        let age = constraints.iter().find(|c| c.path == "age").unwrap();
        assert_eq!(age.min, Some((Value::Int64(18), true)));
        assert_eq!(age.max, Some((Value::Int64(65), false)));

        let city = constraints.iter().find(|c| c.path == "city").unwrap();
        assert_eq!(city.eq, Some(Value::String("NYC".into())));
    }

    #[test]
    fn test_or_branches_are_not_sargable() {
        let f = filter(serde_json::json!({"$or": [{"a": 1}, {"b": 2}]}));
        assert!(f.index_constraints().is_empty());
    }

    #[test]
    fn test_extended_literal_is_equality_not_operator() {
        let f = filter(serde_json::json!({"at": {"$date": 1700000000000i64}}));
        assert!(f.matches(&doc(serde_json::json!({"at": {"$date": 1700000000000i64}}))));
        assert!(!f.matches(&doc(serde_json::json!({"at": {"$date": 1}}))));

        // Wrappers also work as operator operands.
        let f = filter(serde_json::json!({"at": {"$lt": {"$date": 2000000000000i64}}}));
        assert!(f.matches(&doc(serde_json::json!({"at": {"$date": 1700000000000i64}}))));
    }

    #[test]
    fn test_regex_literal_prefix() {
        let re = RegexPredicate::new("^abc.*", false).unwrap();
        assert_eq!(re.literal_prefix(), Some("abc".to_string()));

        let re = RegexPredicate::new("abc", false).unwrap();
        assert_eq!(re.literal_prefix(), None);

        let re = RegexPredicate::new("^a", true).unwrap();
        assert_eq!(re.literal_prefix(), None);
    }
}
