// src/aggregation.rs
// Aggregation pipeline: lazily composed stages over a document stream

use ahash::AHashMap;

use crate::document::Document;
use crate::error::{FerricError, Result};
use crate::find_options::sort_documents;
use crate::query::Filter;
use crate::value::Value;

/// A lazy stream of pipeline documents.
pub type DocStream = Box<dyn Iterator<Item = Result<Document>> + Send>;

/// A validated pipeline. Parsing validates every stage up front; a
/// malformed pipeline never starts executing.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

#[derive(Debug, Clone)]
enum Stage {
    Match(Filter),
    Project(ProjectSpec),
    Group(GroupSpec),
    Sort(Vec<(String, i32)>),
    Unwind {
        path: String,
        preserve_null_and_empty: bool,
    },
    Limit(usize),
    Skip(usize),
}

impl Pipeline {
    pub fn parse(json: &serde_json::Value) -> Result<Self> {
        let serde_json::Value::Array(stages_json) = json else {
            return Err(FerricError::InvalidPipelineStage(
                "pipeline must be an array of stages".into(),
            ));
        };

        let mut stages = Vec::with_capacity(stages_json.len());
        for stage_json in stages_json {
            stages.push(Stage::parse(stage_json)?);
        }
        Ok(Pipeline { stages })
    }

    /// A leading `$match` filter, which the caller may push down into the
    /// access path. The stage still runs; re-filtering is cheap and keeps
    /// the pushdown an optimization rather than a correctness dependency.
    pub(crate) fn leading_match(&self) -> Option<&Filter> {
        match self.stages.first() {
            Some(Stage::Match(filter)) => Some(filter),
            _ => None,
        }
    }

    /// Chain every stage over the input stream. Streaming stages stay
    /// lazy; `$sort` and `$group` materialize when first pulled, bounded
    /// by `memory_limit`.
    pub fn execute(&self, input: DocStream, memory_limit: usize) -> DocStream {
        let mut stream = input;
        for stage in &self.stages {
            stream = stage.clone().apply(stream, memory_limit);
        }
        stream
    }
}

impl Stage {
    fn parse(json: &serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(map) = json else {
            return Err(FerricError::InvalidPipelineStage(
                "stage must be an object".into(),
            ));
        };
        if map.len() != 1 {
            return Err(FerricError::InvalidPipelineStage(
                "stage must have exactly one operator".into(),
            ));
        }
        let (name, spec) = map.iter().next().unwrap();

        match name.as_str() {
            "$match" => Ok(Stage::Match(Filter::parse(spec)?)),
            "$project" => Ok(Stage::Project(ProjectSpec::parse(spec)?)),
            "$group" => Ok(Stage::Group(GroupSpec::parse(spec)?)),
            "$sort" => {
                let sort = crate::find_options::parse_sort(spec)
                    .map_err(|e| FerricError::InvalidPipelineStage(e.to_string()))?;
                Ok(Stage::Sort(sort))
            }
            "$unwind" => match spec {
                serde_json::Value::String(path) => Ok(Stage::Unwind {
                    path: field_path(path)?,
                    preserve_null_and_empty: false,
                }),
                serde_json::Value::Object(opts) => {
                    let path = opts
                        .get("path")
                        .and_then(|p| p.as_str())
                        .ok_or_else(|| {
                            FerricError::InvalidPipelineStage("$unwind requires a path".into())
                        })?;
                    let preserve = opts
                        .get("preserveNullAndEmptyArrays")
                        .and_then(|p| p.as_bool())
                        .unwrap_or(false);
                    Ok(Stage::Unwind {
                        path: field_path(path)?,
                        preserve_null_and_empty: preserve,
                    })
                }
                _ => Err(FerricError::InvalidPipelineStage(
                    "$unwind requires a path".into(),
                )),
            },
            "$limit" => match spec.as_u64() {
                Some(n) => Ok(Stage::Limit(n as usize)),
                None => Err(FerricError::InvalidPipelineStage(
                    "$limit requires a non-negative integer".into(),
                )),
            },
            "$skip" => match spec.as_u64() {
                Some(n) => Ok(Stage::Skip(n as usize)),
                None => Err(FerricError::InvalidPipelineStage(
                    "$skip requires a non-negative integer".into(),
                )),
            },
            other => Err(FerricError::InvalidPipelineStage(format!(
                "unknown stage {}",
                other
            ))),
        }
    }

    fn apply(self, input: DocStream, memory_limit: usize) -> DocStream {
        match self {
            Stage::Match(filter) => Box::new(input.filter(move |item| match item {
                Ok(doc) => filter.matches(doc),
                Err(_) => true, // errors pass through to the consumer
            })),
            Stage::Project(spec) => {
                Box::new(input.map(move |item| item.map(|doc| spec.apply(&doc))))
            }
            Stage::Unwind {
                path,
                preserve_null_and_empty,
            } => Box::new(input.flat_map(move |item| match item {
                Ok(doc) => unwind_document(&doc, &path, preserve_null_and_empty)
                    .into_iter()
                    .map(Ok)
                    .collect::<Vec<_>>(),
                Err(e) => vec![Err(e)],
            })),
            Stage::Limit(n) => Box::new(input.take(n)),
            Stage::Skip(n) => Box::new(input.skip(n)),
            Stage::Sort(sort) => Box::new(Blocking::new(input, move |input| {
                let mut docs = Vec::new();
                let mut used = 0usize;
                for item in input {
                    let doc = item?;
                    used += doc.approx_size();
                    if used > memory_limit {
                        return Err(FerricError::ExceededMemoryLimit("$sort".into()));
                    }
                    docs.push(doc);
                }
                sort_documents(&mut docs, &sort);
                Ok(docs)
            })),
            Stage::Group(spec) => Box::new(Blocking::new(input, move |input| {
                spec.run(input, memory_limit)
            })),
        }
    }
}

/// A stage that must see its whole input before emitting anything.
/// Materialization happens on first pull, not at pipeline construction.
struct Blocking<F> {
    pending: Option<(DocStream, F)>,
    out: std::vec::IntoIter<Document>,
}

impl<F> Blocking<F>
where
    F: FnOnce(DocStream) -> Result<Vec<Document>> + Send,
{
    fn new(input: DocStream, f: F) -> Self {
        Blocking {
            pending: Some((input, f)),
            out: Vec::new().into_iter(),
        }
    }
}

impl<F> Iterator for Blocking<F>
where
    F: FnOnce(DocStream) -> Result<Vec<Document>> + Send,
{
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some((input, f)) = self.pending.take() {
            match f(input) {
                Ok(docs) => self.out = docs.into_iter(),
                Err(e) => return Some(Err(e)),
            }
        }
        self.out.next().map(Ok)
    }
}

fn field_path(raw: &str) -> Result<String> {
    raw.strip_prefix('$')
        .map(|p| p.to_string())
        .ok_or_else(|| {
            FerricError::InvalidPipelineStage(format!("field path must start with '$': {}", raw))
        })
}

fn unwind_document(doc: &Document, path: &str, preserve: bool) -> Vec<Document> {
    match doc.get_path(path) {
        Some(Value::Array(items)) if !items.is_empty() => items
            .clone()
            .into_iter()
            .map(|element| {
                let mut out = doc.clone();
                // Substitute the element in place; the path exists.
                let _ = out.set_path(path, element);
                out
            })
            .collect(),
        Some(Value::Array(_)) => {
            // Empty array: dropped unless preserved, then emitted without
            // the field.
            if preserve {
                let mut out = doc.clone();
                out.remove_path(path);
                vec![out]
            } else {
                Vec::new()
            }
        }
        Some(Value::Null) | None => {
            if preserve {
                vec![doc.clone()]
            } else {
                Vec::new()
            }
        }
        // A non-array value unwinds to itself.
        Some(_) => vec![doc.clone()],
    }
}

// ===== $project =====

#[derive(Debug, Clone)]
enum ProjectItem {
    Include,
    Computed(Expr),
}

#[derive(Debug, Clone)]
struct ProjectSpec {
    /// None = exclusion mode
    items: Option<Vec<(String, ProjectItem)>>,
    excludes: Vec<String>,
    id_excluded: bool,
}

impl ProjectSpec {
    fn parse(json: &serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(map) = json else {
            return Err(FerricError::InvalidPipelineStage(
                "$project requires an object".into(),
            ));
        };
        if map.is_empty() {
            return Err(FerricError::InvalidPipelineStage(
                "$project spec is empty".into(),
            ));
        }

        let mut includes: Vec<(String, ProjectItem)> = Vec::new();
        let mut excludes: Vec<String> = Vec::new();
        let mut id_excluded = false;

        for (field, value) in map {
            match value.as_i64() {
                Some(1) => includes.push((field.clone(), ProjectItem::Include)),
                Some(0) => {
                    if field == "_id" {
                        id_excluded = true;
                    } else {
                        excludes.push(field.clone());
                    }
                }
                _ => includes.push((field.clone(), ProjectItem::Computed(Expr::parse(value)?))),
            }
        }

        if !includes.is_empty() && !excludes.is_empty() {
            return Err(FerricError::InvalidPipelineStage(
                "$project cannot mix inclusion and exclusion (except _id)".into(),
            ));
        }

        Ok(ProjectSpec {
            items: if includes.is_empty() {
                None
            } else {
                Some(includes)
            },
            excludes,
            id_excluded,
        })
    }

    fn apply(&self, doc: &Document) -> Document {
        match &self.items {
            Some(items) => {
                let mut out = Document::new();
                if !self.id_excluded {
                    if let Some(id) = doc.get("_id") {
                        out.set("_id", id.clone());
                    }
                }
                for (field, item) in items {
                    match item {
                        ProjectItem::Include => {
                            if let Some(value) = doc.get_path(field) {
                                let _ = out.set_path(field, value.clone());
                            }
                        }
                        ProjectItem::Computed(expr) => {
                            let _ = out.set_path(field, expr.eval(doc));
                        }
                    }
                }
                out
            }
            None => {
                let mut out = doc.clone();
                for field in &self.excludes {
                    out.remove_path(field);
                }
                if self.id_excluded {
                    out.remove("_id");
                }
                out
            }
        }
    }
}

// ===== $group =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccOp {
    Sum,
    Avg,
    Min,
    Max,
    Push,
}

#[derive(Debug, Clone)]
struct GroupSpec {
    id: Expr,
    accumulators: Vec<(String, AccOp, Expr)>,
}

impl GroupSpec {
    fn parse(json: &serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(map) = json else {
            return Err(FerricError::InvalidPipelineStage(
                "$group requires an object".into(),
            ));
        };
        let id_json = map.get("_id").ok_or_else(|| {
            FerricError::InvalidPipelineStage("$group requires an _id expression".into())
        })?;
        let id = Expr::parse(id_json)?;

        let mut accumulators = Vec::new();
        for (field, spec) in map {
            if field == "_id" {
                continue;
            }
            let serde_json::Value::Object(inner) = spec else {
                return Err(FerricError::InvalidPipelineStage(format!(
                    "accumulator for '{}' must be an object",
                    field
                )));
            };
            if inner.len() != 1 {
                return Err(FerricError::InvalidPipelineStage(format!(
                    "accumulator for '{}' must have exactly one operator",
                    field
                )));
            }
            let (op_name, expr_json) = inner.iter().next().unwrap();
            let op = match op_name.as_str() {
                "$sum" => AccOp::Sum,
                "$avg" => AccOp::Avg,
                "$min" => AccOp::Min,
                "$max" => AccOp::Max,
                "$push" => AccOp::Push,
                other => {
                    return Err(FerricError::InvalidPipelineStage(format!(
                        "unknown accumulator {}",
                        other
                    )))
                }
            };
            accumulators.push((field.clone(), op, Expr::parse(expr_json)?));
        }

        Ok(GroupSpec { id, accumulators })
    }

    fn run(&self, input: DocStream, memory_limit: usize) -> Result<Vec<Document>> {
        struct GroupState {
            key: Value,
            accs: Vec<AccState>,
        }

        let mut groups: AHashMap<String, GroupState> = AHashMap::new();
        let mut used = 0usize;

        for item in input {
            let doc = item?;
            let key_value = self.id.eval(&doc);
            let key = canonical_group_key(&key_value);

            let new_group_size = 64 + key.len() + key_value.approx_size();
            let accumulators = &self.accumulators;
            let state = groups.entry(key).or_insert_with(|| {
                used += new_group_size;
                GroupState {
                    key: key_value,
                    accs: accumulators
                        .iter()
                        .map(|(_, op, _)| AccState::new(*op))
                        .collect(),
                }
            });

            for (i, (_, _, expr)) in self.accumulators.iter().enumerate() {
                let value = expr.eval(&doc);
                used += state.accs[i].update(value);
            }

            if used > memory_limit {
                return Err(FerricError::ExceededMemoryLimit("$group".into()));
            }
        }

        // Incremental state folds into one output document per group.
        let mut out = Vec::with_capacity(groups.len());
        for (_, state) in groups {
            let mut doc = Document::new();
            doc.set("_id", state.key);
            for ((name, _, _), acc) in self.accumulators.iter().zip(state.accs) {
                doc.set(name.clone(), acc.finish());
            }
            out.push(doc);
        }
        Ok(out)
    }
}

/// Running numeric state: integers stay integral until a float shows up.
#[derive(Debug, Clone, Copy, Default)]
struct NumAcc {
    int_sum: i64,
    float_sum: f64,
    saw_float: bool,
    count: u64,
}

impl NumAcc {
    fn add(&mut self, value: &Value) {
        match value {
            Value::Int64(i) => {
                self.int_sum = self.int_sum.wrapping_add(*i);
                self.count += 1;
            }
            Value::Float64(f) => {
                self.float_sum += f;
                self.saw_float = true;
                self.count += 1;
            }
            Value::Decimal128(d) => {
                self.float_sum += d.to_f64();
                self.saw_float = true;
                self.count += 1;
            }
            _ => {} // non-numeric values are ignored by numeric accumulators
        }
    }

    fn total(&self) -> Value {
        if self.saw_float {
            Value::Float64(self.float_sum + self.int_sum as f64)
        } else {
            Value::Int64(self.int_sum)
        }
    }
}

#[derive(Debug)]
enum AccState {
    Sum(NumAcc),
    Avg(NumAcc),
    Min(Option<Value>),
    Max(Option<Value>),
    Push(Vec<Value>),
}

impl AccState {
    fn new(op: AccOp) -> Self {
        match op {
            AccOp::Sum => AccState::Sum(NumAcc::default()),
            AccOp::Avg => AccState::Avg(NumAcc::default()),
            AccOp::Min => AccState::Min(None),
            AccOp::Max => AccState::Max(None),
            AccOp::Push => AccState::Push(Vec::new()),
        }
    }

    /// Fold one value in; returns the approximate bytes newly retained.
    fn update(&mut self, value: Value) -> usize {
        match self {
            AccState::Sum(acc) | AccState::Avg(acc) => {
                acc.add(&value);
                0
            }
            AccState::Min(slot) => {
                if !matches!(value, Value::Null) {
                    let replace = slot.as_ref().map_or(true, |current| value < *current);
                    if replace {
                        *slot = Some(value);
                    }
                }
                0
            }
            AccState::Max(slot) => {
                if !matches!(value, Value::Null) {
                    let replace = slot.as_ref().map_or(true, |current| value > *current);
                    if replace {
                        *slot = Some(value);
                    }
                }
                0
            }
            AccState::Push(items) => {
                let size = value.approx_size();
                items.push(value);
                size
            }
        }
    }

    fn finish(self) -> Value {
        match self {
            AccState::Sum(acc) => acc.total(),
            AccState::Avg(acc) => {
                if acc.count == 0 {
                    Value::Null
                } else {
                    let total = match acc.total() {
                        Value::Int64(i) => i as f64,
                        Value::Float64(f) => f,
                        _ => unreachable!(),
                    };
                    Value::Float64(total / acc.count as f64)
                }
            }
            AccState::Min(slot) | AccState::Max(slot) => slot.unwrap_or(Value::Null),
            AccState::Push(items) => Value::Array(items),
        }
    }
}

/// Group keys must coalesce numerically equal values (1 and 1.0 land in
/// the same bucket), so integral floats canonicalize to Int64.
fn canonical_group_key(value: &Value) -> String {
    let normalized = match value {
        Value::Float64(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            Value::Int64(*f as i64)
        }
        other => other.clone(),
    };
    serde_json::to_string(&normalized.to_json()).unwrap_or_else(|_| "null".to_string())
}

// ===== Expressions =====

/// Computed-expression evaluator used by `$project` and `$group`.
/// Evaluation is total: type mismatches yield Null rather than erroring,
/// matching the filter layer's no-error comparison semantics.
#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Value),
    FieldPath(String),
    Add(Vec<Expr>),
    Subtract(Box<Expr>, Box<Expr>),
    Multiply(Vec<Expr>),
    Divide(Box<Expr>, Box<Expr>),
    Concat(Vec<Expr>),
    Cond {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Size(Box<Expr>),
    ToUpper(Box<Expr>),
    ToLower(Box<Expr>),
}

impl Expr {
    pub(crate) fn parse(json: &serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::String(s) if s.starts_with('$') => {
                Ok(Expr::FieldPath(s[1..].to_string()))
            }
            serde_json::Value::Object(map)
                if map.len() == 1 && !crate::value::is_extended_literal(map) =>
            {
                let (op, operand) = map.iter().next().unwrap();
                match op.as_str() {
                    "$add" => Ok(Expr::Add(Self::parse_list(op, operand)?)),
                    "$subtract" => {
                        let [a, b] = Self::parse_pair(op, operand)?;
                        Ok(Expr::Subtract(Box::new(a), Box::new(b)))
                    }
                    "$multiply" => Ok(Expr::Multiply(Self::parse_list(op, operand)?)),
                    "$divide" => {
                        let [a, b] = Self::parse_pair(op, operand)?;
                        Ok(Expr::Divide(Box::new(a), Box::new(b)))
                    }
                    "$concat" => Ok(Expr::Concat(Self::parse_list(op, operand)?)),
                    "$cond" => Self::parse_cond(operand),
                    "$size" => Ok(Expr::Size(Box::new(Expr::parse(operand)?))),
                    "$toUpper" => Ok(Expr::ToUpper(Box::new(Expr::parse(operand)?))),
                    "$toLower" => Ok(Expr::ToLower(Box::new(Expr::parse(operand)?))),
                    "$literal" => Ok(Expr::Literal(Value::from_json(operand)?)),
                    other if other.starts_with('$') => Err(FerricError::InvalidPipelineStage(
                        format!("unknown expression operator {}", other),
                    )),
                    _ => Ok(Expr::Literal(Value::from_json(json)?)),
                }
            }
            other => Ok(Expr::Literal(Value::from_json(other)?)),
        }
    }

    fn parse_list(op: &str, operand: &serde_json::Value) -> Result<Vec<Expr>> {
        let serde_json::Value::Array(items) = operand else {
            return Err(FerricError::InvalidPipelineStage(format!(
                "{} requires an array",
                op
            )));
        };
        items.iter().map(Expr::parse).collect()
    }

    fn parse_pair(op: &str, operand: &serde_json::Value) -> Result<[Expr; 2]> {
        let mut list = Self::parse_list(op, operand)?;
        if list.len() != 2 {
            return Err(FerricError::InvalidPipelineStage(format!(
                "{} requires exactly two operands",
                op
            )));
        }
        let b = list.pop().unwrap();
        let a = list.pop().unwrap();
        Ok([a, b])
    }

    fn parse_cond(operand: &serde_json::Value) -> Result<Expr> {
        let (condition, then, otherwise) = match operand {
            serde_json::Value::Array(items) if items.len() == 3 => {
                (Expr::parse(&items[0])?, Expr::parse(&items[1])?, Expr::parse(&items[2])?)
            }
            serde_json::Value::Object(map) => {
                let get = |key: &str| {
                    map.get(key).ok_or_else(|| {
                        FerricError::InvalidPipelineStage(format!("$cond requires '{}'", key))
                    })
                };
                (
                    Expr::parse(get("if")?)?,
                    Expr::parse(get("then")?)?,
                    Expr::parse(get("else")?)?,
                )
            }
            _ => {
                return Err(FerricError::InvalidPipelineStage(
                    "$cond requires [if, then, else] or {if, then, else}".into(),
                ))
            }
        };
        Ok(Expr::Cond {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    pub(crate) fn eval(&self, doc: &Document) -> Value {
        match self {
            Expr::Literal(value) => value.clone(),
            Expr::FieldPath(path) => doc.get_path(path).cloned().unwrap_or(Value::Null),
            Expr::Add(operands) => {
                let mut acc = NumAcc::default();
                for operand in operands {
                    let value = operand.eval(doc);
                    if !value.is_number() {
                        return Value::Null;
                    }
                    acc.add(&value);
                }
                acc.total()
            }
            Expr::Multiply(operands) => {
                let mut int_product: i64 = 1;
                let mut float_product: f64 = 1.0;
                let mut saw_float = false;
                for operand in operands {
                    match operand.eval(doc) {
                        Value::Int64(i) => int_product = int_product.wrapping_mul(i),
                        Value::Float64(f) => {
                            float_product *= f;
                            saw_float = true;
                        }
                        Value::Decimal128(d) => {
                            float_product *= d.to_f64();
                            saw_float = true;
                        }
                        _ => return Value::Null,
                    }
                }
                if saw_float {
                    Value::Float64(float_product * int_product as f64)
                } else {
                    Value::Int64(int_product)
                }
            }
            Expr::Subtract(a, b) => {
                match (a.eval(doc), b.eval(doc)) {
                    (Value::Int64(x), Value::Int64(y)) => Value::Int64(x.wrapping_sub(y)),
                    (x, y) => match (x.as_f64(), y.as_f64()) {
                        (Some(x), Some(y)) => Value::Float64(x - y),
                        _ => Value::Null,
                    },
                }
            }
            Expr::Divide(a, b) => match (a.eval(doc).as_f64(), b.eval(doc).as_f64()) {
                (Some(_), Some(y)) if y == 0.0 => Value::Null,
                (Some(x), Some(y)) => Value::Float64(x / y),
                _ => Value::Null,
            },
            Expr::Concat(operands) => {
                let mut out = String::new();
                for operand in operands {
                    match operand.eval(doc) {
                        Value::String(s) => out.push_str(&s),
                        _ => return Value::Null,
                    }
                }
                Value::String(out)
            }
            Expr::Cond {
                condition,
                then,
                otherwise,
            } => {
                if is_truthy(&condition.eval(doc)) {
                    then.eval(doc)
                } else {
                    otherwise.eval(doc)
                }
            }
            Expr::Size(operand) => match operand.eval(doc) {
                Value::Array(items) => Value::Int64(items.len() as i64),
                _ => Value::Null,
            },
            Expr::ToUpper(operand) => match operand.eval(doc) {
                Value::String(s) => Value::String(s.to_uppercase()),
                _ => Value::String(String::new()),
            },
            Expr::ToLower(operand) => match operand.eval(doc) {
                Value::String(s) => Value::String(s.to_lowercase()),
                _ => Value::String(String::new()),
            },
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    !matches!(
        value,
        Value::Null | Value::Bool(false) | Value::Int64(0)
    ) && !matches!(value, Value::Float64(f) if *f == 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(docs: Vec<serde_json::Value>) -> DocStream {
        Box::new(
            docs.into_iter()
                .map(|json| Document::from_json(&json))
                .collect::<Vec<_>>()
                .into_iter(),
        )
    }

    fn run(pipeline: serde_json::Value, docs: Vec<serde_json::Value>) -> Vec<serde_json::Value> {
        let pipeline = Pipeline::parse(&pipeline).unwrap();
        pipeline
            .execute(stream(docs), usize::MAX)
            .collect::<Result<Vec<_>>>()
            .unwrap()
            .iter()
            .map(Document::to_json)
            .collect()
    }

    #[test]
    fn test_match_stage() {
        let out = run(
            serde_json::json!([{"$match": {"age": {"$gte": 30}}}]),
            vec![
                serde_json::json!({"name": "Alice", "age": 25}),
                serde_json::json!({"name": "Bob", "age": 30}),
                serde_json::json!({"name": "Carol", "age": 35}),
            ],
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["name"], "Bob");
    }

    #[test]
    fn test_group_sum_by_category() {
        let mut out = run(
            serde_json::json!([
                {"$group": {"_id": "$category", "total": {"$sum": "$amount"}}}
            ]),
            vec![
                serde_json::json!({"category": "x", "amount": 5}),
                serde_json::json!({"category": "x", "amount": 3}),
                serde_json::json!({"category": "y", "amount": 2}),
            ],
        );
        out.sort_by_key(|d| d["_id"].as_str().unwrap().to_string());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["_id"], "x");
        assert_eq!(out[0]["total"], 8);
        assert_eq!(out[1]["_id"], "y");
        assert_eq!(out[1]["total"], 2);
    }

    #[test]
    fn test_group_count_and_avg() {
        let mut out = run(
            serde_json::json!([
                {"$group": {"_id": "$city", "n": {"$sum": 1}, "avgAge": {"$avg": "$age"}}}
            ]),
            vec![
                serde_json::json!({"city": "NYC", "age": 20}),
                serde_json::json!({"city": "NYC", "age": 40}),
                serde_json::json!({"city": "LA", "age": 30}),
            ],
        );
        out.sort_by_key(|d| d["_id"].as_str().unwrap().to_string());
        assert_eq!(out[1]["n"], 2);
        assert_eq!(out[1]["avgAge"], 30.0);
    }

    #[test]
    fn test_group_null_id_single_bucket() {
        let out = run(
            serde_json::json!([
                {"$group": {"_id": null, "total": {"$sum": "$v"}}}
            ]),
            vec![
                serde_json::json!({"v": 1}),
                serde_json::json!({"v": 2}),
            ],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["total"], 3);
    }

    #[test]
    fn test_group_min_max_push() {
        let out = run(
            serde_json::json!([
                {"$group": {
                    "_id": null,
                    "lo": {"$min": "$v"},
                    "hi": {"$max": "$v"},
                    "all": {"$push": "$v"}
                }}
            ]),
            vec![
                serde_json::json!({"v": 3}),
                serde_json::json!({"v": 1}),
                serde_json::json!({"v": 2}),
            ],
        );
        assert_eq!(out[0]["lo"], 1);
        assert_eq!(out[0]["hi"], 3);
        assert_eq!(out[0]["all"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_unwind() {
        let out = run(
            serde_json::json!([{"$unwind": "$tags"}]),
            vec![serde_json::json!({"_id": 1, "tags": ["a", "b"]})],
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["tags"], "a");
        assert_eq!(out[1]["tags"], "b");
        assert_eq!(out[0]["_id"], 1);
    }

    #[test]
    fn test_unwind_drops_empty_unless_preserved() {
        let docs = vec![
            serde_json::json!({"_id": 1, "tags": []}),
            serde_json::json!({"_id": 2}),
            serde_json::json!({"_id": 3, "tags": ["x"]}),
        ];

        let out = run(serde_json::json!([{"$unwind": "$tags"}]), docs.clone());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["_id"], 3);

        let out = run(
            serde_json::json!([
                {"$unwind": {"path": "$tags", "preserveNullAndEmptyArrays": true}}
            ]),
            docs,
        );
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_sort_limit_skip_pipeline() {
        let out = run(
            serde_json::json!([
                {"$sort": {"v": -1}},
                {"$skip": 1},
                {"$limit": 2}
            ]),
            vec![
                serde_json::json!({"v": 1}),
                serde_json::json!({"v": 4}),
                serde_json::json!({"v": 3}),
                serde_json::json!({"v": 2}),
            ],
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["v"], 3);
        assert_eq!(out[1]["v"], 2);
    }

    #[test]
    fn test_project_computed_expression() {
        let out = run(
            serde_json::json!([
                {"$project": {
                    "total": {"$multiply": ["$price", "$qty"]},
                    "label": {"$concat": ["$sku", "-x"]},
                    "_id": 0
                }}
            ]),
            vec![serde_json::json!({"_id": 1, "sku": "a", "price": 3, "qty": 4})],
        );
        assert_eq!(out[0]["total"], 12);
        assert_eq!(out[0]["label"], "a-x");
        assert!(out[0].get("_id").is_none());
    }

    #[test]
    fn test_cond_expression() {
        let out = run(
            serde_json::json!([
                {"$project": {
                    "band": {"$cond": {"if": {"$literal": true}, "then": "hi", "else": "lo"}}
                }}
            ]),
            vec![serde_json::json!({"_id": 1})],
        );
        assert_eq!(out[0]["band"], "hi");
    }

    #[test]
    fn test_unknown_stage_rejected_before_execution() {
        let err = Pipeline::parse(&serde_json::json!([{"$explode": {}}])).unwrap_err();
        assert!(matches!(err, FerricError::InvalidPipelineStage(_)));
    }

    #[test]
    fn test_unknown_expression_operator_rejected() {
        let err = Pipeline::parse(&serde_json::json!([
            {"$project": {"x": {"$frobnicate": []}}}
        ]))
        .unwrap_err();
        assert!(matches!(err, FerricError::InvalidPipelineStage(_)));
    }

    #[test]
    fn test_group_memory_ceiling() {
        let pipeline = Pipeline::parse(&serde_json::json!([
            {"$group": {"_id": "$k", "all": {"$push": "$payload"}}}
        ]))
        .unwrap();

        let docs: Vec<serde_json::Value> = (0..100)
            .map(|i| serde_json::json!({"k": i, "payload": "x".repeat(100)}))
            .collect();

        let result: Result<Vec<_>> = pipeline.execute(stream(docs), 1024).collect();
        assert!(matches!(
            result,
            Err(FerricError::ExceededMemoryLimit(_))
        ));
    }

    #[test]
    fn test_full_pipeline() {
        let out = run(
            serde_json::json!([
                {"$match": {"age": {"$gte": 25}}},
                {"$group": {"_id": "$city", "count": {"$sum": 1}}},
                {"$sort": {"count": -1}}
            ]),
            vec![
                serde_json::json!({"name": "Alice", "age": 25, "city": "NYC"}),
                serde_json::json!({"name": "Bob", "age": 30, "city": "LA"}),
                serde_json::json!({"name": "Carol", "age": 35, "city": "NYC"}),
                serde_json::json!({"name": "Dave", "age": 20, "city": "LA"}),
            ],
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["_id"], "NYC");
        assert_eq!(out[0]["count"], 2);
    }

    #[test]
    fn test_numeric_group_keys_coalesce() {
        let out = run(
            serde_json::json!([
                {"$group": {"_id": "$v", "n": {"$sum": 1}}}
            ]),
            vec![
                serde_json::json!({"v": 1}),
                serde_json::json!({"v": 1.0}),
            ],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["n"], 2);
    }
}
