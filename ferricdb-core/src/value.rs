// src/value.rs
// Typed value model with the total order used by indexes and sorts

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::{FerricError, Result};

/// A single field value. The variant set is a reduced BSON-like lattice.
///
/// Values have a strict total order:
/// MinKey < Null < numbers < String < Binary < ObjectId < Bool < DateTime
/// < Array < Document < MaxKey. Int64/Float64/Decimal128 compare against
/// each other by numeric value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    MinKey,
    Null,
    Int64(i64),
    Float64(f64),
    Decimal128(Decimal128),
    String(String),
    Binary(Vec<u8>),
    ObjectId(ObjectId),
    Bool(bool),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
    Array(Vec<Value>),
    Document(Document),
    MaxKey,
}

/// Type rank per the total order. Numbers share one rank.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::MinKey => 0,
        Value::Null => 1,
        Value::Int64(_) | Value::Float64(_) | Value::Decimal128(_) => 2,
        Value::String(_) => 3,
        Value::Binary(_) => 4,
        Value::ObjectId(_) => 5,
        Value::Bool(_) => 6,
        Value::DateTime(_) => 7,
        Value::Array(_) => 8,
        Value::Document(_) => 9,
        Value::MaxKey => 10,
    }
}

/// f64 comparison where NaN sorts below every other double and equals itself.
fn cmp_f64(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Cross-type numeric comparison.
fn compare_numeric(a: &Value, b: &Value) -> Ordering {
    use Value::*;
    match (a, b) {
        (Int64(x), Int64(y)) => x.cmp(y),
        (Float64(x), Float64(y)) => cmp_f64(*x, *y),
        (Decimal128(x), Decimal128(y)) => x.cmp(y),
        (Int64(x), Float64(y)) => cmp_f64(*x as f64, *y),
        (Float64(x), Int64(y)) => cmp_f64(*x, *y as f64),
        (Int64(x), Decimal128(y)) => crate::value::Decimal128::from_i64(*x).cmp(y),
        (Decimal128(x), Int64(y)) => x.cmp(&crate::value::Decimal128::from_i64(*y)),
        (Float64(x), Decimal128(y)) => cmp_f64(*x, y.to_f64()),
        (Decimal128(x), Float64(y)) => cmp_f64(x.to_f64(), *y),
        _ => unreachable!("compare_numeric called on non-numeric values"),
    }
}

impl Value {
    /// Total-order comparison per the value lattice.
    pub fn compare(&self, other: &Value) -> Ordering {
        let (ra, rb) = (type_rank(self), type_rank(other));
        if ra != rb {
            return ra.cmp(&rb);
        }

        use Value::*;
        match (self, other) {
            (MinKey, MinKey) | (Null, Null) | (MaxKey, MaxKey) => Ordering::Equal,
            (Int64(_) | Float64(_) | Decimal128(_), _) => compare_numeric(self, other),
            (String(a), String(b)) => a.cmp(b),
            (Binary(a), Binary(b)) => a.cmp(b),
            (ObjectId(a), ObjectId(b)) => a.cmp(b),
            (Bool(a), Bool(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (Array(a), Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let c = x.compare(y);
                    if c != Ordering::Equal {
                        return c;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Document(a), Document(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let c = ka.cmp(kb);
                    if c != Ordering::Equal {
                        return c;
                    }
                    let c = va.compare(vb);
                    if c != Ordering::Equal {
                        return c;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => unreachable!("equal type ranks with mismatched variants"),
        }
    }

    /// Rank of this value's type class in the total order. Values compare
    /// within a class; comparison operators in filters only match values
    /// of the same class (numbers form one class).
    pub(crate) fn type_class(&self) -> u8 {
        type_rank(self)
    }

    pub fn is_number(&self) -> bool {
        matches!(
            self,
            Value::Int64(_) | Value::Float64(_) | Value::Decimal128(_)
        )
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value as f64, crossing all three numeric variants.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(i) => Some(*i as f64),
            Value::Float64(f) => Some(*f),
            Value::Decimal128(d) => Some(d.to_f64()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    /// Type name as used by the `$type` query operator.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::MinKey => "minKey",
            Value::Null => "null",
            Value::Int64(_) => "long",
            Value::Float64(_) => "double",
            Value::Decimal128(_) => "decimal",
            Value::String(_) => "string",
            Value::Binary(_) => "binData",
            Value::ObjectId(_) => "objectId",
            Value::Bool(_) => "bool",
            Value::DateTime(_) => "date",
            Value::Array(_) => "array",
            Value::Document(_) => "object",
            Value::MaxKey => "maxKey",
        }
    }

    /// Rough in-memory footprint, used by the aggregation memory ceiling.
    pub fn approx_size(&self) -> usize {
        match self {
            Value::String(s) => 24 + s.len(),
            Value::Binary(b) => 24 + b.len(),
            Value::Array(items) => 24 + items.iter().map(Value::approx_size).sum::<usize>(),
            Value::Document(d) => {
                24 + d
                    .iter()
                    .map(|(k, v)| 24 + k.len() + v.approx_size())
                    .sum::<usize>()
            }
            _ => 16,
        }
    }

    /// Convert from the caller-facing JSON representation.
    ///
    /// Single-key wrapper objects carry the types JSON cannot express:
    /// `{"$oid": "<hex>"}`, `{"$date": <ms>}`, `{"$numberDecimal": "<str>"}`,
    /// `{"$binary": "<hex>"}`, `{"$minKey": 1}`, `{"$maxKey": 1}`.
    pub fn from_json(json: &serde_json::Value) -> Result<Value> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int64(i))
                } else {
                    Ok(Value::Float64(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            serde_json::Value::Array(items) => {
                let values = items
                    .iter()
                    .map(Value::from_json)
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Array(values))
            }
            serde_json::Value::Object(map) => {
                if map.len() == 1 {
                    let (key, inner) = map.iter().next().unwrap();
                    match key.as_str() {
                        "$oid" => {
                            let hex = inner.as_str().ok_or_else(|| {
                                FerricError::InvalidDocument("$oid expects a hex string".into())
                            })?;
                            return Ok(Value::ObjectId(ObjectId::from_hex(hex)?));
                        }
                        "$date" => {
                            let ms = inner.as_i64().ok_or_else(|| {
                                FerricError::InvalidDocument(
                                    "$date expects milliseconds since epoch".into(),
                                )
                            })?;
                            return Ok(Value::DateTime(ms));
                        }
                        "$numberDecimal" => {
                            let s = inner.as_str().ok_or_else(|| {
                                FerricError::InvalidDocument(
                                    "$numberDecimal expects a string".into(),
                                )
                            })?;
                            return Ok(Value::Decimal128(Decimal128::parse(s)?));
                        }
                        "$binary" => {
                            let s = inner.as_str().ok_or_else(|| {
                                FerricError::InvalidDocument("$binary expects a hex string".into())
                            })?;
                            let bytes = hex::decode(s).map_err(|e| {
                                FerricError::InvalidDocument(format!("bad $binary hex: {}", e))
                            })?;
                            return Ok(Value::Binary(bytes));
                        }
                        "$minKey" => return Ok(Value::MinKey),
                        "$maxKey" => return Ok(Value::MaxKey),
                        _ => {}
                    }
                }
                Ok(Value::Document(Document::from_json_object(map)?))
            }
        }
    }

    /// Convert to the caller-facing JSON representation (inverse of `from_json`).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::MinKey => serde_json::json!({"$minKey": 1}),
            Value::Null => serde_json::Value::Null,
            Value::Int64(i) => serde_json::Value::from(*i),
            Value::Float64(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Decimal128(d) => serde_json::json!({"$numberDecimal": d.to_string()}),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Binary(b) => serde_json::json!({"$binary": hex::encode(b)}),
            Value::ObjectId(oid) => serde_json::json!({"$oid": oid.to_hex()}),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::DateTime(ms) => serde_json::json!({"$date": ms}),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Document(d) => d.to_json(),
            Value::MaxKey => serde_json::json!({"$maxKey": 1}),
        }
    }
}

/// Whether a single-key JSON object is one of the extended-type literal
/// wrappers (`$oid`, `$date`, ...) rather than an operator object.
pub(crate) fn is_extended_literal(map: &serde_json::Map<String, serde_json::Value>) -> bool {
    if map.len() != 1 {
        return false;
    }
    matches!(
        map.keys().next().map(String::as_str),
        Some("$oid" | "$date" | "$numberDecimal" | "$binary" | "$minKey" | "$maxKey")
    )
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

// ===== ObjectId =====

/// 12-byte document identifier: 4-byte big-endian seconds timestamp,
/// 5 random bytes fixed per process, 3-byte big-endian counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId([u8; 12]);

static PROCESS_RANDOM: OnceLock<[u8; 5]> = OnceLock::new();
static OID_COUNTER: AtomicU32 = AtomicU32::new(0);

impl ObjectId {
    pub fn new() -> Self {
        let ts = chrono::Utc::now().timestamp() as u32;
        let random = PROCESS_RANDOM.get_or_init(|| {
            let uuid = uuid::Uuid::new_v4();
            let bytes = uuid.as_bytes();
            [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]]
        });
        let counter = OID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed) & 0x00FF_FFFF;

        let mut out = [0u8; 12];
        out[0..4].copy_from_slice(&ts.to_be_bytes());
        out[4..9].copy_from_slice(random);
        out[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);
        ObjectId(out)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        ObjectId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Seconds-since-epoch embedded in the id.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| FerricError::InvalidDocument(format!("bad ObjectId hex: {}", e)))?;
        let arr: [u8; 12] = bytes.try_into().map_err(|_| {
            FerricError::InvalidDocument("ObjectId must be exactly 12 bytes".into())
        })?;
        Ok(ObjectId(arr))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ===== Decimal128 =====

/// Fixed-point decimal: `coeff * 10^-scale`. Stored normalized (no trailing
/// zeros in the coefficient while scale > 0).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Decimal128 {
    coeff: i128,
    scale: u32,
}

impl Decimal128 {
    pub fn new(coeff: i128, scale: u32) -> Self {
        let mut d = Decimal128 { coeff, scale };
        d.normalize();
        d
    }

    pub fn from_i64(value: i64) -> Self {
        Decimal128 {
            coeff: value as i128,
            scale: 0,
        }
    }

    fn normalize(&mut self) {
        while self.scale > 0 && self.coeff % 10 == 0 && self.coeff != 0 {
            self.coeff /= 10;
            self.scale -= 1;
        }
        if self.coeff == 0 {
            self.scale = 0;
        }
    }

    /// Parse a decimal literal: optional sign, digits, optional fraction,
    /// optional `e`/`E` exponent.
    pub fn parse(s: &str) -> Result<Self> {
        let err = || FerricError::InvalidDocument(format!("invalid decimal literal '{}'", s));

        let (mantissa, exp) = match s.find(['e', 'E']) {
            Some(pos) => {
                let exp: i32 = s[pos + 1..].parse().map_err(|_| err())?;
                (&s[..pos], exp)
            }
            None => (s, 0),
        };

        let (sign, digits) = match mantissa.strip_prefix('-') {
            Some(rest) => (-1i128, rest),
            None => (1i128, mantissa.strip_prefix('+').unwrap_or(mantissa)),
        };

        let (int_part, frac_part) = match digits.find('.') {
            Some(pos) => (&digits[..pos], &digits[pos + 1..]),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(err());
        }

        let mut coeff: i128 = 0;
        for c in int_part.chars().chain(frac_part.chars()) {
            let digit = c.to_digit(10).ok_or_else(err)? as i128;
            coeff = coeff.checked_mul(10).and_then(|v| v.checked_add(digit)).ok_or_else(err)?;
        }
        coeff *= sign;

        // Fold the exponent into the scale.
        let scale = frac_part.len() as i64 - exp as i64;
        if scale >= 0 {
            Ok(Decimal128::new(coeff, u32::try_from(scale).map_err(|_| err())?))
        } else {
            let factor = 10i128.checked_pow(u32::try_from(-scale).map_err(|_| err())?).ok_or_else(err)?;
            Ok(Decimal128::new(coeff.checked_mul(factor).ok_or_else(err)?, 0))
        }
    }

    pub fn to_f64(&self) -> f64 {
        self.coeff as f64 / 10f64.powi(self.scale as i32)
    }

    fn cmp(&self, other: &Decimal128) -> Ordering {
        if self.scale == other.scale {
            return self.coeff.cmp(&other.coeff);
        }
        // Scale the lower-precision side up; fall back to f64 on overflow.
        let (lo, hi) = if self.scale < other.scale {
            (self, other)
        } else {
            (other, self)
        };
        let diff = hi.scale - lo.scale;
        match 10i128
            .checked_pow(diff)
            .and_then(|f| lo.coeff.checked_mul(f))
        {
            Some(scaled_lo) => {
                let ord = scaled_lo.cmp(&hi.coeff);
                if std::ptr::eq(lo, self) {
                    ord
                } else {
                    ord.reverse()
                }
            }
            None => cmp_f64(self.to_f64(), other.to_f64()),
        }
    }
}

impl PartialEq for Decimal128 {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal128 {}

impl PartialOrd for Decimal128 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal128 {
    fn cmp(&self, other: &Self) -> Ordering {
        Decimal128::cmp(self, other)
    }
}

impl std::fmt::Display for Decimal128 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.coeff);
        }
        let sign = if self.coeff < 0 { "-" } else { "" };
        let digits = self.coeff.unsigned_abs().to_string();
        let scale = self.scale as usize;
        if digits.len() > scale {
            let (int_part, frac_part) = digits.split_at(digits.len() - scale);
            write!(f, "{}{}.{}", sign, int_part, frac_part)
        } else {
            write!(f, "{}0.{}{}", sign, "0".repeat(scale - digits.len()), digits)
        }
    }
}
