//! Boolean filter trees over entity fields.
//!
//! A [`Filter`] is a backend-independent predicate: combinators (`$and`,
//! `$or`, `$not`) over leaf comparisons on named fields. The same tree is
//! compiled to SQL on the server and evaluated in memory on the client, so
//! it carries no knowledge of either backend.
//!
//! On the wire a filter is a JSON dialect:
//!
//! ```json
//! { "$or": [
//!     { "age": { "$gt": 10 } },
//!     { "$and": [ { "age": 10 }, { "id": { "$gt": "b" } } ] }
//! ] }
//! ```
//!
//! A bare scalar under a field key is an implicit `$eq`; multiple keys in
//! one object and arrays of filters are implicit ANDs. `null`, `{}` and
//! `[]` all decode to the always-true identity filter.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};

use crate::error::{QueryError, QueryResult};

/// Scalar value a filter compares a field against.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Programmatic only: encodes as an RFC 3339 string on the wire.
    DateTime(DateTime<Utc>),
}

impl FilterValue {
    /// Total order used by in-memory evaluation and comparator synthesis.
    ///
    /// Booleans and datetimes normalize to numbers (0/1, epoch millis),
    /// strings compare case-insensitively, and null orders after every
    /// other value. Numbers order before strings so the order stays total
    /// on mixed-type data.
    pub fn compare(&self, other: &FilterValue) -> Ordering {
        match (self.normalized(), other.normalized()) {
            (Normalized::Null, Normalized::Null) => Ordering::Equal,
            (Normalized::Null, _) => Ordering::Greater,
            (_, Normalized::Null) => Ordering::Less,
            (Normalized::Number(a), Normalized::Number(b)) => a.compare(&b),
            (Normalized::Text(a), Normalized::Text(b)) => a.cmp(&b),
            (Normalized::Number(_), Normalized::Text(_)) => Ordering::Less,
            (Normalized::Text(_), Normalized::Number(_)) => Ordering::Greater,
        }
    }

    /// Normalized equality: `1 == 1.0`, `true == 1`, strings ignore case.
    pub fn matches(&self, other: &FilterValue) -> bool {
        self.compare(other) == Ordering::Equal
    }

    fn normalized(&self) -> Normalized {
        match self {
            FilterValue::Null => Normalized::Null,
            FilterValue::Bool(b) => Normalized::Number(Number::Int(i64::from(*b))),
            FilterValue::Integer(i) => Normalized::Number(Number::Int(*i)),
            FilterValue::Float(f) => Normalized::Number(Number::Float(*f)),
            FilterValue::String(s) => Normalized::Text(s.to_lowercase()),
            FilterValue::DateTime(d) => Normalized::Number(Number::Int(d.timestamp_millis())),
        }
    }

    /// Lowercased text content, when this value is a string.
    pub fn as_text(&self) -> Option<String> {
        match self {
            FilterValue::String(s) => Some(s.to_lowercase()),
            _ => None,
        }
    }

    /// Decode a JSON scalar; objects and arrays are rejected.
    pub fn from_json(value: &Value) -> QueryResult<FilterValue> {
        match value {
            Value::Null => Ok(FilterValue::Null),
            Value::Bool(b) => Ok(FilterValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(FilterValue::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(FilterValue::Float(f))
                } else {
                    Err(QueryError::InvalidFilter(format!(
                        "unrepresentable number: {n}"
                    )))
                }
            }
            Value::String(s) => Ok(FilterValue::String(s.clone())),
            Value::Array(_) | Value::Object(_) => Err(QueryError::InvalidFilter(
                "expected a scalar compare value".to_string(),
            )),
        }
    }

    /// Wire representation of this value.
    pub fn to_json(&self) -> Value {
        match self {
            FilterValue::Null => Value::Null,
            FilterValue::Bool(b) => json!(b),
            FilterValue::Integer(i) => json!(i),
            FilterValue::Float(f) => json!(f),
            FilterValue::String(s) => json!(s),
            FilterValue::DateTime(d) => json!(d.to_rfc3339()),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::String(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Integer(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        FilterValue::DateTime(value)
    }
}

enum Normalized {
    Null,
    Number(Number),
    Text(String),
}

enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn compare(&self, other: &Number) -> Ordering {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.cmp(b),
            (a, b) => a.as_f64().total_cmp(&b.as_f64()),
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            Number::Int(i) => *i as f64,
            Number::Float(f) => *f,
        }
    }
}

/// Comparison operators for leaf filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Case-insensitive substring match.
    Contains,
}

impl CompareOp {
    /// Wire token, `$`-prefixed.
    pub fn token(self) -> &'static str {
        match self {
            CompareOp::Eq => "$eq",
            CompareOp::Neq => "$neq",
            CompareOp::Gt => "$gt",
            CompareOp::Gte => "$gte",
            CompareOp::Lt => "$lt",
            CompareOp::Lte => "$lte",
            CompareOp::Contains => "$contains",
        }
    }

    fn from_token(token: &str) -> Option<CompareOp> {
        match token {
            "$eq" => Some(CompareOp::Eq),
            "$neq" => Some(CompareOp::Neq),
            "$gt" => Some(CompareOp::Gt),
            "$gte" => Some(CompareOp::Gte),
            "$lt" => Some(CompareOp::Lt),
            "$lte" => Some(CompareOp::Lte),
            "$contains" => Some(CompareOp::Contains),
            _ => None,
        }
    }
}

/// A length constraint applied by [`Filter::Length`].
#[derive(Debug, Clone, PartialEq)]
pub struct LengthConstraint {
    pub op: CompareOp,
    pub value: FilterValue,
}

/// Backend-independent boolean filter tree.
///
/// Immutable value type: merges and page-filter synthesis always build new
/// trees.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// All children match. `And([])` is the always-true identity.
    And(Vec<Filter>),
    /// Any child matches. `Or([])` is always false.
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Compare {
        field: String,
        op: CompareOp,
        value: FilterValue,
    },
    /// Field value is (or overlaps, for array fields) one of the listed
    /// values.
    In {
        field: String,
        values: Vec<FilterValue>,
    },
    /// Some element of a relation/array field matches the nested filter.
    ElemMatch { field: String, filter: Box<Filter> },
    /// The length of a string or array field satisfies every constraint.
    Length {
        field: String,
        constraints: Vec<LengthConstraint>,
    },
}

impl Filter {
    /// Leaf comparison shorthand.
    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<FilterValue>) -> Self {
        Filter::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Filter::compare(field, CompareOp::Eq, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Filter::compare(field, CompareOp::Gt, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Filter::compare(field, CompareOp::Lt, value)
    }

    pub fn contains(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Filter::compare(field, CompareOp::Contains, value)
    }

    /// Whether this tree is vacuously true (decoded from `{}` or `[]`).
    pub fn is_empty(&self) -> bool {
        match self {
            Filter::And(children) => children.iter().all(Filter::is_empty),
            _ => false,
        }
    }

    /// Parse the wire dialect. `null`, `{}` and `[]` yield `None`.
    pub fn parse(value: &Value) -> QueryResult<Option<Filter>> {
        let filter = parse_node(value)?;
        Ok(filter.filter(|f| !f.is_empty()))
    }

    /// Parse the wire dialect from its JSON text form.
    pub fn parse_str(text: &str) -> QueryResult<Option<Filter>> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| QueryError::InvalidFilter(format!("malformed filter JSON: {e}")))?;
        Filter::parse(&value)
    }

    /// Wire representation of this tree.
    pub fn to_json(&self) -> Value {
        match self {
            Filter::And(children) => {
                json!({ "$and": children.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
            Filter::Or(children) => {
                json!({ "$or": children.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
            Filter::Not(child) => json!({ "$not": child.to_json() }),
            Filter::Compare { field, op, value } => {
                json!({ field: { op.token(): value.to_json() } })
            }
            Filter::In { field, values } => {
                json!({ field: { "$in": values.iter().map(FilterValue::to_json).collect::<Vec<_>>() } })
            }
            Filter::ElemMatch { field, filter } => {
                json!({ field: { "$elemMatch": filter.to_json() } })
            }
            Filter::Length { field, constraints } => {
                let mut ops = Map::new();
                for c in constraints {
                    ops.insert(c.op.token().to_string(), c.value.to_json());
                }
                json!({ field: { "$length": Value::Object(ops) } })
            }
        }
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match Filter::parse(&value).map_err(D::Error::custom)? {
            Some(filter) => Ok(filter),
            // {} and [] are the identity filter
            None => Ok(Filter::And(Vec::new())),
        }
    }
}

/// Merge filters with `$and`, dropping empties.
///
/// With one non-empty input the input is returned unchanged; with none the
/// result is `None`.
pub fn merge_filters(filters: impl IntoIterator<Item = Option<Filter>>) -> Option<Filter> {
    let mut merged: Vec<Filter> = filters
        .into_iter()
        .flatten()
        .filter(|f| !f.is_empty())
        .collect();

    match merged.len() {
        0 => None,
        1 => merged.pop(),
        _ => Some(Filter::And(merged)),
    }
}

fn parse_node(value: &Value) -> QueryResult<Option<Filter>> {
    match value {
        Value::Null => Ok(None),
        Value::Array(items) => {
            let children = parse_list(items)?;
            Ok(collapse_and(children))
        }
        Value::Object(map) => {
            let mut children = Vec::with_capacity(map.len());
            for (key, child) in map {
                match key.as_str() {
                    "$and" => {
                        if let Some(filter) = parse_combinator_children(child)
                            .map(collapse_and)?
                        {
                            children.push(filter);
                        }
                    }
                    "$or" => {
                        let branches = parse_combinator_children(child)?;
                        children.push(Filter::Or(branches));
                    }
                    "$not" => {
                        let inner = parse_node(child)?.unwrap_or(Filter::And(Vec::new()));
                        children.push(Filter::Not(Box::new(inner)));
                    }
                    key if key.starts_with('$') => {
                        return Err(QueryError::UnknownOperator {
                            op: key.to_string(),
                        });
                    }
                    field => {
                        children.extend(parse_leaf(field, child)?);
                    }
                }
            }
            Ok(collapse_and(children))
        }
        scalar => Err(QueryError::InvalidFilter(format!(
            "expected an object, array or null at filter root, got {scalar}"
        ))),
    }
}

fn parse_combinator_children(value: &Value) -> QueryResult<Vec<Filter>> {
    match value {
        Value::Array(items) => parse_list(items),
        // A single object is accepted where a list is expected
        Value::Object(_) => Ok(parse_node(value)?.into_iter().collect()),
        other => Err(QueryError::InvalidFilter(format!(
            "expected an array of filters, got {other}"
        ))),
    }
}

fn parse_list(items: &[Value]) -> QueryResult<Vec<Filter>> {
    let mut filters = Vec::with_capacity(items.len());
    for item in items {
        if let Some(filter) = parse_node(item)? {
            filters.push(filter);
        }
    }
    Ok(filters)
}

fn collapse_and(mut children: Vec<Filter>) -> Option<Filter> {
    match children.len() {
        0 => None,
        1 => children.pop(),
        _ => Some(Filter::And(children)),
    }
}

/// Parse the value under a field key: a bare scalar is an implicit `$eq`,
/// an operator object applies each `$op`, and nested plain objects extend
/// the field path with dot syntax.
fn parse_leaf(field: &str, value: &Value) -> QueryResult<Vec<Filter>> {
    match value {
        Value::Object(map) => {
            let has_ops = map.keys().any(|k| k.starts_with('$'));
            let has_fields = map.keys().any(|k| !k.starts_with('$'));
            if has_ops && has_fields {
                return Err(QueryError::InvalidFilter(format!(
                    "cannot mix operators and nested fields under '{field}'"
                )));
            }

            if has_fields {
                // Nested field path: {a: {b: ...}} is a filter on "a.b"
                let mut filters = Vec::new();
                for (nested, child) in map {
                    filters.extend(parse_leaf(&format!("{field}.{nested}"), child)?);
                }
                return Ok(filters);
            }

            let mut filters = Vec::with_capacity(map.len());
            for (op, operand) in map {
                filters.push(parse_op(field, op, operand)?);
            }
            Ok(filters)
        }
        Value::Array(items) => {
            // {field: [ops...]} applies each entry to the same field
            let mut filters = Vec::new();
            for item in items {
                filters.extend(parse_leaf(field, item)?);
            }
            Ok(filters)
        }
        scalar => Ok(vec![Filter::Compare {
            field: field.to_string(),
            op: CompareOp::Eq,
            value: FilterValue::from_json(scalar)?,
        }]),
    }
}

fn parse_op(field: &str, op: &str, operand: &Value) -> QueryResult<Filter> {
    if let Some(op) = CompareOp::from_token(op) {
        return Ok(Filter::Compare {
            field: field.to_string(),
            op,
            value: FilterValue::from_json(operand)?,
        });
    }

    match op {
        "$in" => {
            let Value::Array(items) = operand else {
                return Err(QueryError::InvalidFilter(format!(
                    "expected an array as value for $in on '{field}'"
                )));
            };
            let values = items
                .iter()
                .map(FilterValue::from_json)
                .collect::<QueryResult<Vec<_>>>()?;
            Ok(Filter::In {
                field: field.to_string(),
                values,
            })
        }
        "$elemMatch" => {
            let inner = parse_node(operand)?.unwrap_or(Filter::And(Vec::new()));
            Ok(Filter::ElemMatch {
                field: field.to_string(),
                filter: Box::new(inner),
            })
        }
        "$length" => {
            let constraints = match operand {
                Value::Object(map) => {
                    let mut constraints = Vec::with_capacity(map.len());
                    for (token, value) in map {
                        let op = CompareOp::from_token(token).ok_or_else(|| {
                            QueryError::UnknownOperator {
                                op: token.to_string(),
                            }
                        })?;
                        constraints.push(LengthConstraint {
                            op,
                            value: FilterValue::from_json(value)?,
                        });
                    }
                    constraints
                }
                // {field: {$length: 3}} is an implicit $eq
                scalar => vec![LengthConstraint {
                    op: CompareOp::Eq,
                    value: FilterValue::from_json(scalar)?,
                }],
            };
            Ok(Filter::Length {
                field: field.to_string(),
                constraints,
            })
        }
        other => Err(QueryError::UnknownOperator {
            op: other.to_string(),
        }),
    }
}
