//! In-memory filter compilation.
//!
//! Compiles a [`Filter`] into a predicate over `serde_json::Value` rows,
//! used by client-side stores and by tests to mirror what the SQL backend
//! would return. Field access is configured explicitly per entity type via
//! [`FilterDefinitions`]; a filter referencing an unregistered field fails
//! at compile time with the field name.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::filter::{CompareOp, Filter, FilterValue, LengthConstraint};

/// Compiled predicate over a JSON row.
pub type FilterRunner = Box<dyn Fn(&Value) -> bool + Send + Sync>;

/// How a filter field maps onto a row.
#[derive(Clone)]
enum FieldCompiler {
    /// Extract the value at a dot path.
    Path(Vec<String>),
    /// Extract at a dot path and scope `$elemMatch` children to their own
    /// definitions.
    Nested {
        path: Vec<String>,
        definitions: FilterDefinitions,
    },
}

impl FieldCompiler {
    fn path(&self) -> &[String] {
        match self {
            FieldCompiler::Path(path) => path,
            FieldCompiler::Nested { path, .. } => path,
        }
    }
}

/// Map from filter field to row accessor, passed explicitly to
/// [`compile_filter`].
#[derive(Clone, Default)]
pub struct FilterDefinitions {
    fields: HashMap<String, FieldCompiler>,
}

impl FilterDefinitions {
    pub fn new() -> Self {
        Self {
            fields: HashMap::new(),
        }
    }

    /// Register a field extracted at `path` (dot syntax).
    pub fn field(mut self, name: impl Into<String>, path: &str) -> Self {
        self.fields.insert(
            name.into(),
            FieldCompiler::Path(split_path(path)),
        );
        self
    }

    /// Register a relation field whose `$elemMatch` children compile
    /// against `definitions`.
    pub fn nested(mut self, name: impl Into<String>, path: &str, definitions: FilterDefinitions) -> Self {
        self.fields.insert(
            name.into(),
            FieldCompiler::Nested {
                path: split_path(path),
                definitions,
            },
        );
        self
    }

    fn get(&self, field: &str) -> QueryResult<&FieldCompiler> {
        self.fields.get(field).ok_or_else(|| QueryError::UnknownField {
            field: field.to_string(),
        })
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}

/// Compile a filter into a row predicate.
pub fn compile_filter(filter: &Filter, definitions: &FilterDefinitions) -> QueryResult<FilterRunner> {
    match filter {
        Filter::And(children) => {
            let runners = compile_all(children, definitions)?;
            Ok(Box::new(move |row| runners.iter().all(|r| r(row))))
        }
        Filter::Or(children) => {
            let runners = compile_all(children, definitions)?;
            Ok(Box::new(move |row| runners.iter().any(|r| r(row))))
        }
        Filter::Not(child) => {
            let runner = compile_filter(child, definitions)?;
            Ok(Box::new(move |row| !runner(row)))
        }
        Filter::Compare { field, op, value } => {
            let path = definitions.get(field)?.path().to_vec();
            let op = *op;
            let value = value.clone();
            Ok(Box::new(move |row| {
                // A property that does not exist never matches
                match path_value(row, &path) {
                    Some(found) => apply_compare(op, found, &value),
                    None => false,
                }
            }))
        }
        Filter::In { field, values } => {
            let path = definitions.get(field)?.path().to_vec();
            let values = values.clone();
            Ok(Box::new(move |row| {
                let Some(found) = path_value(row, &path) else {
                    return false;
                };
                match found {
                    // Array fields match on overlap
                    Value::Array(elements) => elements
                        .iter()
                        .any(|element| values.iter().any(|v| scalar_matches(element, v))),
                    scalar => values.iter().any(|v| scalar_matches(scalar, v)),
                }
            }))
        }
        Filter::ElemMatch { field, filter } => {
            let compiler = definitions.get(field)?;
            let path = compiler.path().to_vec();
            let runner = match compiler {
                FieldCompiler::Path(_) => compile_filter(filter, definitions)?,
                FieldCompiler::Nested { definitions, .. } => compile_filter(filter, definitions)?,
            };
            Ok(Box::new(move |row| {
                match path_value(row, &path) {
                    Some(Value::Array(elements)) => elements.iter().any(|element| runner(element)),
                    _ => false,
                }
            }))
        }
        Filter::Length { field, constraints } => {
            let path = definitions.get(field)?.path().to_vec();
            let constraints = constraints.clone();
            Ok(Box::new(move |row| {
                let length = match path_value(row, &path) {
                    Some(Value::String(s)) => s.chars().count() as i64,
                    Some(Value::Array(elements)) => elements.len() as i64,
                    _ => return false,
                };
                let length = FilterValue::Integer(length);
                constraints
                    .iter()
                    .all(|LengthConstraint { op, value }| compare_values(*op, &length, value))
            }))
        }
    }
}

fn compile_all(children: &[Filter], definitions: &FilterDefinitions) -> QueryResult<Vec<FilterRunner>> {
    children
        .iter()
        .map(|child| compile_filter(child, definitions))
        .collect()
}

/// Walk a dot path into a row. Returns `None` for missing properties.
fn path_value<'a>(row: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = row;
    for segment in path {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn apply_compare(op: CompareOp, found: &Value, value: &FilterValue) -> bool {
    match op {
        // Equality against an array field matches any element
        CompareOp::Eq => match found {
            Value::Array(elements) => elements.iter().any(|e| scalar_matches(e, value)),
            scalar => scalar_matches(scalar, value),
        },
        CompareOp::Neq => !apply_compare(CompareOp::Eq, found, value),
        CompareOp::Contains => {
            let (Some(haystack), Some(needle)) =
                (found.as_str(), value.as_text())
            else {
                return false;
            };
            haystack.to_lowercase().contains(&needle)
        }
        op => match to_filter_value(found) {
            Some(found) => compare_values(op, &found, value),
            None => false,
        },
    }
}

fn compare_values(op: CompareOp, left: &FilterValue, right: &FilterValue) -> bool {
    let ordering = left.compare(right);
    match op {
        CompareOp::Eq => ordering.is_eq(),
        CompareOp::Neq => ordering.is_ne(),
        CompareOp::Gt => ordering.is_gt(),
        CompareOp::Gte => ordering.is_ge(),
        CompareOp::Lt => ordering.is_lt(),
        CompareOp::Lte => ordering.is_le(),
        CompareOp::Contains => match (left.as_text(), right.as_text()) {
            (Some(haystack), Some(needle)) => haystack.contains(&needle),
            _ => false,
        },
    }
}

fn scalar_matches(found: &Value, value: &FilterValue) -> bool {
    match to_filter_value(found) {
        Some(found) => found.matches(value),
        None => false,
    }
}

fn to_filter_value(value: &Value) -> Option<FilterValue> {
    FilterValue::from_json(value).ok()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn member_definitions() -> FilterDefinitions {
        FilterDefinitions::new()
            .field("name", "name")
            .field("age", "age")
            .field("email", "details.email")
            .field("tags", "tags")
            .nested(
                "registrations",
                "registrations",
                FilterDefinitions::new()
                    .field("groupId", "groupId")
                    .field("registeredAt", "registeredAt"),
            )
    }

    fn member() -> Value {
        json!({
            "name": "Ada Lovelace",
            "age": 28,
            "details": {"email": "ada@example.com"},
            "tags": ["math", "pioneer"],
            "registrations": [
                {"groupId": "g1", "registeredAt": 1000},
                {"groupId": "g2", "registeredAt": null}
            ]
        })
    }

    fn matches(filter: &Filter, row: &Value) -> bool {
        compile_filter(filter, &member_definitions()).unwrap()(row)
    }

    #[test]
    fn compare_on_dot_path() {
        assert!(matches(&Filter::eq("email", "ada@example.com"), &member()));
        assert!(!matches(&Filter::eq("email", "other@example.com"), &member()));
    }

    #[test]
    fn missing_property_never_matches() {
        let row = json!({"name": "Ada Lovelace"});
        assert!(!matches(&Filter::eq("age", 28), &row));
        // Even negated comparisons require the property to exist
        assert!(!matches(&Filter::compare("age", CompareOp::Neq, 28), &row));
    }

    #[test]
    fn string_compare_ignores_case() {
        assert!(matches(&Filter::eq("name", "ada lovelace"), &member()));
        assert!(matches(&Filter::contains("name", "LOVE"), &member()));
    }

    #[test]
    fn eq_on_array_field_matches_any_element() {
        assert!(matches(&Filter::eq("tags", "math"), &member()));
        assert!(!matches(&Filter::eq("tags", "art"), &member()));
    }

    #[test]
    fn in_overlaps_array_fields() {
        let filter = Filter::In {
            field: "tags".to_string(),
            values: vec![FilterValue::from("art"), FilterValue::from("pioneer")],
        };
        assert!(matches(&filter, &member()));

        let miss = Filter::In {
            field: "tags".to_string(),
            values: vec![FilterValue::from("art")],
        };
        assert!(!matches(&miss, &member()));
    }

    #[test]
    fn elem_match_uses_nested_definitions() {
        let filter = Filter::ElemMatch {
            field: "registrations".to_string(),
            filter: Box::new(Filter::And(vec![
                Filter::eq("groupId", "g1"),
                Filter::compare("registeredAt", CompareOp::Neq, FilterValue::Null),
            ])),
        };
        assert!(matches(&filter, &member()));

        let miss = Filter::ElemMatch {
            field: "registrations".to_string(),
            filter: Box::new(Filter::And(vec![
                Filter::eq("groupId", "g2"),
                Filter::compare("registeredAt", CompareOp::Neq, FilterValue::Null),
            ])),
        };
        assert!(!matches(&miss, &member()));
    }

    #[test]
    fn length_applies_constraints() {
        let filter = Filter::Length {
            field: "tags".to_string(),
            constraints: vec![LengthConstraint {
                op: CompareOp::Eq,
                value: FilterValue::Integer(2),
            }],
        };
        assert!(matches(&filter, &member()));
    }

    #[test]
    fn combinators_compose() {
        let filter = Filter::Or(vec![
            Filter::eq("age", 99),
            Filter::Not(Box::new(Filter::eq("name", "grace"))),
        ]);
        assert!(matches(&filter, &member()));

        // Or of nothing is false
        assert!(!matches(&Filter::Or(Vec::new()), &member()));
        // And of nothing is true
        assert!(matches(&Filter::And(Vec::new()), &member()));
    }

    #[test]
    fn unknown_field_fails_at_compile_time() {
        let err = match compile_filter(&Filter::eq("height", 1), &member_definitions()) {
            Err(err) => err,
            Ok(_) => panic!("expected compile_filter to fail"),
        };
        assert_eq!(
            err,
            QueryError::UnknownField {
                field: "height".to_string()
            }
        );
    }

    #[test]
    fn null_comparisons() {
        let row = json!({"age": null});
        let defs = FilterDefinitions::new().field("age", "age");
        let eq_null = Filter::compare("age", CompareOp::Eq, FilterValue::Null);
        assert!(compile_filter(&eq_null, &defs).unwrap()(&row));

        // Null orders after every value
        let gt = Filter::gt("age", 100);
        assert!(compile_filter(&gt, &defs).unwrap()(&row));
    }
}
