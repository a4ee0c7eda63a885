//! Filter tree to SQL predicate compilation using SeaQuery.
//!
//! Every value is bound as a SeaQuery parameter; no user input is ever
//! interpolated into SQL text. Field access is configured per entity type
//! via [`SqlFilterDefinitions`]: plain typed columns, and relations for
//! `$elemMatch`, which compiles to an `EXISTS` subquery scoped to the
//! related table.

use std::collections::HashMap;

use appello_query::filter::{CompareOp, Filter, FilterValue};
use chrono::{DateTime, Utc};
use sea_query::{Alias, Cond, Expr, ExprTrait, Query, SimpleExpr, Value};

use crate::error::{SqlError, SqlResult};

/// Upper bound on `$in` value lists, matching the wire contract.
pub const MAX_IN_VALUES: usize = 100;

/// Storage type of a filterable column, used to validate and normalize
/// compare values before binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    DateTime,
}

impl SqlColumnType {
    fn name(self) -> &'static str {
        match self {
            SqlColumnType::Text => "text",
            SqlColumnType::Integer => "integer",
            SqlColumnType::Float => "float",
            SqlColumnType::Boolean => "boolean",
            SqlColumnType::DateTime => "datetime",
        }
    }
}

/// A filterable column.
#[derive(Debug, Clone)]
pub struct SqlColumn {
    pub table: String,
    pub column: String,
    pub ty: SqlColumnType,
}

impl SqlColumn {
    pub fn new(table: impl Into<String>, column: impl Into<String>, ty: SqlColumnType) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            ty,
        }
    }

    fn expr(&self) -> Expr {
        Expr::col((Alias::new(&self.table), Alias::new(&self.column)))
    }
}

/// A relation filterable with `$elemMatch`.
///
/// `table.foreign_column` points back at `local_table.local_column`; the
/// nested filter compiles against `definitions`.
#[derive(Clone)]
pub struct SqlRelation {
    pub table: String,
    pub foreign_column: String,
    pub local_table: String,
    pub local_column: String,
    pub definitions: SqlFilterDefinitions,
}

#[derive(Clone)]
enum SqlFieldCompiler {
    Column(SqlColumn),
    Relation(SqlRelation),
}

/// Map from filter field to column or relation, passed explicitly to
/// [`compile_filter`].
#[derive(Clone, Default)]
pub struct SqlFilterDefinitions {
    fields: HashMap<String, SqlFieldCompiler>,
}

impl SqlFilterDefinitions {
    pub fn new() -> Self {
        Self {
            fields: HashMap::new(),
        }
    }

    /// Register a typed column for a filter field.
    pub fn column(
        mut self,
        name: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
        ty: SqlColumnType,
    ) -> Self {
        self.fields.insert(
            name.into(),
            SqlFieldCompiler::Column(SqlColumn::new(table, column, ty)),
        );
        self
    }

    /// Register a relation for `$elemMatch` filtering.
    pub fn relation(mut self, name: impl Into<String>, relation: SqlRelation) -> Self {
        self.fields
            .insert(name.into(), SqlFieldCompiler::Relation(relation));
        self
    }

    fn get(&self, field: &str) -> SqlResult<&SqlFieldCompiler> {
        self.fields.get(field).ok_or_else(|| SqlError::UnknownField {
            field: field.to_string(),
        })
    }

    fn column_for(&self, field: &str, op: &'static str) -> SqlResult<&SqlColumn> {
        match self.get(field)? {
            SqlFieldCompiler::Column(column) => Ok(column),
            SqlFieldCompiler::Relation(_) => Err(SqlError::Unsupported { field: field.to_string(), op }),
        }
    }
}

/// Compile a filter tree into a SeaQuery condition.
pub fn compile_filter(filter: &Filter, definitions: &SqlFilterDefinitions) -> SqlResult<Cond> {
    match filter {
        Filter::And(children) => {
            let mut cond = Cond::all();
            for child in children {
                cond = cond.add(compile_filter(child, definitions)?);
            }
            Ok(cond)
        }
        Filter::Or(children) => {
            if children.is_empty() {
                // OR of nothing matches nothing
                return Ok(Cond::all().add(Expr::cust("FALSE")));
            }
            let mut cond = Cond::any();
            for child in children {
                cond = cond.add(compile_filter(child, definitions)?);
            }
            Ok(cond)
        }
        Filter::Not(child) => Ok(compile_filter(child, definitions)?.not()),
        Filter::Compare { field, op, value } => {
            let column = definitions.column_for(field, op.token())?;
            Ok(Cond::all().add(compile_compare(field, column, *op, value)?))
        }
        Filter::In { field, values } => {
            let column = definitions.column_for(field, "$in")?;
            compile_in(field, column, values)
        }
        Filter::ElemMatch { field, filter } => match definitions.get(field)? {
            SqlFieldCompiler::Relation(relation) => compile_elem_match(relation, filter),
            SqlFieldCompiler::Column(_) => Err(SqlError::Unsupported {
                field: field.to_string(),
                op: "$elemMatch",
            }),
        },
        // Only JSON-typed storage could answer this; the typed column set
        // cannot.
        Filter::Length { field, .. } => Err(SqlError::Unsupported {
            field: field.to_string(),
            op: "$length",
        }),
    }
}

fn compile_compare(
    field: &str,
    column: &SqlColumn,
    op: CompareOp,
    value: &FilterValue,
) -> SqlResult<SimpleExpr> {
    let expr = column.expr();

    if matches!(value, FilterValue::Null) {
        return match op {
            CompareOp::Eq => Ok(expr.is_null()),
            CompareOp::Neq => Ok(expr.is_not_null()),
            _ => Err(SqlError::InvalidFilter(format!(
                "cannot order-compare '{field}' against null"
            ))),
        };
    }

    if op == CompareOp::Contains {
        if column.ty != SqlColumnType::Text {
            return Err(SqlError::TypeMismatch {
                field: field.to_string(),
                expected: column.ty.name(),
                got: "a substring pattern".to_string(),
            });
        }
        let Some(needle) = text_of(value) else {
            return Err(SqlError::TypeMismatch {
                field: field.to_string(),
                expected: "text",
                got: describe(value),
            });
        };
        return Ok(expr.like(format!("%{}%", escape_like_wildcards(&needle))));
    }

    let bound = normalize_value(field, value, column.ty)?;
    Ok(match op {
        CompareOp::Eq => expr.eq(bound),
        CompareOp::Neq => expr.ne(bound),
        CompareOp::Gt => expr.gt(bound),
        CompareOp::Gte => expr.gte(bound),
        CompareOp::Lt => expr.lt(bound),
        CompareOp::Lte => expr.lte(bound),
        CompareOp::Contains => unreachable!("handled above"),
    })
}

fn compile_in(field: &str, column: &SqlColumn, values: &[FilterValue]) -> SqlResult<Cond> {
    if values.len() > MAX_IN_VALUES {
        return Err(SqlError::TooManyValues {
            field: field.to_string(),
            max: MAX_IN_VALUES,
        });
    }

    if values.is_empty() {
        // IN () matches nothing
        return Ok(Cond::all().add(Expr::cust("FALSE")));
    }

    let has_null = values.iter().any(|v| matches!(v, FilterValue::Null));
    let bound: Vec<Value> = values
        .iter()
        .filter(|v| !matches!(v, FilterValue::Null))
        .map(|v| normalize_value(field, v, column.ty))
        .collect::<SqlResult<_>>()?;

    let membership = match bound.len() {
        0 => None,
        1 => Some(
            column
                .expr()
                .eq(bound.into_iter().next().unwrap_or(Value::Int(None))),
        ),
        _ => Some(column.expr().is_in(bound)),
    };

    Ok(match (has_null, membership) {
        (true, Some(membership)) => Cond::any().add(column.expr().is_null()).add(membership),
        (true, None) => Cond::all().add(column.expr().is_null()),
        (false, Some(membership)) => Cond::all().add(membership),
        (false, None) => Cond::all().add(Expr::cust("FALSE")),
    })
}

fn compile_elem_match(relation: &SqlRelation, filter: &Filter) -> SqlResult<Cond> {
    let nested = compile_filter(filter, &relation.definitions)?;

    let mut subquery = Query::select();
    subquery
        .expr(Expr::val(1))
        .from(Alias::new(&relation.table))
        .and_where(
            Expr::col((
                Alias::new(&relation.table),
                Alias::new(&relation.foreign_column),
            ))
            .equals((
                Alias::new(&relation.local_table),
                Alias::new(&relation.local_column),
            )),
        )
        .cond_where(nested);

    Ok(Cond::all().add(Expr::exists(subquery.take())))
}

/// Validate a compare value against the column type and convert it to a
/// bindable SeaQuery value.
fn normalize_value(field: &str, value: &FilterValue, ty: SqlColumnType) -> SqlResult<Value> {
    let mismatch = || SqlError::TypeMismatch {
        field: field.to_string(),
        expected: ty.name(),
        got: describe(value),
    };

    match ty {
        SqlColumnType::Text => match value {
            FilterValue::String(s) => Ok(s.clone().into()),
            _ => Err(mismatch()),
        },
        SqlColumnType::Integer => match value {
            FilterValue::Integer(i) => Ok((*i).into()),
            // Booleans compare as 0/1 against numeric columns
            FilterValue::Bool(b) => Ok(i64::from(*b).into()),
            _ => Err(mismatch()),
        },
        SqlColumnType::Float => match value {
            FilterValue::Float(f) => Ok((*f).into()),
            FilterValue::Integer(i) => Ok((*i).into()),
            _ => Err(mismatch()),
        },
        SqlColumnType::Boolean => match value {
            FilterValue::Bool(b) => Ok((*b).into()),
            FilterValue::Integer(0) => Ok(false.into()),
            FilterValue::Integer(1) => Ok(true.into()),
            _ => Err(mismatch()),
        },
        SqlColumnType::DateTime => match value {
            FilterValue::DateTime(d) => Ok((*d).into()),
            // Wire filters carry datetimes as RFC 3339 strings
            FilterValue::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|d| d.with_timezone(&Utc).into())
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
    }
}

fn text_of(value: &FilterValue) -> Option<String> {
    match value {
        FilterValue::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn describe(value: &FilterValue) -> String {
    match value {
        FilterValue::Null => "null".to_string(),
        FilterValue::Bool(b) => format!("boolean {b}"),
        FilterValue::Integer(i) => format!("integer {i}"),
        FilterValue::Float(f) => format!("float {f}"),
        FilterValue::String(s) => format!("string '{s}'"),
        FilterValue::DateTime(d) => format!("datetime {}", d.to_rfc3339()),
    }
}

/// Escape SQL LIKE wildcard characters (`%`, `_`, `\`) in a value.
pub fn escape_like_wildcards(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
