//! Query model error types.

use thiserror::Error;

/// Errors raised while parsing or compiling filters and sort lists.
///
/// Unknown fields, operators, and sort keys are programmer errors: they fail
/// fast at compile time and name the offending key so the missing registry
/// entry is obvious.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("unknown filter field: {field}")]
    UnknownField { field: String },

    #[error("unknown filter operator: {op}")]
    UnknownOperator { op: String },

    #[error("unknown sort key: {key}")]
    UnknownSortKey { key: String },

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid sort list: {0}")]
    InvalidSort(String),
}

/// Result type alias using QueryError.
pub type QueryResult<T> = Result<T, QueryError>;
