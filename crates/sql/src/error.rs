//! SQL compilation error types.

use thiserror::Error;

/// Errors raised while compiling filters and sort lists to SQL.
///
/// All variants are programmer or caller errors: they surface before any
/// query is sent, and name the offending field, key or operator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SqlError {
    #[error("unknown filter field: {field}")]
    UnknownField { field: String },

    #[error("unknown sort key: {key}")]
    UnknownSortKey { key: String },

    #[error("cannot compare '{field}' ({expected} column) with {got}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        got: String,
    },

    #[error("too many values in $in filter on '{field}': maximum is {max}")]
    TooManyValues { field: String, max: usize },

    #[error("unsupported filter on '{field}': {op}")]
    Unsupported { field: String, op: &'static str },

    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

/// Result type alias using SqlError.
pub type SqlResult<T> = Result<T, SqlError>;
