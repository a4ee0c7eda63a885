//! Appello SQL compilation.
//!
//! Turns the backend-independent query model from `appello-query` into
//! SeaQuery statements:
//! - [`compiler`]: filter trees to parameterized WHERE conditions
//! - [`sorter`]: sort lists to ORDER BY clauses
//! - [`select`]: full SELECT/COUNT assembly for list requests
//!
//! Executing the generated statements is the caller's concern; this crate
//! never touches a connection.

pub mod compiler;
pub mod error;
pub mod select;
pub mod sorter;

pub use compiler::{
    MAX_IN_VALUES, SqlColumn, SqlColumnType, SqlFilterDefinitions, SqlRelation, compile_filter,
    escape_like_wildcards,
};
pub use error::{SqlError, SqlResult};
pub use select::{ListQueryBuilder, SearchFilterBuilder};
pub use sorter::{SqlSortDefinitions, apply_sorter, compile_sorter};
