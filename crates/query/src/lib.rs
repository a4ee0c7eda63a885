//! Appello query model.
//!
//! Backend-independent building blocks for filtered, sorted, keyset-paginated
//! list queries:
//! - [`filter`]: the boolean filter tree and its JSON wire dialect
//! - [`memory`]: compilation of filters to in-memory predicates
//! - [`sort`]: sort lists, the comma-token wire codec, and comparator
//!   synthesis
//! - [`keyset`]: next-page filter synthesis from the last object of a page
//! - [`request`]: the request/response DTOs carried over the wire

pub mod error;
pub mod filter;
pub mod keyset;
pub mod memory;
pub mod request;
pub mod sort;

pub use error::{QueryError, QueryResult};
pub use filter::{CompareOp, Filter, FilterValue, LengthConstraint, merge_filters};
pub use keyset::{next_page_filter, next_request};
pub use memory::{FilterDefinitions, FilterRunner, compile_filter};
pub use request::{
    CountFilteredRequest, CountResponse, FilteredRequest, LimitedFilteredRequest,
    PaginatedResponse,
};
pub use sort::{
    SortDefinitions, SortDirection, SortItem, SortList, Sorter, assert_sort, compile_sorter,
    encode_sort_list, parse_sort_list,
};
