//! Wire DTOs for filtered, sorted, paginated list requests.
//!
//! `filter` and `pageFilter` travel as JSON strings (the filter dialect,
//! double-encoded), `sort` as comma-separated `"key ORDER"` tokens. One
//! instance lives per request/response round trip; the `next` field of a
//! paginated response carries a ready-made request for the following page,
//! and its absence signals the end of the data.

use serde::{Deserialize, Serialize};

use crate::filter::Filter;
use crate::sort::{SortList, sort_codec};

/// Filter + search, without paging. Used for bulk endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteredRequest {
    #[serde(with = "filter_codec", default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

/// Filter + search for a count query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountFilteredRequest {
    #[serde(with = "filter_codec", default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

/// One page of a filtered, sorted list query.
///
/// `page_filter` is the keyset position: an additional filter merged in by
/// the backend that selects everything strictly after the previous page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitedFilteredRequest {
    #[serde(with = "filter_codec", default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,

    #[serde(with = "filter_codec", default, skip_serializing_if = "Option::is_none")]
    pub page_filter: Option<Filter>,

    #[serde(with = "sort_codec", default)]
    pub sort: SortList,

    pub limit: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

impl LimitedFilteredRequest {
    /// First-page request: no keyset position yet.
    pub fn new(filter: Option<Filter>, sort: SortList, limit: u32, search: Option<String>) -> Self {
        Self {
            filter,
            page_filter: None,
            sort,
            limit,
            search,
        }
    }
}

/// One page of results plus the request for the next page, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub results: Vec<T>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<LimitedFilteredRequest>,
}

impl<T> PaginatedResponse<T> {
    pub fn new(results: Vec<T>, next: Option<LimitedFilteredRequest>) -> Self {
        Self { results, next }
    }
}

impl<T> Default for PaginatedResponse<T> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            next: None,
        }
    }
}

/// Count query response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

/// Serde adapter encoding an optional filter as a JSON string field.
mod filter_codec {
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::filter::Filter;

    pub fn serialize<S: Serializer>(
        filter: &Option<Filter>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match filter {
            Some(filter) => {
                let text = serde_json::to_string(&filter.to_json()).map_err(S::Error::custom)?;
                serializer.serialize_str(&text)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Filter>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        match text {
            Some(text) => Filter::parse_str(&text).map_err(D::Error::custom),
            None => Ok(None),
        }
    }
}
