//! Backend contract for the fetchers.

use appello_query::filter::Filter;
use appello_query::request::{CountFilteredRequest, LimitedFilteredRequest, PaginatedResponse};
use appello_query::sort::{SortList, assert_sort};
use async_trait::async_trait;

use crate::error::FetchError;

/// An object that can appear in a fetched list.
pub trait ListObject {
    /// Stable unique identifier, used for identity caching and
    /// duplicate detection.
    fn id(&self) -> &str;
}

/// Backend data source for one entity type.
///
/// Implementations wrap a transport (HTTP API, local store) and answer
/// page and count requests. The fetchers own all retry, staleness and
/// windowing logic; a source only has to execute one request.
#[async_trait]
pub trait ObjectFetcher: Send + Sync + 'static {
    type Object: ListObject + Clone + PartialEq + Send + Sync + 'static;

    /// Filter merged unconditionally into every outgoing request, e.g.
    /// access scoping.
    fn required_filter(&self) -> Option<Filter> {
        None
    }

    /// Extend the user-chosen sort so it totally orders the result set.
    ///
    /// The default appends the `id` tiebreaker, which keyset pagination
    /// relies on. Overriding sources take on that obligation themselves.
    fn extend_sort(&self, sort: SortList) -> SortList {
        assert_sort(sort, "id")
    }

    /// Fetch one page.
    async fn fetch(
        &self,
        request: &LimitedFilteredRequest,
    ) -> Result<PaginatedResponse<Self::Object>, FetchError>;

    /// Count matching rows.
    async fn fetch_count(&self, request: &CountFilteredRequest) -> Result<u64, FetchError>;
}
