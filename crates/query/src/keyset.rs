//! Keyset ("seek method") pagination.
//!
//! Instead of row offsets, the next page is selected by a filter derived
//! from the last object of the current page and the active sort list:
//! "strictly beyond on the first key, or equal on it and beyond on the
//! remaining keys". Applied with the same sort order this yields the
//! contiguous remainder with no gaps or duplicates under concurrent
//! writes, provided the sort list totally orders the result set.

use tracing::error;

use crate::error::QueryResult;
use crate::filter::{CompareOp, Filter};
use crate::request::LimitedFilteredRequest;
use crate::sort::{SortDirection, SortDefinitions, SortItem, SortList};

/// Synthesize the page-boundary filter for the page after `last`.
///
/// Returns `None` when there is no boundary object yet or the sort list is
/// empty. Fails when a sort key has no definition.
pub fn next_page_filter<T>(
    last: Option<&T>,
    definitions: &SortDefinitions<T>,
    sort: &SortList,
) -> QueryResult<Option<Filter>> {
    let Some(last) = last else {
        return Ok(None);
    };
    if sort.is_empty() {
        return Ok(None);
    }
    expand(last, definitions, sort).map(Some)
}

/// Recursive OR/AND tie-break expansion over the sort list.
fn expand<T>(last: &T, definitions: &SortDefinitions<T>, items: &[SortItem]) -> QueryResult<Filter> {
    let Some((first, remaining)) = items.split_first() else {
        return Err(crate::error::QueryError::InvalidSort(
            "cannot expand an empty sort list".to_string(),
        ));
    };
    let value = definitions.get(&first.key)?(last);

    let op = match first.direction {
        SortDirection::Asc => CompareOp::Gt,
        SortDirection::Desc => CompareOp::Lt,
    };
    let beyond = Filter::Compare {
        field: first.key.clone(),
        op,
        value: value.clone(),
    };

    if remaining.is_empty() {
        return Ok(beyond);
    }

    let tied = Filter::Compare {
        field: first.key.clone(),
        op: CompareOp::Eq,
        value,
    };
    let rest = expand(last, definitions, remaining)?;

    Ok(Filter::Or(vec![beyond, Filter::And(vec![tied, rest])]))
}

/// Build the follow-up request for a fetched page.
///
/// Returns `None` when the page was short (fewer results than the limit) or
/// when the synthesized page filter is identical to the current one, which
/// would otherwise loop forever on a degenerate sort/filter combination.
pub fn next_request<T>(
    results: &[T],
    definitions: &SortDefinitions<T>,
    request: &LimitedFilteredRequest,
) -> QueryResult<Option<LimitedFilteredRequest>> {
    if (results.len() as u64) < u64::from(request.limit) {
        return Ok(None);
    }

    let page_filter = next_page_filter(results.last(), definitions, &request.sort)?;
    if page_filter.is_none() {
        return Ok(None);
    }

    if page_filter == request.page_filter {
        error!(
            sort = %crate::sort::encode_sort_list(&request.sort),
            "page filter did not advance, terminating pagination"
        );
        return Ok(None);
    }

    Ok(Some(LimitedFilteredRequest {
        filter: request.filter.clone(),
        page_filter,
        sort: request.sort.clone(),
        limit: request.limit,
        search: request.search.clone(),
    }))
}
