//! Sequential full-result drain.

use appello_query::request::{CountFilteredRequest, LimitedFilteredRequest};
use tracing::error;

use crate::error::FetchError;
use crate::source::ObjectFetcher;

/// Ceiling on how many rows [`fetch_all`] may drain.
///
/// Checked with a single count query before any page is fetched, so an
/// over-limit request fails fast instead of scanning the whole table.
#[derive(Debug, Clone)]
pub struct FetchLimitSettings {
    pub limit: u64,
    /// Human-readable message surfaced to the caller when the ceiling is
    /// exceeded.
    pub error_message: String,
}

/// Per-page progress callback: `(fetched_so_far, total_if_known)`.
pub type ProgressCallback = Box<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Options for [`fetch_all`].
#[derive(Default)]
pub struct FetchAllOptions {
    pub on_progress: Option<ProgressCallback>,
    pub fetch_limit: Option<FetchLimitSettings>,
}

/// Drain every page for `initial`, sequentially, until the backend reports
/// no next page or returns an empty page.
///
/// The initial request's filter, sort and search stay authoritative across
/// pages; only the keyset page filter advances. A next-page filter that
/// fails to advance terminates the drain instead of looping forever.
pub async fn fetch_all<F: ObjectFetcher>(
    initial: LimitedFilteredRequest,
    source: &F,
    options: FetchAllOptions,
) -> Result<Vec<F::Object>, FetchError> {
    let mut total: Option<u64> = None;

    if let Some(settings) = &options.fetch_limit {
        let count = source
            .fetch_count(&CountFilteredRequest {
                filter: initial.filter.clone(),
                search: initial.search.clone(),
            })
            .await?;
        if count > settings.limit {
            return Err(FetchError::Backend {
                code: Some("fetch_limit_exceeded".to_string()),
                message: settings.error_message.clone(),
            });
        }
        total = Some(count);
    }

    let mut results = Vec::new();
    let mut request = initial.clone();

    loop {
        let page = source.fetch(&request).await?;
        let received = page.results.len();
        results.extend(page.results);

        if let Some(on_progress) = &options.on_progress {
            on_progress(results.len() as u64, total);
        }

        let Some(mut next) = page.next else {
            break;
        };
        if received == 0 {
            break;
        }

        // The caller's filter and sort stay authoritative across pages
        next.filter = initial.filter.clone();
        next.sort = initial.sort.clone();
        next.search = initial.search.clone();

        if next.page_filter == request.page_filter {
            error!("page filter did not advance, terminating fetch_all");
            break;
        }
        request = next;
    }

    Ok(results)
}
