#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Full-result drain tests.

mod common;

use std::sync::Arc;

use appello_fetcher::{FetchAllOptions, FetchError, FetchLimitSettings, fetch_all};
use appello_query::{Filter, LimitedFilteredRequest};
use common::{MockBackend, rows};

fn request(filter: Option<Filter>, limit: u32) -> LimitedFilteredRequest {
    LimitedFilteredRequest::new(filter, Vec::new(), limit, None)
}

#[tokio::test]
async fn drains_all_pages_sequentially() {
    let backend = MockBackend::new(rows(250));

    let all = fetch_all(request(None, 100), &backend, FetchAllOptions::default())
        .await
        .unwrap();

    assert_eq!(all.len(), 250);
    assert_eq!(backend.fetch_calls(), 3);
    assert_eq!(backend.count_calls(), 0, "no ceiling, no count query");

    // Every row exactly once
    let mut ids: Vec<_> = all.iter().map(|row| row.id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 250);
}

#[tokio::test]
async fn empty_result_terminates_after_one_page() {
    let backend = MockBackend::new(rows(0));

    let all = fetch_all(request(None, 50), &backend, FetchAllOptions::default())
        .await
        .unwrap();

    assert!(all.is_empty());
    assert_eq!(backend.fetch_calls(), 1);
}

#[tokio::test]
async fn progress_reports_each_page() {
    let backend = MockBackend::new(rows(120));
    let reports = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let seen = Arc::clone(&reports);
    let options = FetchAllOptions {
        on_progress: Some(Box::new(move |fetched, total| {
            seen.lock().push((fetched, total));
        })),
        fetch_limit: Some(FetchLimitSettings {
            limit: 1000,
            error_message: "too many rows".to_string(),
        }),
    };

    let all = fetch_all(request(None, 50), &backend, options).await.unwrap();
    assert_eq!(all.len(), 120);

    let reports = reports.lock().clone();
    assert_eq!(reports, vec![(50, Some(120)), (100, Some(120)), (120, Some(120))]);
}

#[tokio::test]
async fn ceiling_fails_fast_before_any_page() {
    let backend = MockBackend::new(rows(150));

    let options = FetchAllOptions {
        on_progress: None,
        fetch_limit: Some(FetchLimitSettings {
            limit: 100,
            error_message: "Too many members match this filter".to_string(),
        }),
    };

    let error = fetch_all(request(None, 100), &backend, options)
        .await
        .unwrap_err();

    assert_eq!(
        error,
        FetchError::Backend {
            code: Some("fetch_limit_exceeded".to_string()),
            message: "Too many members match this filter".to_string(),
        }
    );
    assert_eq!(backend.fetch_calls(), 0, "the ceiling check must precede page fetches");
    assert_eq!(backend.count_calls(), 1);
}

#[tokio::test]
async fn ceiling_counts_the_filtered_set() {
    let backend = MockBackend::new(rows(150));
    let filter = Filter::eq("name", "ada");

    let options = FetchAllOptions {
        on_progress: None,
        fetch_limit: Some(FetchLimitSettings {
            limit: 100,
            error_message: "too many rows".to_string(),
        }),
    };

    // 30 of 150 rows match: under the ceiling, so the drain proceeds
    let all = fetch_all(request(Some(filter), 100), &backend, options)
        .await
        .unwrap();
    assert_eq!(all.len(), 30);
}
