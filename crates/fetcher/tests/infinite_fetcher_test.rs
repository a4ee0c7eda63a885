#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Infinite fetcher state machine tests.

mod common;

use std::time::Duration;

use appello_fetcher::{FetchError, InfiniteObjectFetcher};
use appello_query::Filter;
use common::{MockBackend, rows};

/// Let spawned background tasks and render pauses run to completion.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(500)).await;
}

#[tokio::test(start_paused = true)]
async fn reset_loads_the_first_page() {
    let backend = MockBackend::new(rows(100));
    let fetcher = InfiniteObjectFetcher::new(backend.clone());

    fetcher.reset();
    settle().await;

    // reset marks the list as at-end, so the first page loads right away
    assert!(!fetcher.objects().is_empty());
    assert_eq!(fetcher.objects().len() % 20, 0, "pages are appended whole");
    assert!(fetcher.has_more_objects());
}

#[tokio::test(start_paused = true)]
async fn reaching_the_end_appends_a_page() {
    let backend = MockBackend::new(rows(100));
    let fetcher = InfiniteObjectFetcher::new(backend.clone());

    fetcher.reset();
    fetcher.fetch_if_needed().await.unwrap();
    let loaded = fetcher.objects().len();
    assert!(loaded >= 20);

    fetcher.set_reached_end(false);
    settle().await;
    let calls = backend.fetch_calls();

    fetcher.set_reached_end(true);
    settle().await;
    assert!(backend.fetch_calls() > calls);
    assert!(fetcher.objects().len() > loaded);
}

#[tokio::test(start_paused = true)]
async fn short_page_latches_exhaustion() {
    let backend = MockBackend::new(rows(30));
    let fetcher = InfiniteObjectFetcher::new(backend.clone());

    fetcher.reset();
    settle().await;

    assert_eq!(fetcher.objects().len(), 30);
    assert!(!fetcher.has_more_objects());

    // Once exhausted, end-of-list signals stop fetching for good
    let calls = backend.fetch_calls();
    fetcher.set_reached_end(false);
    fetcher.set_reached_end(true);
    settle().await;
    assert_eq!(backend.fetch_calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn filter_change_restarts_the_list() {
    let backend = MockBackend::new(rows(100));
    let fetcher = InfiniteObjectFetcher::new(backend.clone());

    fetcher.reset();
    fetcher.fetch_if_needed().await.unwrap();

    fetcher.set_filter(Some(Filter::eq("name", "ada")));
    settle().await;

    for object in fetcher.objects() {
        assert_eq!(object.name, "ada");
    }
    assert_eq!(fetcher.objects().len(), 20, "100 rows cycle 5 names");
    assert!(!fetcher.has_more_objects());
}

#[tokio::test(start_paused = true)]
async fn network_error_retries_with_backoff() {
    let backend = MockBackend::new(rows(100));
    backend.fail_next_network(1);
    let fetcher = InfiniteObjectFetcher::new(backend.clone());

    fetcher.reset();
    settle().await;
    assert!(fetcher.objects().is_empty());
    assert_eq!(fetcher.error_state(), None);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(!fetcher.objects().is_empty());
}

#[tokio::test(start_paused = true)]
async fn backend_error_parks_until_reset() {
    let backend = MockBackend::new(rows(100));
    backend.fail_with_backend_error(FetchError::backend("forbidden", "no access"));
    let fetcher = InfiniteObjectFetcher::new(backend.clone());

    fetcher.reset();
    settle().await;
    assert!(fetcher.error_state().is_some());

    let calls = backend.fetch_calls();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(backend.fetch_calls(), calls, "no automatic retry for backend errors");

    backend.clear_failures();
    fetcher.reset();
    settle().await;
    assert_eq!(fetcher.error_state(), None);
    assert!(!fetcher.objects().is_empty());
}
