#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Shared test backend: an in-memory dataset paginated with the real
//! filter compiler, comparator and keyset engine, so fetcher tests
//! exercise the same pagination contract a SQL backend implements.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use appello_fetcher::{FetchError, ListObject, ObjectFetcher};
use appello_query::{
    CountFilteredRequest, Filter, FilterDefinitions, FilterValue, LimitedFilteredRequest,
    PaginatedResponse, SortDefinitions, SortItem, compile_filter, compile_sorter, merge_filters,
    next_request,
};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Row {
    pub id: String,
    pub age: i64,
    pub name: String,
}

impl ListObject for Row {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Deterministic dataset with repeated ages so tiebreakers matter.
pub fn rows(count: usize) -> Vec<Row> {
    let names = ["ada", "grace", "mila", "noor", "finn"];
    (0..count)
        .map(|i| Row {
            id: format!("m{i:04}"),
            age: 10 + (i as i64 % 7),
            name: names[i % names.len()].to_string(),
        })
        .collect()
}

fn sort_definitions() -> SortDefinitions<Row> {
    SortDefinitions::new()
        .key("id", |row: &Row| FilterValue::String(row.id.clone()))
        .key("age", |row: &Row| FilterValue::Integer(row.age))
        .key("name", |row: &Row| FilterValue::String(row.name.clone()))
}

fn filter_definitions() -> FilterDefinitions {
    FilterDefinitions::new()
        .field("id", "id")
        .field("age", "age")
        .field("name", "name")
}

struct MockState {
    rows: Mutex<Vec<Row>>,
    fetch_calls: AtomicUsize,
    count_calls: AtomicUsize,
    fail_network: AtomicUsize,
    fail_backend: Mutex<Option<FetchError>>,
    fetch_delay: Mutex<Option<Duration>>,
    requests: Mutex<Vec<LimitedFilteredRequest>>,
}

/// In-memory [`ObjectFetcher`] with failure injection and call recording.
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<MockState>,
}

impl MockBackend {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            state: Arc::new(MockState {
                rows: Mutex::new(rows),
                fetch_calls: AtomicUsize::new(0),
                count_calls: AtomicUsize::new(0),
                fail_network: AtomicUsize::new(0),
                fail_backend: Mutex::new(None),
                fetch_delay: Mutex::new(None),
                requests: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn fetch_calls(&self) -> usize {
        self.state.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn count_calls(&self) -> usize {
        self.state.count_calls.load(Ordering::SeqCst)
    }

    /// Page requests received, in order.
    pub fn requests(&self) -> Vec<LimitedFilteredRequest> {
        self.state.requests.lock().clone()
    }

    /// Fail the next `count` page fetches with a network error.
    pub fn fail_next_network(&self, count: usize) {
        self.state.fail_network.store(count, Ordering::SeqCst);
    }

    /// Fail every page fetch with a backend error until cleared.
    pub fn fail_with_backend_error(&self, error: FetchError) {
        *self.state.fail_backend.lock() = Some(error);
    }

    pub fn clear_failures(&self) {
        self.state.fail_network.store(0, Ordering::SeqCst);
        *self.state.fail_backend.lock() = None;
    }

    /// Delay every page fetch, for staleness tests.
    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.state.fetch_delay.lock() = Some(delay);
    }

    fn matching_rows(&self, filter: Option<&Filter>, search: Option<&str>) -> Vec<Row> {
        let search_filter = search.map(|q| Filter::contains("name", q));
        let merged = merge_filters([filter.cloned(), search_filter]);
        let runner = merged.map(|f| {
            compile_filter(&f, &filter_definitions()).unwrap_or_else(|e| panic!("bad filter: {e}"))
        });

        self.state
            .rows
            .lock()
            .iter()
            .filter(|row| {
                runner.as_ref().is_none_or(|r| {
                    r(&serde_json::to_value(row).unwrap_or_else(|e| panic!("bad row: {e}")))
                })
            })
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl ObjectFetcher for MockBackend {
    type Object = Row;

    async fn fetch(
        &self,
        request: &LimitedFilteredRequest,
    ) -> Result<PaginatedResponse<Row>, FetchError> {
        self.state.requests.lock().push(request.clone());
        self.state.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self
            .state
            .fail_network
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(FetchError::network("connection refused"));
        }
        if let Some(error) = self.state.fail_backend.lock().clone() {
            return Err(error);
        }

        let merged = appello_query::merge_filters([
            request.filter.clone(),
            request.page_filter.clone(),
        ]);
        let mut page = self.matching_rows(merged.as_ref(), request.search.as_deref());

        // An empty sort falls back to the backend's default ordering
        let mut effective = request.clone();
        if effective.sort.is_empty() {
            effective.sort = vec![SortItem::asc("id")];
        }

        let sorter = compile_sorter(&effective.sort, &sort_definitions())
            .unwrap_or_else(|e| panic!("bad sort: {e}"));
        page.sort_by(|a, b| sorter(a, b));
        page.truncate(effective.limit as usize);

        let next = next_request(&page, &sort_definitions(), &effective)
            .unwrap_or_else(|e| panic!("bad next request: {e}"));

        Ok(PaginatedResponse::new(page, next))
    }

    async fn fetch_count(&self, request: &CountFilteredRequest) -> Result<u64, FetchError> {
        self.state.count_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .matching_rows(request.filter.as_ref(), request.search.as_deref())
            .len() as u64)
    }
}
