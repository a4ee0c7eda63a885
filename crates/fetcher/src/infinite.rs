//! Append-only infinite list fetcher.
//!
//! Simpler contract than the windowed table fetcher: the view only signals
//! whether the user has reached (almost) the end of the rendered list, and
//! the fetcher appends one more page when it has. Loading stops for good
//! once a page comes back shorter than requested. No counts are fetched.

use std::sync::Arc;
use std::time::Duration;

use appello_query::filter::{Filter, merge_filters};
use appello_query::request::LimitedFilteredRequest;
use appello_query::sort::SortList;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::source::{ListObject, ObjectFetcher};

/// Default page size for infinite lists.
const DEFAULT_LIMIT: u32 = 20;

/// Debounce applied to search query changes.
const SEARCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Pause between automatic continuations so the view can render the rows
/// it already has.
const RENDER_PAUSE: Duration = Duration::from_millis(150);

const RETRY_STEP: Duration = Duration::from_secs(5);
const RETRY_CAP: Duration = Duration::from_secs(20);
const RETRY_DEBOUNCE_STEP: Duration = Duration::from_millis(200);

/// Client-side state machine for infinite scrolling.
pub struct InfiniteObjectFetcher<F: ObjectFetcher> {
    inner: Arc<Inner<F>>,
}

impl<F: ObjectFetcher> Clone for InfiniteObjectFetcher<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<F: ObjectFetcher> {
    source: F,
    limit: u32,
    state: Mutex<State<F::Object>>,
    changed: watch::Sender<u64>,
    cancel: CancellationToken,
}

struct State<O> {
    objects: Vec<Arc<O>>,
    base_filter: Option<Filter>,
    search_query: String,
    sort: SortList,
    fetching_data: bool,
    delay_fetch_until: Option<Instant>,
    retry_count: u32,
    retry_timer: Option<AbortHandle>,
    error_state: Option<FetchError>,
    /// The view is at (or near) the end of what it rendered.
    has_reached_end: bool,
    /// Latched false once a page comes back short.
    has_more_objects: bool,
    clear_index: u64,
    next_request: Option<LimitedFilteredRequest>,
}

impl<O> Default for State<O> {
    fn default() -> Self {
        Self {
            objects: Vec::new(),
            base_filter: None,
            search_query: String::new(),
            sort: Vec::new(),
            fetching_data: false,
            delay_fetch_until: None,
            retry_count: 0,
            retry_timer: None,
            error_state: None,
            has_reached_end: false,
            has_more_objects: true,
            clear_index: 0,
            next_request: None,
        }
    }
}

impl<O> State<O> {
    fn cancel_retry(&mut self) {
        if let Some(handle) = self.retry_timer.take() {
            handle.abort();
        }
    }
}

impl<F: ObjectFetcher> InfiniteObjectFetcher<F> {
    pub fn new(source: F) -> Self {
        Self::with_limit(source, DEFAULT_LIMIT)
    }

    pub fn with_limit(source: F, limit: u32) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                source,
                limit,
                state: Mutex::new(State::default()),
                changed,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn objects(&self) -> Vec<Arc<F::Object>> {
        self.inner.state.lock().objects.clone()
    }

    /// Whether more pages may exist.
    pub fn has_more_objects(&self) -> bool {
        self.inner.state.lock().has_more_objects
    }

    pub fn error_state(&self) -> Option<FetchError> {
        self.inner.state.lock().error_state.clone()
    }

    pub fn is_fetching(&self) -> bool {
        self.inner.state.lock().fetching_data
    }

    /// Change notifications: the value bumps on every state change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.changed.subscribe()
    }

    fn notify(&self) {
        self.inner.changed.send_modify(|version| *version += 1);
    }

    fn merged_filter(&self, base: &Option<Filter>) -> Option<Filter> {
        merge_filters([base.clone(), self.inner.source.required_filter()])
    }

    /// Replace the base filter; a no-op when unchanged.
    pub fn set_filter(&self, filter: Option<Filter>) {
        {
            let mut state = self.inner.state.lock();
            let normalized = |f: &Option<Filter>| f.clone().filter(|f| !f.is_empty());
            if normalized(&state.base_filter) == normalized(&filter) {
                debug!("filter unchanged");
                return;
            }
            state.base_filter = filter;
        }
        self.reset();
    }

    /// Replace the sort list; a no-op when unchanged.
    pub fn set_sort(&self, sort: SortList) {
        {
            let mut state = self.inner.state.lock();
            if state.sort == sort {
                return;
            }
            state.sort = sort;
        }
        self.reset();
    }

    /// Replace the search query, debounced; a no-op when unchanged.
    pub fn set_search_query(&self, query: impl Into<String>) {
        let query = query.into();
        {
            let mut state = self.inner.state.lock();
            if state.search_query == query {
                return;
            }
            state.delay_fetch_until = Some(Instant::now() + SEARCH_DEBOUNCE);
            state.search_query = query;
        }
        self.reset();
    }

    /// Signal whether the view has reached the end of its rendered list.
    pub fn set_reached_end(&self, has_reached_end: bool) {
        {
            let mut state = self.inner.state.lock();
            if state.has_reached_end == has_reached_end {
                return;
            }
            debug!(has_reached_end, "set reached end");
            state.has_reached_end = has_reached_end;
        }
        self.spawn_fetch();
    }

    /// Discard loaded rows and start over with the current filter, sort
    /// and search.
    pub fn reset(&self) {
        info!("reset");
        {
            let mut state = self.inner.state.lock();
            state.clear_index += 1;
            state.objects = Vec::new();
            state.has_more_objects = true;
            state.fetching_data = false;
            state.error_state = None;
            // Refill the cleared list right away
            state.has_reached_end = true;
            state.retry_count = 0;
            state.cancel_retry();
            state.next_request = Some(self.first_page_request(&*state));
        }
        self.notify();
        self.spawn_fetch();
    }

    /// Tear down: cancel in-flight work and timers, drop loaded rows.
    pub fn destroy(&self) {
        self.inner.cancel.cancel();
        {
            let mut state = self.inner.state.lock();
            state.clear_index += 1;
            state.cancel_retry();
            state.objects = Vec::new();
            state.next_request = None;
            state.fetching_data = false;
        }
        self.notify();
    }

    fn first_page_request(&self, state: &State<F::Object>) -> LimitedFilteredRequest {
        LimitedFilteredRequest {
            filter: self.merged_filter(&state.base_filter),
            page_filter: None,
            sort: self.inner.source.extend_sort(state.sort.clone()),
            limit: self.inner.limit,
            search: none_if_empty(&state.search_query),
        }
    }

    fn spawn_fetch(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(error) = this.fetch_if_needed().await {
                debug!(error = %error, "background fetch failed");
            }
        });
    }

    /// Append the next page when the view needs one. Safe to call at any
    /// time; no-ops when nothing is needed or a fetch is already running.
    pub async fn fetch_if_needed(&self) -> Result<(), FetchError> {
        loop {
            if self.inner.cancel.is_cancelled() {
                return Ok(());
            }

            let (request, clear_index) = {
                let mut state = self.inner.state.lock();
                if state.fetching_data {
                    debug!("already fetching data");
                    return Ok(());
                }
                if state.error_state.is_some() {
                    debug!("skipped fetch due to error state");
                    return Ok(());
                }
                if !state.has_reached_end && !state.objects.is_empty() {
                    debug!("skipped fetch: not at the end of the list");
                    return Ok(());
                }
                if !state.has_more_objects {
                    debug!("skipped fetch: no more objects");
                    return Ok(());
                }
                if let Some(until) = state.delay_fetch_until
                    && Instant::now() < until
                {
                    debug!("delayed fetch");
                    self.schedule_wakeup(&mut *state, until);
                    return Ok(());
                }

                let mut request = match state.next_request.take() {
                    Some(request) => request,
                    None => self.first_page_request(&*state),
                };
                request.limit = self.inner.limit;
                // The filter and sort stay authoritative on our side
                request.filter = self.merged_filter(&state.base_filter);
                request.sort = self.inner.source.extend_sort(state.sort.clone());
                request.search = none_if_empty(&state.search_query);

                state.fetching_data = true;
                state.cancel_retry();
                (request, state.clear_index)
            };

            info!(limit = request.limit, "started fetch");
            self.notify();

            let result = tokio::select! {
                _ = self.inner.cancel.cancelled() => return Ok(()),
                result = self.inner.source.fetch(&request) => result,
            };

            match result {
                Ok(page) => {
                    let has_more = {
                        let mut state = self.inner.state.lock();
                        if state.clear_index != clear_index {
                            warn!("discarded stale fetch result");
                            return Ok(());
                        }
                        state.fetching_data = false;
                        state.retry_count = 0;

                        let received = page.results.len();
                        state.next_request = page.next;
                        for object in page.results {
                            if cfg!(debug_assertions)
                                && state
                                    .objects
                                    .iter()
                                    .any(|existing| existing.id() == object.id())
                            {
                                warn!(id = object.id(), "duplicate object in fetched page");
                            }
                            state.objects.push(Arc::new(object));
                        }

                        if received < request.limit as usize {
                            info!("reached end of data");
                            state.has_more_objects = false;
                            false
                        } else {
                            // Give the view a beat to render before
                            // fetching the next page
                            state.delay_fetch_until = Some(Instant::now() + RENDER_PAUSE);
                            true
                        }
                    };
                    self.notify();
                    if !has_more {
                        return Ok(());
                    }
                }
                Err(error) => {
                    let current = {
                        let mut state = self.inner.state.lock();
                        if state.clear_index == clear_index {
                            state.fetching_data = false;
                            true
                        } else {
                            false
                        }
                    };
                    if !current {
                        return Ok(());
                    }
                    warn!(error = %error, "fetch failed");
                    self.schedule_retry(&error);
                    self.notify();
                    return Err(error);
                }
            }
        }
    }

    fn schedule_retry(&self, error: &FetchError) {
        let mut state = self.inner.state.lock();
        if state.retry_timer.is_some() {
            return;
        }
        if !error.is_network() {
            state.error_state = Some(error.clone());
            return;
        }

        state.retry_count += 1;
        let wait = (RETRY_STEP * state.retry_count).min(RETRY_CAP);
        let debounce = (RETRY_DEBOUNCE_STEP * state.retry_count).min(RETRY_CAP);
        state.delay_fetch_until = Some(Instant::now() + debounce);

        let this = self.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = this.inner.cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
            info!(seconds = wait.as_secs(), "retrying fetch");
            this.inner.state.lock().retry_timer = None;
            if let Err(error) = this.fetch_if_needed().await {
                debug!(error = %error, "retry fetch failed");
            }
        })
        .abort_handle();
        state.retry_timer = Some(handle);
    }

    fn schedule_wakeup(&self, state: &mut State<F::Object>, until: Instant) {
        if state.retry_timer.is_some() {
            return;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = this.inner.cancel.cancelled() => return,
                _ = tokio::time::sleep_until(until + Duration::from_millis(5)) => {}
            }
            this.inner.state.lock().retry_timer = None;
            if let Err(error) = this.fetch_if_needed().await {
                debug!(error = %error, "delayed fetch failed");
            }
        })
        .abort_handle();
        state.retry_timer = Some(handle);
    }
}

fn none_if_empty(search: &str) -> Option<String> {
    if search.is_empty() {
        None
    } else {
        Some(search.to_string())
    }
}
