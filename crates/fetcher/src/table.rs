//! Windowed table fetcher.
//!
//! Feeds a virtualized table view with exactly the rows scrolled into
//! view. The fetcher keeps a materialized prefix of the result set and
//! grows it when the visible window extends past it; filter, sort and
//! search changes reset the prefix and start over. Total and filtered
//! counts load as concurrent tasks and never block row fetching.
//!
//! Every request is tagged with the clear index current at send time; a
//! reset bumps the index, so responses from before the reset are discarded
//! instead of corrupting newer state. Network errors retry with capped
//! backoff, backend errors park the fetcher until an explicit reset.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use appello_query::filter::{Filter, merge_filters};
use appello_query::request::{CountFilteredRequest, LimitedFilteredRequest};
use appello_query::sort::SortList;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::drain::{self, FetchAllOptions};
use crate::error::FetchError;
use crate::source::{ListObject, ObjectFetcher};

/// Debounce applied to search query changes.
const SEARCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Retry backoff per failed attempt, capped at [`RETRY_CAP`].
const RETRY_STEP: Duration = Duration::from_secs(5);
const RETRY_CAP: Duration = Duration::from_secs(20);

/// Shorter floor applied immediately so a reset during the backoff window
/// still waits before refetching.
const RETRY_DEBOUNCE_STEP: Duration = Duration::from_millis(200);

/// Tuning knobs for a table fetcher.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Preferred page size.
    pub limit: u32,
    /// Hard cap on any single request.
    pub max_limit: u32,
    /// Smallest batch worth requesting.
    pub minimum_limit: u32,
    /// Extra rows fetched past the visible window.
    pub fetch_margin: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            max_limit: 100,
            minimum_limit: 20,
            fetch_margin: 0,
        }
    }
}

/// Client-side state machine coordinating windowed list loading.
///
/// Cheap to clone; all clones share the same state. UI bindings subscribe
/// to [`TableObjectFetcher::subscribe`] and read the accessors on every
/// change notification.
pub struct TableObjectFetcher<F: ObjectFetcher> {
    inner: Arc<Inner<F>>,
}

impl<F: ObjectFetcher> Clone for TableObjectFetcher<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<F: ObjectFetcher> {
    source: F,
    config: FetcherConfig,
    state: Mutex<State<F::Object>>,
    changed: watch::Sender<u64>,
    cancel: CancellationToken,
}

struct State<O> {
    objects: Vec<Arc<O>>,
    /// Objects from before the last reset, kept so re-fetched rows keep
    /// their allocation and subscribers keep pointer identity.
    cache: HashMap<String, Arc<O>>,
    base_filter: Option<Filter>,
    search_query: String,
    sort: SortList,
    start_index: usize,
    end_index: usize,
    total_count: Option<u64>,
    total_filtered_count: Option<u64>,
    fetching_count: bool,
    fetching_filtered_count: bool,
    fetching_data: bool,
    delay_fetch_until: Option<Instant>,
    retry_count: u32,
    retry_timer: Option<AbortHandle>,
    error_state: Option<FetchError>,
    clear_index: u64,
    next_request: Option<LimitedFilteredRequest>,
}

impl<O> Default for State<O> {
    fn default() -> Self {
        Self {
            objects: Vec::new(),
            cache: HashMap::new(),
            base_filter: None,
            search_query: String::new(),
            sort: Vec::new(),
            start_index: 0,
            end_index: 0,
            total_count: None,
            total_filtered_count: None,
            fetching_count: false,
            fetching_filtered_count: false,
            fetching_data: false,
            delay_fetch_until: None,
            retry_count: 0,
            retry_timer: None,
            error_state: None,
            clear_index: 0,
            next_request: None,
        }
    }
}

impl<O> State<O> {
    fn has_filter(&self) -> bool {
        self.base_filter.is_some() || !self.search_query.is_empty()
    }

    fn cancel_retry(&mut self) {
        if let Some(handle) = self.retry_timer.take() {
            handle.abort();
        }
    }
}

/// What one pass through the fetch loop decided to do, computed under the
/// state lock and executed after releasing it.
struct FetchPlan {
    clear_index: u64,
    /// Start the unfiltered total count; `true` also resolves the filtered
    /// count from the same number.
    fetch_total: Option<bool>,
    fetch_filtered: Option<CountFilteredRequest>,
    fetch: Option<LimitedFilteredRequest>,
}

impl<F: ObjectFetcher> TableObjectFetcher<F> {
    pub fn new(source: F) -> Self {
        Self::with_config(source, FetcherConfig::default())
    }

    pub fn with_config(source: F, config: FetcherConfig) -> Self {
        let (changed, _) = watch::channel(0);
        let fetcher = Self {
            inner: Arc::new(Inner {
                source,
                config,
                state: Mutex::new(State::default()),
                changed,
                cancel: CancellationToken::new(),
            }),
        };
        // Seed the first-page request so the first visible window can fetch
        // without an explicit reset
        {
            let mut state = fetcher.inner.state.lock();
            state.next_request = Some(LimitedFilteredRequest {
                filter: fetcher.merged_filter(&None),
                page_filter: None,
                sort: fetcher.inner.source.extend_sort(Vec::new()),
                limit: fetcher.inner.config.minimum_limit,
                search: None,
            });
        }
        fetcher
    }

    /// Currently materialized prefix of the result set.
    pub fn objects(&self) -> Vec<Arc<F::Object>> {
        self.inner.state.lock().objects.clone()
    }

    /// Unfiltered total, once the count query resolved.
    pub fn total_count(&self) -> Option<u64> {
        self.inner.state.lock().total_count
    }

    /// Total matching the active filter and search, once resolved.
    pub fn total_filtered_count(&self) -> Option<u64> {
        self.inner.state.lock().total_filtered_count
    }

    /// Terminal error, set by a non-network failure until the next reset.
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

    /// The base filter merged with the source's required filter.
    fn merged_filter(&self, base: &Option<Filter>) -> Option<Filter> {
        merge_filters([base.clone(), self.inner.source.required_filter()])
    }

    /// Replace the base filter; a no-op when the filter is unchanged.
    pub fn set_filter(&self, filter: Option<Filter>) {
        {
            let mut state = self.inner.state.lock();
            if normalized(&state.base_filter) == normalized(&filter) {
                debug!("filter unchanged");
                return;
            }
            state.base_filter = filter;
        }
        self.reset(false, true);
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
        self.reset(false, false);
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
        self.reset(false, true);
    }

    /// Update the visible row window, fetching if it extends past the
    /// materialized rows.
    pub fn set_visible(&self, start_index: usize, end_index: usize) {
        {
            let mut state = self.inner.state.lock();
            if state.start_index == start_index && state.end_index == end_index {
                return;
            }
            debug!(start_index, end_index, "set visible window");
            state.start_index = start_index;
            state.end_index = end_index;
        }
        self.spawn_fetch();
    }

    /// Discard materialized rows and start over with the current filter,
    /// sort and search. Clears any terminal error state.
    pub fn reset(&self, clear_total: bool, clear_filtered: bool) {
        info!("reset");
        {
            let mut state = self.inner.state.lock();
            state.clear_index += 1;

            let objects = std::mem::take(&mut state.objects);
            for object in objects {
                state.cache.insert(object.id().to_string(), object);
            }

            if clear_total {
                state.total_count = None;
            }
            if clear_filtered {
                state.total_filtered_count = None;
            }
            if state.total_count.is_some() && !state.has_filter() {
                state.total_filtered_count = state.total_count;
            }

            state.fetching_count = false;
            state.fetching_filtered_count = false;
            state.fetching_data = false;
            state.error_state = None;
            state.retry_count = 0;
            state.cancel_retry();

            state.next_request = Some(LimitedFilteredRequest {
                filter: self.merged_filter(&state.base_filter),
                page_filter: None,
                sort: self.inner.source.extend_sort(state.sort.clone()),
                limit: self.inner.config.minimum_limit,
                search: none_if_empty(&state.search_query),
            });
        }
        self.notify();
        self.spawn_fetch();
    }

    /// Tear down: cancel in-flight work and timers, drop rows and caches.
    pub fn destroy(&self) {
        self.inner.cancel.cancel();
        {
            let mut state = self.inner.state.lock();
            state.clear_index += 1;
            state.cancel_retry();
            state.objects = Vec::new();
            state.cache = HashMap::new();
            state.next_request = None;
            state.fetching_data = false;
            state.fetching_count = false;
            state.fetching_filtered_count = false;
        }
        self.notify();
    }

    fn spawn_fetch(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(error) = this.fetch_if_needed().await {
                debug!(error = %error, "background fetch failed");
            }
        });
    }

    /// Fetch rows until the visible window is covered, starting counts on
    /// the way. Safe to call at any time; no-ops when nothing is needed
    /// or a fetch is already running.
    pub async fn fetch_if_needed(&self) -> Result<(), FetchError> {
        loop {
            if self.inner.cancel.is_cancelled() {
                return Ok(());
            }

            let plan = self.plan_fetch();

            if let Some(also_filtered) = plan.fetch_total {
                self.spawn_total_count(plan.clear_index, also_filtered);
            }
            if let Some(request) = plan.fetch_filtered {
                self.spawn_filtered_count(plan.clear_index, request);
            }

            let Some(request) = plan.fetch else {
                return Ok(());
            };

            info!(limit = request.limit, "started fetch");
            self.notify();

            let result = tokio::select! {
                _ = self.inner.cancel.cancelled() => return Ok(()),
                result = self.inner.source.fetch(&request) => result,
            };

            match result {
                Ok(page) => {
                    let exhausted = {
                        let mut state = self.inner.state.lock();
                        if state.clear_index != plan.clear_index {
                            warn!("discarded stale fetch result");
                            return Ok(());
                        }
                        state.fetching_data = false;
                        state.retry_count = 0;
                        apply_page(&mut *state, page, request.limit)
                    };
                    self.notify();
                    if exhausted {
                        return Ok(());
                    }
                    // Window may still extend past what we have now
                }
                Err(error) => {
                    let current = {
                        let mut state = self.inner.state.lock();
                        if state.clear_index == plan.clear_index {
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

    /// Decide, under the lock, what this pass should do.
    fn plan_fetch(&self) -> FetchPlan {
        let mut state = self.inner.state.lock();
        let mut plan = FetchPlan {
            clear_index: state.clear_index,
            fetch_total: None,
            fetch_filtered: None,
            fetch: None,
        };

        if state.fetching_data {
            debug!("already fetching data");
            return plan;
        }
        if state.error_state.is_some() {
            debug!("skipped fetch due to error state");
            return plan;
        }
        if state.end_index == 0 {
            debug!("skipped fetch: no visible window yet");
            return plan;
        }
        if let Some(until) = state.delay_fetch_until
            && Instant::now() < until
        {
            debug!("delayed fetch");
            self.schedule_wakeup(&mut *state, until);
            return plan;
        }

        let has_filter = state.has_filter();
        if (!state.fetching_count && state.total_count.is_none())
            || (!has_filter && !state.fetching_filtered_count && state.total_filtered_count.is_none())
        {
            state.fetching_count = true;
            if !has_filter {
                state.fetching_filtered_count = true;
            }
            plan.fetch_total = Some(!has_filter);
        }
        if has_filter && !state.fetching_filtered_count && state.total_filtered_count.is_none() {
            state.fetching_filtered_count = true;
            plan.fetch_filtered = Some(CountFilteredRequest {
                filter: self.merged_filter(&state.base_filter),
                search: none_if_empty(&state.search_query),
            });
        }

        let Some(next) = &state.next_request else {
            debug!("no next request");
            return plan;
        };

        let wanted = state.end_index + 1 + self.inner.config.fetch_margin;
        let fetch_until = match state.total_filtered_count {
            Some(total) => wanted.min(total as usize),
            None => wanted,
        };
        if fetch_until <= state.objects.len() {
            debug!(
                have = state.objects.len(),
                until = fetch_until,
                "window already covered"
            );
            return plan;
        }

        let gap = (fetch_until - state.objects.len()) as u32;
        let limit = gap
            .min(self.inner.config.limit)
            .max(self.inner.config.minimum_limit)
            .min(self.inner.config.max_limit);

        let mut request = next.clone();
        request.limit = limit;
        // The filter and sort stay authoritative on our side: a source may
        // have echoed modified versions back in the next-page request
        request.filter = self.merged_filter(&state.base_filter);
        request.sort = self.inner.source.extend_sort(state.sort.clone());
        request.search = none_if_empty(&state.search_query);

        state.fetching_data = true;
        state.cancel_retry();
        plan.fetch = Some(request);
        plan
    }

    fn spawn_total_count(&self, clear_index: u64, also_filtered: bool) {
        let this = self.clone();
        tokio::spawn(async move {
            let request = CountFilteredRequest {
                filter: this.inner.source.required_filter(),
                search: None,
            };
            let result = tokio::select! {
                _ = this.inner.cancel.cancelled() => return,
                result = this.inner.source.fetch_count(&request) => result,
            };
            match result {
                Ok(count) => {
                    {
                        let mut state = this.inner.state.lock();
                        if state.clear_index != clear_index {
                            return;
                        }
                        state.total_count = Some(count);
                        state.fetching_count = false;
                        if also_filtered {
                            state.total_filtered_count = Some(count);
                            state.fetching_filtered_count = false;
                        }
                    }
                    this.notify();
                    // The filtered total can shrink the wanted window
                    this.spawn_fetch();
                }
                Err(error) => {
                    debug!(error = %error, "total count fetch failed");
                    let mut state = this.inner.state.lock();
                    if state.clear_index == clear_index {
                        state.fetching_count = false;
                        if also_filtered {
                            state.fetching_filtered_count = false;
                        }
                    }
                }
            }
        });
    }

    fn spawn_filtered_count(&self, clear_index: u64, request: CountFilteredRequest) {
        let this = self.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = this.inner.cancel.cancelled() => return,
                result = this.inner.source.fetch_count(&request) => result,
            };
            match result {
                Ok(count) => {
                    {
                        let mut state = this.inner.state.lock();
                        if state.clear_index != clear_index {
                            return;
                        }
                        state.total_filtered_count = Some(count);
                        state.fetching_filtered_count = false;
                    }
                    this.notify();
                }
                Err(error) => {
                    debug!(error = %error, "filtered count fetch failed");
                    let mut state = this.inner.state.lock();
                    if state.clear_index == clear_index {
                        state.fetching_filtered_count = false;
                    }
                }
            }
        });
    }

    /// Schedule a retry after a failed fetch. Network errors back off and
    /// retry; anything else parks in the error state until a reset.
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

    /// Arm a one-shot timer that re-enters the fetch loop once the current
    /// delay window has passed.
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

    /// Drain every page matching the current filter and search, bypassing
    /// the window. Uses the default sort and the configured maximum page
    /// size.
    pub async fn fetch_all(&self, options: FetchAllOptions) -> Result<Vec<F::Object>, FetchError> {
        let request = {
            let state = self.inner.state.lock();
            LimitedFilteredRequest {
                filter: self.merged_filter(&state.base_filter),
                page_filter: None,
                sort: Vec::new(),
                limit: self.inner.config.max_limit,
                search: none_if_empty(&state.search_query),
            }
        };
        drain::fetch_all(request, &self.inner.source, options).await
    }
}

/// Append a fetched page, reusing cached allocations for unchanged rows.
/// Returns whether fetching should stop because the data ran out.
fn apply_page<O: ListObject + Clone + PartialEq>(
    state: &mut State<O>,
    page: appello_query::request::PaginatedResponse<O>,
    limit: u32,
) -> bool {
    let received = page.results.len();
    state.next_request = page.next;

    for object in page.results {
        if cfg!(debug_assertions)
            && state.objects.iter().any(|existing| existing.id() == object.id())
        {
            // A row coming back twice means the backend paginated wrongly
            warn!(id = object.id(), "duplicate object in fetched page");
        }

        let arc = match state.cache.get(object.id()) {
            Some(cached) if **cached == object => Arc::clone(cached),
            _ => {
                let arc = Arc::new(object);
                state.cache.insert(arc.id().to_string(), Arc::clone(&arc));
                arc
            }
        };
        state.objects.push(arc);
    }

    let materialized = state.objects.len() as u64;
    if received < limit as usize
        && state.total_filtered_count.is_none_or(|total| materialized < total)
    {
        warn!("unexpected end of data");
        state.total_filtered_count = Some(materialized);
        if !state.has_filter() {
            state.total_count = Some(materialized);
        }
        return true;
    }

    state.next_request.is_none()
}

/// Compare filters treating empty trees as absent.
fn normalized(filter: &Option<Filter>) -> Option<&Filter> {
    filter.as_ref().filter(|f| !f.is_empty())
}

fn none_if_empty(search: &str) -> Option<String> {
    if search.is_empty() {
        None
    } else {
        Some(search.to_string())
    }
}
