//! Per-location cache of skeets, kept current by watermark sync.
//!
//! Each location's list is sorted newest first. An incremental fetch asks the
//! store only for posts strictly newer than the newest cached timestamp and
//! merges them in, so history is never downloaded twice. Posts that arrive
//! late with an older timestamp are missed by this; `fetch_window` backfills
//! a time range explicitly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use indexmap::IndexMap;
use tracing::{debug, error, info};

use super::fetch::{self, SkeetLayout, EPOCH_WATERMARK};
use super::notify::{Listeners, Subscription};
use super::staleness;
use super::storage::StorageBackend;
use super::store::{PersistedStore, StorageKeys};
use super::CacheOptions;
use crate::api::DocumentStore;
use crate::models::skeet::{merge_skeets, watermark};
use crate::models::Skeet;
use crate::utils::cmp_timestamps;

const SKEET_KEYS: StorageKeys = StorageKeys {
    data: "skeetCache",
    initialized: None,
    last_fetch: "skeetCacheLastFetch",
};

const LOAD_LATEST_FAILED: &str = "Failed to load latest skeets.";

type InFlight = Shared<BoxFuture<'static, ()>>;

fn load_skeets_failed(location_id: &str) -> String {
    format!("Failed to load skeets for location {}.", location_id)
}

struct State {
    store: PersistedStore<Vec<Skeet>>,
    /// Running fetches per location.
    loading: HashMap<String, usize>,
    error: Option<String>,
    in_flight: HashMap<String, InFlight>,
}

struct Inner {
    remote: Arc<dyn DocumentStore>,
    state: Mutex<State>,
    listeners: Listeners,
}

/// Skeet cache handle, keyed by owning location id. Clones share one cache.
#[derive(Clone)]
pub struct SkeetCache {
    inner: Arc<Inner>,
}

impl SkeetCache {
    pub fn new(
        remote: Arc<dyn DocumentStore>,
        storage: Arc<dyn StorageBackend>,
        options: CacheOptions,
    ) -> Self {
        let backend = options.persist_to_disk.then_some(storage);
        let mut store = PersistedStore::new(backend, SKEET_KEYS);
        store.rehydrate();

        Self {
            inner: Arc::new(Inner {
                remote,
                state: Mutex::new(State {
                    store,
                    loading: HashMap::new(),
                    error: None,
                    in_flight: HashMap::new(),
                }),
                listeners: Listeners::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track one fetch starting or finishing. Only the first start and the
    /// last finish for a location change what `is_loading` reports.
    fn set_loading(&self, location_id: &str, loading: bool) {
        let changed = {
            let mut state = self.lock();
            if loading {
                let running = state.loading.entry(location_id.to_string()).or_insert(0);
                *running += 1;
                *running == 1
            } else {
                let remaining = state.loading.get_mut(location_id).map(|running| {
                    *running -= 1;
                    *running
                });
                if remaining == Some(0) {
                    state.loading.remove(location_id);
                }
                remaining == Some(0)
            }
        };
        if changed {
            self.inner.listeners.notify();
        }
    }

    fn set_error(&self, error: Option<String>) {
        let changed = {
            let mut state = self.lock();
            let changed = state.error != error;
            state.error = error;
            changed
        };
        if changed {
            self.inner.listeners.notify();
        }
    }

    /// Merge `incoming` into a location's list and persist.
    fn merge_into(&self, location_id: &str, incoming: Vec<Skeet>, advance_last_fetch: bool) -> usize {
        let mut state = self.lock();
        let existing = state
            .store
            .entries
            .get(location_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let before = existing.len();
        let merged = merge_skeets(existing, incoming);
        let added = merged.len() - before;

        state.store.entries.insert(location_id.to_string(), merged);
        if advance_last_fetch {
            state.store.last_fetch = Some(Utc::now());
        }
        state.store.persist();
        added
    }

    // ===== Fetching =====

    /// Refresh every cached location when the snapshot is stale; otherwise
    /// just notify listeners.
    pub async fn initialize(&self) {
        let stale_ids: Vec<String> = {
            let state = self.lock();
            if staleness::is_stale(state.store.last_fetch, Utc::now()) {
                state.store.entries.keys().cloned().collect()
            } else {
                Vec::new()
            }
        };

        if stale_ids.is_empty() {
            debug!("Using existing skeet cache");
            self.inner.listeners.notify();
            return;
        }

        info!(locations = stale_ids.len(), "Refreshing stale skeet cache");
        join_all(stale_ids.iter().map(|id| self.fetch_incremental(id))).await;
    }

    /// Fetch a location's skeets unless a fresh copy is already cached.
    pub async fn fetch_skeets(&self, location_id: &str) {
        let needs_fetch = {
            let state = self.lock();
            !state.store.entries.contains_key(location_id)
                || staleness::is_stale(state.store.last_fetch, Utc::now())
        };

        if needs_fetch {
            self.fetch_incremental(location_id).await;
        } else {
            debug!(location_id = location_id, "Using cached skeets");
            self.inner.listeners.notify();
        }
    }

    /// Fetch posts newer than the newest cached one for `location_id`.
    ///
    /// Concurrent calls for the same location share a single request.
    pub async fn fetch_incremental(&self, location_id: &str) {
        if location_id.is_empty() {
            return;
        }

        let pending = {
            let mut state = self.lock();
            match state.in_flight.get(location_id) {
                Some(fetch) => {
                    debug!(location_id = location_id, "Skeet fetch already in progress");
                    fetch.clone()
                }
                None => {
                    let fetch = self
                        .clone()
                        .incremental_fetch(location_id.to_string())
                        .boxed()
                        .shared();
                    state.in_flight.insert(location_id.to_string(), fetch.clone());
                    fetch
                }
            }
        };
        pending.await;
    }

    async fn incremental_fetch(self, location_id: String) {
        self.set_loading(&location_id, true);
        self.set_error(None);

        let since = {
            let state = self.lock();
            state
                .store
                .entries
                .get(&location_id)
                .and_then(|skeets| watermark(skeets))
                .unwrap_or(EPOCH_WATERMARK)
                .to_string()
        };
        debug!(location_id = %location_id, since = %since, "Fetching new skeets");

        let query = fetch::skeets_after_query(&location_id, &since);
        match self.inner.remote.run_query(&query).await {
            Ok(docs) => {
                let incoming = fetch::skeets_from_documents(&docs, SkeetLayout::Nested);
                let added = self.merge_into(&location_id, incoming, true);
                info!(location_id = %location_id, added, "Incremental skeet fetch complete");
                self.inner.listeners.notify();
            }
            Err(e) => {
                error!(location_id = %location_id, error = %e, "Error fetching skeets");
                self.set_error(Some(fetch::failure_message(&e, &load_skeets_failed(&location_id))));
            }
        }

        self.lock().in_flight.remove(&location_id);
        self.set_loading(&location_id, false);
    }

    /// Fetch posts between `start` and `end` (inclusive) and
    /// merge them in. Does not count as a refresh for staleness purposes.
    pub async fn fetch_window(&self, location_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) {
        if location_id.is_empty() {
            return;
        }
        self.set_loading(location_id, true);

        let (start, end) = (start.to_rfc3339(), end.to_rfc3339());
        let query = fetch::skeets_between_query(location_id, &start, &end);
        match self.inner.remote.run_query(&query).await {
            Ok(docs) => {
                let incoming = fetch::skeets_from_documents(&docs, SkeetLayout::Nested);
                let added = self.merge_into(location_id, incoming, false);
                info!(location_id = location_id, added, start = %start, end = %end, "Skeet window fetch complete");
                self.inner.listeners.notify();
            }
            Err(e) => {
                error!(location_id = location_id, error = %e, "Error fetching skeet window");
                self.set_error(Some(fetch::failure_message(&e, &load_skeets_failed(location_id))));
            }
        }

        self.set_loading(location_id, false);
    }

    /// The newest posts across every location. Not cached.
    pub async fn fetch_latest_global(&self, limit: u32) -> Vec<Skeet> {
        match self.inner.remote.run_query(&fetch::latest_global_query(limit)).await {
            Ok(docs) => {
                let mut skeets = fetch::skeets_from_documents(&docs, SkeetLayout::Flat);
                skeets.sort_by(|a, b| cmp_timestamps(&b.timestamp, &a.timestamp));
                debug!(count = skeets.len(), "Fetched latest skeets");
                skeets
            }
            Err(e) => {
                error!(error = %e, "Error fetching latest skeets");
                self.set_error(Some(fetch::failure_message(&e, LOAD_LATEST_FAILED)));
                Vec::new()
            }
        }
    }

    // ===== Reads =====

    /// Cached skeets for a location, newest first.
    pub fn get_skeets(&self, location_id: &str) -> Vec<Skeet> {
        self.lock()
            .store
            .entries
            .get(location_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every cached skeet across locations, newest first.
    pub fn get_all(&self) -> Vec<Skeet> {
        let mut all: Vec<Skeet> = self.lock().store.entries.values().flatten().cloned().collect();
        all.sort_by(|a, b| cmp_timestamps(&b.timestamp, &a.timestamp));
        all
    }

    /// The whole map, keyed by location id.
    pub fn snapshot(&self) -> IndexMap<String, Vec<Skeet>> {
        self.lock().store.entries.clone()
    }

    pub fn is_loading(&self, location_id: &str) -> bool {
        self.lock().loading.contains_key(location_id)
    }

    pub fn any_loading(&self) -> bool {
        !self.lock().loading.is_empty()
    }

    /// Same as `any_loading`.
    pub fn get_loading(&self) -> bool {
        self.any_loading()
    }

    pub fn get_error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub fn last_fetched(&self) -> Option<DateTime<Utc>> {
        self.lock().store.last_fetch
    }

    // ===== Subscriptions and Lifecycle =====

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(listener)
    }

    pub fn rehydrate(&self) {
        self.lock().store.rehydrate();
        self.inner.listeners.notify();
    }

    pub fn clear(&self) {
        {
            let mut state = self.lock();
            state.store.clear();
            state.loading.clear();
        }
        info!("Skeet cache cleared");
        self.inner.listeners.notify();
    }

    /// Forget one location's skeets.
    pub fn clear_location(&self, location_id: &str) {
        {
            let mut state = self.lock();
            state.store.entries.shift_remove(location_id);
            state.loading.remove(location_id);
            state.store.persist();
        }
        debug!(location_id = location_id, "Cleared skeets for location");
        self.inner.listeners.notify();
    }

    pub fn dispose(&self) {
        self.inner.listeners.clear();
    }
}
