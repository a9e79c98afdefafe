//! Read-through cache of disaster locations.
//!
//! `initialize` rehydrates nothing by itself (that happens on construction);
//! it evaluates staleness and, when needed, replaces the whole map with a
//! fresh query result. `fetch_and_update` refreshes a single location and
//! removes it when the remote document is gone.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, error, info, warn};

use super::fetch::{self, LOCATIONS_COLLECTION};
use super::notify::{Listeners, Subscription};
use super::staleness::{self, RefreshDecision};
use super::storage::StorageBackend;
use super::store::{PersistedStore, StorageKeys};
use super::CacheOptions;
use crate::api::DocumentStore;
use crate::models::{Category, Location};
use crate::utils::{age_display, cmp_timestamps, haversine_km};

const LOCATION_KEYS: StorageKeys = StorageKeys {
    data: "locationCache",
    initialized: Some("locationCacheInitialized"),
    last_fetch: "locationCacheLastFetch",
};

type InFlight = Shared<BoxFuture<'static, ()>>;

/// Orderings offered by the location list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationSort {
    NameAsc,
    NameDesc,
    /// Least recently active first.
    OldestFirst,
    /// Most recently active first.
    NewestFirst,
}

struct State {
    store: PersistedStore<Location>,
    loading: bool,
    error: Option<String>,
    in_flight: Option<InFlight>,
}

struct Inner {
    remote: Arc<dyn DocumentStore>,
    state: Mutex<State>,
    listeners: Listeners,
}

/// Location cache handle. Clone is cheap; clones share one cache.
#[derive(Clone)]
pub struct LocationCache {
    inner: Arc<Inner>,
}

impl LocationCache {
    /// Create the cache and load whatever snapshot `storage` holds.
    pub fn new(
        remote: Arc<dyn DocumentStore>,
        storage: Arc<dyn StorageBackend>,
        options: CacheOptions,
    ) -> Self {
        let backend = options.persist_to_disk.then_some(storage);
        let mut store = PersistedStore::new(backend, LOCATION_KEYS);
        store.rehydrate();

        Self {
            inner: Arc::new(Inner {
                remote,
                state: Mutex::new(State {
                    store,
                    loading: false,
                    error: None,
                    in_flight: None,
                }),
                listeners: Listeners::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ===== State Transitions =====

    fn set_loading(&self, loading: bool) {
        let changed = {
            let mut state = self.lock();
            let changed = state.loading != loading;
            state.loading = loading;
            changed
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

    // ===== Fetching =====

    /// Make sure the cache holds a reasonably fresh location list.
    ///
    /// Safe to call any number of times: concurrent callers share a single
    /// in-flight fetch, and a fresh cache only notifies listeners.
    pub async fn initialize(&self) {
        let pending = {
            let mut state = self.lock();
            let decision = staleness::decide(
                state.store.initialized,
                state.in_flight.is_some(),
                state.store.last_fetch,
                Utc::now(),
            );

            match decision {
                RefreshDecision::Fetch => {
                    if state.store.initialized {
                        info!("Refreshing stale location cache");
                    }
                    let fetch = self.clone().full_fetch().boxed().shared();
                    state.in_flight = Some(fetch.clone());
                    Some(fetch)
                }
                RefreshDecision::JoinInFlight => {
                    debug!("Location fetch already in progress");
                    state.in_flight.clone()
                }
                RefreshDecision::UseCached => None,
            }
        };

        match pending {
            Some(fetch) => fetch.await,
            None => {
                debug!(count = self.len(), "Using existing location cache");
                self.inner.listeners.notify();
            }
        }
    }

    async fn full_fetch(self) {
        self.set_loading(true);
        self.set_error(None);
        info!("Performing full location fetch");

        let query = fetch::active_locations_query(Utc::now());
        match self.inner.remote.run_query(&query).await {
            Ok(docs) => {
                let locations = fetch::locations_from_documents(&docs);
                let count = locations.len();
                {
                    let mut state = self.lock();
                    state.store.entries = locations
                        .into_iter()
                        .map(|location| (location.id.clone(), location))
                        .collect();
                    state.store.initialized = true;
                    state.store.last_fetch = Some(Utc::now());
                    state.store.persist();
                }
                info!(count, skipped = docs.len() - count, "Full location fetch complete");
                self.inner.listeners.notify();
            }
            Err(e) => {
                error!(error = %e, "Error during full location fetch");
                // Leave the flag down so the next initialize retries
                self.lock().store.initialized = false;
                self.set_error(Some(fetch::failure_message(&e, fetch::LOAD_LOCATIONS_FAILED)));
            }
        }

        self.lock().in_flight = None;
        self.set_loading(false);
    }

    /// Fetch one location by id and upsert it. A location that no longer
    /// exists remotely is removed; an invalid document is ignored.
    pub async fn fetch_and_update(&self, location_id: &str) {
        if location_id.is_empty() {
            return;
        }
        debug!(location_id = location_id, "Fetching individual location");

        match self.inner.remote.get_document(LOCATIONS_COLLECTION, location_id).await {
            Ok(Some(doc)) => match Location::from_document(&doc.id, &doc.data) {
                Ok(location) => {
                    {
                        let mut state = self.lock();
                        match state.store.entries.get_mut(location_id) {
                            Some(existing) => existing.merge_from(location),
                            None => {
                                state.store.entries.insert(location_id.to_string(), location);
                            }
                        }
                        state.store.persist();
                    }
                    info!(location_id = location_id, "Updated location");
                    self.inner.listeners.notify();
                }
                Err(e) => {
                    warn!(location_id = location_id, error = %e, "Fetched location is invalid, keeping cached copy");
                }
            },
            Ok(None) => {
                warn!(location_id = location_id, "Location no longer exists remotely");
                let removed = {
                    let mut state = self.lock();
                    let removed = state.store.entries.shift_remove(location_id).is_some();
                    if removed {
                        state.store.persist();
                    }
                    removed
                };
                if removed {
                    self.inner.listeners.notify();
                }
            }
            Err(e) => {
                error!(location_id = location_id, error = %e, "Error fetching individual location");
                self.set_error(Some(format!("Failed to refresh location {}.", location_id)));
            }
        }
    }

    // ===== Reads =====

    /// Every cached location, in the order the store returned them.
    pub fn get_all(&self) -> Vec<Location> {
        self.lock().store.entries.values().cloned().collect()
    }

    pub fn get(&self, location_id: &str) -> Option<Location> {
        self.lock().store.entries.get(location_id).cloned()
    }

    pub fn get_loading(&self) -> bool {
        self.lock().loading
    }

    pub fn get_error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().store.initialized
    }

    pub fn len(&self) -> usize {
        self.lock().store.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// When the last full refresh succeeded.
    pub fn last_fetched(&self) -> Option<DateTime<Utc>> {
        self.lock().store.last_fetch
    }

    /// "5m ago" style age of the last full refresh, or "never".
    pub fn age_display(&self) -> String {
        match self.last_fetched() {
            Some(ts) => age_display((Utc::now() - ts).num_minutes()),
            None => "never".to_string(),
        }
    }

    pub fn sorted(&self, sort: LocationSort) -> Vec<Location> {
        let mut locations = self.get_all();
        match sort {
            LocationSort::NameAsc => locations.sort_by_key(|l| l.name.to_lowercase()),
            LocationSort::NameDesc => {
                locations.sort_by_key(|l| std::cmp::Reverse(l.name.to_lowercase()))
            }
            LocationSort::OldestFirst => locations.sort_by(|a, b| {
                cmp_timestamps(
                    a.last_seen.as_deref().unwrap_or_default(),
                    b.last_seen.as_deref().unwrap_or_default(),
                )
            }),
            LocationSort::NewestFirst => locations.sort_by(|a, b| {
                cmp_timestamps(
                    b.last_seen.as_deref().unwrap_or_default(),
                    a.last_seen.as_deref().unwrap_or_default(),
                )
            }),
        }
        locations
    }

    pub fn by_category(&self, category: Category) -> Vec<Location> {
        self.get_all()
            .into_iter()
            .filter(|l| l.category == category)
            .collect()
    }

    /// Locations within `radius_km` of a point, nearest first.
    pub fn within_radius(&self, lat: f64, long: f64, radius_km: f64) -> Vec<(Location, f64)> {
        let mut nearby: Vec<(Location, f64)> = self
            .get_all()
            .into_iter()
            .map(|l| {
                let distance = haversine_km(lat, long, l.lat, l.long);
                (l, distance)
            })
            .filter(|(_, distance)| *distance <= radius_km)
            .collect();
        nearby.sort_by(|a, b| a.1.total_cmp(&b.1));
        nearby
    }

    // ===== Subscriptions and Lifecycle =====

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(listener)
    }

    /// Reload the persisted snapshot, replacing the in-memory map.
    pub fn rehydrate(&self) {
        self.lock().store.rehydrate();
        self.inner.listeners.notify();
    }

    /// Drop every cached location, in memory and in storage.
    pub fn clear(&self) {
        self.lock().store.clear();
        info!("Location cache cleared");
        self.inner.listeners.notify();
    }

    /// Remove all listeners.
    pub fn dispose(&self) {
        self.inner.listeners.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Document;
    use crate::cache::storage::MemoryStorage;
    use crate::cache::testing::{location_doc, FakeStore, Failure};
    use chrono::Duration;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache_with(remote: &Arc<FakeStore>, storage: &MemoryStorage) -> LocationCache {
        LocationCache::new(
            Arc::clone(remote) as Arc<dyn DocumentStore>,
            Arc::new(storage.clone()),
            CacheOptions::default(),
        )
    }

    fn counting_listener(cache: &LocationCache) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = cache.subscribe(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    /// Seed storage with one location fetched `age` ago.
    fn seeded_storage(age: Duration) -> MemoryStorage {
        let storage = MemoryStorage::new();
        let location = Location::from_document("old", &location_doc("old", "Old Town", 35.0, -100.0).data).unwrap();
        let snapshot = json!({ "old": location });
        storage.set("locationCache", &snapshot.to_string()).unwrap();
        storage.set("locationCacheInitialized", "true").unwrap();
        storage
            .set("locationCacheLastFetch", &(Utc::now() - age).to_rfc3339())
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn test_initialize_fetches_and_persists() {
        let remote = Arc::new(FakeStore::new());
        remote.push_query(vec![
            location_doc("la", "Los Angeles", 34.05, -118.24),
            location_doc("sf", "San Francisco", 37.77, -122.42),
        ]);
        let storage = MemoryStorage::new();
        let cache = cache_with(&remote, &storage);

        cache.initialize().await;

        assert_eq!(remote.query_calls(), 1);
        assert_eq!(cache.len(), 2);
        assert!(cache.is_initialized());
        assert!(!cache.get_loading());
        assert_eq!(cache.get_error(), None);
        assert!(cache.last_fetched().is_some());
        assert_eq!(cache.get("la").unwrap().category, Category::Wildfire);
        assert_eq!(storage.get("locationCacheInitialized").unwrap().as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn test_concurrent_initialize_shares_one_fetch() {
        let (remote, gate) = FakeStore::gated();
        let remote = Arc::new(remote);
        remote.push_query(vec![location_doc("la", "Los Angeles", 34.05, -118.24)]);
        let cache = cache_with(&remote, &MemoryStorage::new());

        tokio::join!(cache.initialize(), cache.initialize(), async {
            gate.notify_one();
        });

        assert_eq!(remote.query_calls(), 1);
        assert_eq!(cache.len(), 1);
        assert!(!cache.get_loading());
    }

    #[tokio::test]
    async fn test_initialize_twice_in_sequence_fetches_once() {
        let remote = Arc::new(FakeStore::new());
        remote.push_query(vec![location_doc("la", "Los Angeles", 34.05, -118.24)]);
        let cache = cache_with(&remote, &MemoryStorage::new());

        cache.initialize().await;
        cache.initialize().await;
        assert_eq!(remote.query_calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_cache_is_refreshed() {
        let remote = Arc::new(FakeStore::new());
        remote.push_query(vec![location_doc("la", "Los Angeles", 34.05, -118.24)]);
        let cache = cache_with(&remote, &seeded_storage(Duration::minutes(61)));
        assert!(cache.get("old").is_some());

        cache.initialize().await;

        assert_eq!(remote.query_calls(), 1);
        // Full fetch replaces rather than merges
        assert!(cache.get("old").is_none());
        assert!(cache.get("la").is_some());
    }

    #[tokio::test]
    async fn test_fresh_cache_only_notifies() {
        let remote = Arc::new(FakeStore::new());
        let cache = cache_with(&remote, &seeded_storage(Duration::minutes(59)));
        let (count, _sub) = counting_listener(&cache);

        cache.initialize().await;

        assert_eq!(remote.query_calls(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_records_are_dropped() {
        let remote = Arc::new(FakeStore::new());
        remote.push_query(vec![
            location_doc("la", "Los Angeles", 34.05, -118.24),
            Document::new("nolat", json!({"locationName": "Lost", "lat": null, "long": -100.0})),
            Document::new("noname", json!({"lat": 40.0, "long": -100.0})),
            location_doc("sf", "San Francisco", 37.77, -122.42),
        ]);
        let cache = cache_with(&remote, &MemoryStorage::new());

        cache.initialize().await;

        let ids: Vec<String> = cache.get_all().into_iter().map(|l| l.id).collect();
        assert_eq!(ids, vec!["la".to_string(), "sf".to_string()]);
    }

    #[tokio::test]
    async fn test_listeners_notified_on_fetch() {
        let remote = Arc::new(FakeStore::new());
        remote.push_query(vec![location_doc("la", "Los Angeles", 34.05, -118.24)]);
        let cache = cache_with(&remote, &MemoryStorage::new());

        let listeners: Vec<_> = (0..3).map(|_| counting_listener(&cache)).collect();

        cache.initialize().await;

        for (count, _) in &listeners {
            // loading on, data replaced, loading off
            assert_eq!(count.load(Ordering::SeqCst), 3);
        }
    }

    #[tokio::test]
    async fn test_listener_reads_state_during_notification() {
        let remote = Arc::new(FakeStore::new());
        remote.push_query(vec![location_doc("la", "Los Angeles", 34.05, -118.24)]);
        let cache = cache_with(&remote, &MemoryStorage::new());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (reader, seen_in) = (cache.clone(), Arc::clone(&seen));
        let _sub = cache.subscribe(move || {
            seen_in.lock().unwrap().push((reader.get_loading(), reader.len()));
        });

        cache.initialize().await;

        assert_eq!(*seen.lock().unwrap(), vec![(true, 0), (true, 1), (false, 1)]);
    }

    #[tokio::test]
    async fn test_index_failure_sets_setup_message_and_allows_retry() {
        let remote = Arc::new(FakeStore::new());
        remote.push_query_failure(Failure::IndexMissing);
        remote.push_query(vec![location_doc("la", "Los Angeles", 34.05, -118.24)]);
        let cache = cache_with(&remote, &MemoryStorage::new());

        cache.initialize().await;
        assert_eq!(cache.get_error().as_deref(), Some(fetch::INDEX_MISSING));
        assert!(!cache.is_initialized());
        assert!(!cache.get_loading());

        cache.initialize().await;
        assert_eq!(remote.query_calls(), 2);
        assert_eq!(cache.get_error(), None);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_generic_failure_message() {
        let remote = Arc::new(FakeStore::new());
        remote.push_query_failure(Failure::Network);
        let cache = cache_with(&remote, &seeded_storage(Duration::minutes(120)));

        cache.initialize().await;
        assert_eq!(cache.get_error().as_deref(), Some("Failed to load locations."));
        // Stale data stays readable
        assert!(cache.get("old").is_some());
        assert!(!cache.is_initialized());
    }

    #[tokio::test]
    async fn test_fetch_and_update_upserts() {
        let remote = Arc::new(FakeStore::new());
        remote.put_document("locations", location_doc("ny", "New York", 40.71, -74.0));
        let cache = cache_with(&remote, &MemoryStorage::new());
        let (count, _sub) = counting_listener(&cache);

        cache.fetch_and_update("ny").await;

        assert_eq!(cache.get("ny").unwrap().name, "New York");
        assert_eq!(count.load(Ordering::SeqCst), 1);
        // A targeted fetch does not count as a full refresh
        assert!(cache.last_fetched().is_none());
    }

    #[tokio::test]
    async fn test_fetch_and_update_removes_missing_location() {
        let remote = Arc::new(FakeStore::new());
        let storage = MemoryStorage::new();
        remote.put_document("locations", location_doc("x", "Gone Soon", 30.0, -90.0));
        let cache = cache_with(&remote, &storage);
        cache.fetch_and_update("x").await;
        assert!(cache.get("x").is_some());

        remote.delete_document("locations", "x");
        cache.fetch_and_update("x").await;

        assert!(cache.get("x").is_none());
        assert!(cache.get_all().iter().all(|l| l.id != "x"));
        assert!(!storage.get("locationCache").unwrap().unwrap().contains("Gone Soon"));
    }

    #[tokio::test]
    async fn test_fetch_and_update_ignores_invalid_document() {
        let remote = Arc::new(FakeStore::new());
        remote.push_query(vec![location_doc("la", "Los Angeles", 34.05, -118.24)]);
        let cache = cache_with(&remote, &MemoryStorage::new());
        cache.initialize().await;

        remote.put_document(
            "locations",
            Document::new("la", json!({"locationName": "Los Angeles", "lat": null, "long": null})),
        );
        cache.fetch_and_update("la").await;

        let la = cache.get("la").unwrap();
        assert_eq!(la.lat, 34.05);
        assert_eq!(la.long, -118.24);
    }

    #[tokio::test]
    async fn test_fetch_and_update_failure_leaves_other_entries() {
        let remote = Arc::new(FakeStore::new());
        remote.push_query(vec![
            location_doc("la", "Los Angeles", 34.05, -118.24),
            location_doc("sf", "San Francisco", 37.77, -122.42),
        ]);
        let cache = cache_with(&remote, &MemoryStorage::new());
        cache.initialize().await;

        remote.fail_document("locations", "la", Failure::Network);
        cache.fetch_and_update("la").await;

        assert_eq!(cache.get_error().as_deref(), Some("Failed to refresh location la."));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_id_is_ignored() {
        let remote = Arc::new(FakeStore::new());
        let cache = cache_with(&remote, &MemoryStorage::new());
        cache.fetch_and_update("").await;
        assert_eq!(remote.get_calls(), 0);
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let remote = Arc::new(FakeStore::new());
        remote.push_query(vec![
            location_doc("la", "Los Angeles", 34.05, -118.24),
            location_doc("sf", "San Francisco", 37.77, -122.42),
        ]);
        let storage = MemoryStorage::new();
        let first = cache_with(&remote, &storage);
        first.initialize().await;

        let fresh_remote = Arc::new(FakeStore::new());
        let second = cache_with(&fresh_remote, &storage);
        second.rehydrate();

        assert_eq!(second.get_all(), first.get_all());
        assert!(second.is_initialized());

        second.initialize().await;
        assert_eq!(fresh_remote.query_calls(), 0);
    }

    #[tokio::test]
    async fn test_memory_only_cache_does_not_persist() {
        let remote = Arc::new(FakeStore::new());
        remote.push_query(vec![location_doc("la", "Los Angeles", 34.05, -118.24)]);
        let storage = MemoryStorage::new();
        let cache = LocationCache::new(
            Arc::clone(&remote) as Arc<dyn DocumentStore>,
            Arc::new(storage.clone()),
            CacheOptions { persist_to_disk: false },
        );

        cache.initialize().await;
        assert_eq!(cache.len(), 1);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_clear() {
        let remote = Arc::new(FakeStore::new());
        remote.push_query(vec![location_doc("la", "Los Angeles", 34.05, -118.24)]);
        let storage = MemoryStorage::new();
        let cache = cache_with(&remote, &storage);
        cache.initialize().await;

        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.is_initialized());
        assert!(storage.is_empty());
        assert_eq!(cache.age_display(), "never");
    }

    #[tokio::test]
    async fn test_read_helpers() {
        let remote = Arc::new(FakeStore::new());
        let mut houston = location_doc("hou", "Houston", 29.76, -95.37);
        houston.data["latestDisasterCount"] = json!({"hurricaneCount": 8});
        houston.data["lastSkeetTimestamp"] = json!("2025-01-10T00:00:00Z");
        remote.push_query(vec![
            location_doc("sf", "San Francisco", 37.77, -122.42),
            houston,
            location_doc("la", "Los Angeles", 34.05, -118.24),
        ]);
        let cache = cache_with(&remote, &MemoryStorage::new());
        cache.initialize().await;

        let names: Vec<String> = cache.sorted(LocationSort::NameAsc).into_iter().map(|l| l.name).collect();
        assert_eq!(names, vec!["Houston", "Los Angeles", "San Francisco"]);
        assert_eq!(cache.sorted(LocationSort::NewestFirst)[0].id, "hou");
        assert_eq!(cache.by_category(Category::Hurricane).len(), 1);

        let near_la = cache.within_radius(34.0, -118.0, 700.0);
        let ids: Vec<&str> = near_la.iter().map(|(l, _)| l.id.as_str()).collect();
        assert_eq!(ids, vec!["la", "sf"]);
        assert_eq!(cache.age_display(), "just now");
    }

    #[tokio::test]
    async fn test_dispose_removes_listeners() {
        let remote = Arc::new(FakeStore::new());
        let cache = cache_with(&remote, &MemoryStorage::new());
        let (count, _sub) = counting_listener(&cache);
        cache.dispose();
        cache.clear();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
