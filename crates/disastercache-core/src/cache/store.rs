//! In-memory entity map mirrored to a `StorageBackend`.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, warn};

use super::storage::StorageBackend;

/// Fixed storage keys for one cache instance.
#[derive(Debug, Clone, Copy)]
pub struct StorageKeys {
    pub data: &'static str,
    /// Not every cache tracks an initialized flag.
    pub initialized: Option<&'static str>,
    pub last_fetch: &'static str,
}

impl StorageKeys {
    fn all(&self) -> impl Iterator<Item = &'static str> {
        [Some(self.data), self.initialized, Some(self.last_fetch)]
            .into_iter()
            .flatten()
    }
}

/// The canonical entity map plus the metadata persisted with it.
pub struct PersistedStore<V> {
    backend: Option<Arc<dyn StorageBackend>>,
    keys: StorageKeys,
    pub entries: IndexMap<String, V>,
    pub initialized: bool,
    pub last_fetch: Option<DateTime<Utc>>,
}

impl<V: Serialize + DeserializeOwned> PersistedStore<V> {
    /// `backend` of `None` keeps the store purely in memory.
    pub fn new(backend: Option<Arc<dyn StorageBackend>>, keys: StorageKeys) -> Self {
        Self {
            backend,
            keys,
            entries: IndexMap::new(),
            initialized: false,
            last_fetch: None,
        }
    }

    /// Load the persisted snapshot. A corrupt snapshot is discarded and its
    /// keys removed, leaving an empty store.
    pub fn rehydrate(&mut self) {
        let Some(backend) = self.backend.clone() else {
            return;
        };

        match self.read_snapshot(backend.as_ref()) {
            Ok(()) => {
                debug!(
                    key = self.keys.data,
                    count = self.entries.len(),
                    initialized = self.initialized,
                    "Rehydrated cache from storage"
                );
            }
            Err(e) => {
                error!(key = self.keys.data, error = %e, "Error loading cache from storage, discarding it");
                self.entries.clear();
                self.initialized = false;
                self.last_fetch = None;
                self.remove_persisted();
            }
        }
    }

    fn read_snapshot(&mut self, backend: &dyn StorageBackend) -> Result<()> {
        if let Some(text) = backend.get(self.keys.data)? {
            self.entries = serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse cache snapshot: {}", self.keys.data))?;
        }

        if let Some(key) = self.keys.initialized {
            self.initialized = backend.get(key)?.as_deref() == Some("true");
        }

        self.last_fetch = match backend.get(self.keys.last_fetch)? {
            Some(text) => Some(
                DateTime::parse_from_rfc3339(text.trim())
                    .with_context(|| format!("Invalid last fetch timestamp: {}", text))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };
        Ok(())
    }

    /// Write the snapshot. Failures are logged and otherwise ignored.
    pub fn persist(&self) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        if let Err(e) = self.write_snapshot(backend.as_ref()) {
            error!(key = self.keys.data, error = %e, "Error saving cache to storage");
        }
    }

    fn write_snapshot(&self, backend: &dyn StorageBackend) -> Result<()> {
        let contents = serde_json::to_string(&self.entries)?;
        backend.set(self.keys.data, &contents)?;

        if let Some(key) = self.keys.initialized {
            backend.set(key, if self.initialized { "true" } else { "false" })?;
        }

        match self.last_fetch {
            Some(ts) => backend.set(self.keys.last_fetch, &ts.to_rfc3339())?,
            None => backend.remove(self.keys.last_fetch)?,
        }
        Ok(())
    }

    /// Remove every persisted key for this store.
    pub fn remove_persisted(&self) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        for key in self.keys.all() {
            if let Err(e) = backend.remove(key) {
                warn!(key = key, error = %e, "Failed to remove persisted cache key");
            }
        }
    }

    /// Drop everything, in memory and on disk.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.initialized = false;
        self.last_fetch = None;
        self.remove_persisted();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::storage::MemoryStorage;
    use chrono::Duration;

    const KEYS: StorageKeys = StorageKeys {
        data: "testCache",
        initialized: Some("testCacheInitialized"),
        last_fetch: "testCacheLastFetch",
    };

    fn store(storage: &MemoryStorage) -> PersistedStore<Vec<u32>> {
        PersistedStore::new(Some(Arc::new(storage.clone())), KEYS)
    }

    #[test]
    fn test_persist_then_rehydrate() {
        let storage = MemoryStorage::new();
        let fetched_at = Utc::now() - Duration::minutes(5);

        let mut first = store(&storage);
        first.entries.insert("b".to_string(), vec![2]);
        first.entries.insert("a".to_string(), vec![1, 1]);
        first.initialized = true;
        first.last_fetch = Some(fetched_at);
        first.persist();

        let mut second = store(&storage);
        second.rehydrate();
        assert_eq!(second.entries, first.entries);
        // Insertion order survives the round trip
        assert_eq!(second.entries.keys().next().map(String::as_str), Some("b"));
        assert!(second.initialized);
        assert_eq!(second.last_fetch, Some(fetched_at));
    }

    #[test]
    fn test_rehydrate_discards_corrupt_snapshot() {
        let storage = MemoryStorage::new();
        storage.set("testCache", "{not json").unwrap();
        storage.set("testCacheInitialized", "true").unwrap();
        storage.set("testCacheLastFetch", "2025-01-01T00:00:00Z").unwrap();

        let mut s = store(&storage);
        s.rehydrate();
        assert!(s.entries.is_empty());
        assert!(!s.initialized);
        assert!(s.last_fetch.is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_rehydrate_discards_bad_timestamp() {
        let storage = MemoryStorage::new();
        storage.set("testCache", r#"{"a": [1]}"#).unwrap();
        storage.set("testCacheLastFetch", "last tuesday").unwrap();

        let mut s = store(&storage);
        s.rehydrate();
        assert!(s.entries.is_empty());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_memory_only_store_never_touches_storage() {
        let mut s: PersistedStore<Vec<u32>> = PersistedStore::new(None, KEYS);
        s.entries.insert("a".to_string(), vec![1]);
        s.persist();
        s.rehydrate();
        assert_eq!(s.entries.len(), 1);
    }

    #[test]
    fn test_clear_removes_keys() {
        let storage = MemoryStorage::new();
        let mut s = store(&storage);
        s.entries.insert("a".to_string(), vec![1]);
        s.initialized = true;
        s.last_fetch = Some(Utc::now());
        s.persist();
        assert_eq!(storage.len(), 3);

        s.clear();
        assert!(storage.is_empty());
        assert!(s.entries.is_empty());
        assert!(!s.initialized);
    }
}
