//! Read-through caches for locations and skeets.
//!
//! Both caches share the same shape:
//! - an in-memory map that is the only source for reads
//! - a snapshot mirrored to a `StorageBackend` under fixed keys
//! - a one-hour staleness policy deciding when to go back to the store
//! - a listener registry notified on every observable change
//!
//! Fetch failures never surface as `Err`; they land in the cache's error slot
//! (`get_error`) and listeners are notified.

pub mod fetch;
pub mod locations;
pub mod notify;
pub mod skeets;
pub mod staleness;
pub mod storage;
pub mod store;

#[cfg(test)]
mod testing;

pub use locations::{LocationCache, LocationSort};
pub use notify::{Listener, Listeners, Subscription};
pub use skeets::SkeetCache;
pub use storage::{FileStorage, MemoryStorage, StorageBackend};

/// Per-cache construction options.
#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
    /// Mirror the cache to storage. When false the cache lives in memory only.
    pub persist_to_disk: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            persist_to_disk: true,
        }
    }
}
