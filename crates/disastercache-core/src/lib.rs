//! disastercache-core - read-through caching of disaster locations and skeets.
//!
//! Locations and their classified social posts ("skeets") are read from a
//! remote document store, kept in memory, mirrored to local storage, and
//! refreshed when older than an hour. Consumers subscribe to change
//! notifications and read state through synchronous getters.
//!
//! ```no_run
//! use std::sync::Arc;
//! use disastercache_core::{CacheOptions, FileStorage, FirestoreClient, LocationCache};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let remote = Arc::new(FirestoreClient::new("my-project", None)?);
//! let storage = Arc::new(FileStorage::new("/tmp/disastercache".into())?);
//! let locations = LocationCache::new(remote, storage, CacheOptions::default());
//!
//! let _sub = locations.subscribe(|| println!("locations changed"));
//! locations.initialize().await;
//! for location in locations.get_all() {
//!     println!("{} ({})", location.name, location.category);
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod models;
pub mod utils;

pub use api::{ApiError, DocumentStore, FirestoreClient};
pub use cache::{
    CacheOptions, FileStorage, LocationCache, LocationSort, MemoryStorage, SkeetCache,
    StorageBackend, Subscription,
};
pub use config::Config;
pub use models::{Category, Location, Skeet};
