//! When to go back to the remote store.

use chrono::{DateTime, Utc};

/// Consider a cache stale after 1 hour.
/// This bounds staleness only; targeted per-entity fetches keep individual
/// entries fresher.
pub const CACHE_STALE_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    /// Start a full fetch.
    Fetch,
    /// A fetch is already running; wait for it.
    JoinInFlight,
    /// Serve what is cached and just notify listeners.
    UseCached,
}

/// A missing timestamp counts as stale.
pub fn is_stale(last_fetch: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last_fetch {
        Some(ts) => (now - ts).num_minutes() > CACHE_STALE_MINUTES,
        None => true,
    }
}

/// Decide what `initialize` should do.
pub fn decide(
    initialized: bool,
    in_flight: bool,
    last_fetch: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> RefreshDecision {
    if in_flight {
        RefreshDecision::JoinInFlight
    } else if !initialized || is_stale(last_fetch, now) {
        RefreshDecision::Fetch
    } else {
        RefreshDecision::UseCached
    }
}
