//! Utility functions for timestamps, display formatting and distances.

pub mod format;
pub mod geo;

// Re-export commonly used functions at module level
pub use format::{age_display, cmp_timestamps, format_timestamp, parse_timestamp, truncate_string};
pub use geo::{haversine_km, km_to_miles};
