//! Queries, document mapping and failure classification shared by the
//! location and skeet caches.

use chrono::{DateTime, Months, SecondsFormat, Utc};
use tracing::warn;

use crate::api::{ApiError, Direction, Document, FieldOp, Query};
use crate::models::{Location, Skeet, ValidationError};

// ============================================================================
// Constants
// ============================================================================

pub const LOCATIONS_COLLECTION: &str = "locations";

/// Sub-collection of a location document holding its posts.
pub const SKEETS_SUBCOLLECTION: &str = "skeetIds";

/// Top-level collection of every ingested post.
pub const GLOBAL_SKEETS_COLLECTION: &str = "skeets";

/// Field wrapping the post inside a sub-collection document.
const SKEET_DATA_FIELD: &str = "skeetData";

const SKEET_TIMESTAMP_FIELD: &str = "skeetData.timestamp";

/// Continental US bounding box: (min lat, max lat, min long, max long).
const US_BOUNDS: (f64, f64, f64, f64) = (24.0, 50.0, -125.0, -66.0);

/// Locations need more recent posts than this to be worth showing.
const MIN_RECENT_SKEETS: i64 = 5;

/// Only locations active within this many months are fetched.
const ACTIVITY_LOOKBACK_MONTHS: u32 = 1;

const LOCATION_QUERY_LIMIT: u32 = 50;

/// Batch size of one incremental skeet fetch.
pub const SKEET_BATCH_LIMIT: u32 = 50;

/// Watermark used when nothing is cached yet.
pub const EPOCH_WATERMARK: &str = "1970-01-01T00:00:00Z";

pub const LOAD_LOCATIONS_FAILED: &str = "Failed to load locations.";
pub const INDEX_MISSING: &str = "Database setup required (Index missing). Check Firestore console.";

// ============================================================================
// Queries
// ============================================================================

/// Recently active, populated US locations.
pub fn active_locations_query(now: DateTime<Utc>) -> Query {
    let since = now
        .checked_sub_months(Months::new(ACTIVITY_LOOKBACK_MONTHS))
        .unwrap_or(now);
    let (min_lat, max_lat, min_long, max_long) = US_BOUNDS;

    Query::collection(LOCATIONS_COLLECTION)
        .filter("formattedAddress", FieldOp::NotEqual, "")
        .filter(
            "lastSkeetTimestamp",
            FieldOp::GreaterThanOrEqual,
            since.to_rfc3339_opts(SecondsFormat::Millis, true),
        )
        .filter("lat", FieldOp::GreaterThanOrEqual, min_lat)
        .filter("lat", FieldOp::LessThanOrEqual, max_lat)
        .filter("long", FieldOp::GreaterThanOrEqual, min_long)
        .filter("long", FieldOp::LessThanOrEqual, max_long)
        .filter("latestSkeetsAmount", FieldOp::GreaterThan, MIN_RECENT_SKEETS)
        .limit(LOCATION_QUERY_LIMIT)
}

fn skeets_path(location_id: &str) -> String {
    format!("{}/{}/{}", LOCATIONS_COLLECTION, location_id, SKEETS_SUBCOLLECTION)
}

/// Posts for a location strictly newer than `watermark`, oldest first.
pub fn skeets_after_query(location_id: &str, watermark: &str) -> Query {
    Query::collection(skeets_path(location_id))
        .filter(SKEET_TIMESTAMP_FIELD, FieldOp::GreaterThan, watermark)
        .order_by(SKEET_TIMESTAMP_FIELD, Direction::Ascending)
        .limit(SKEET_BATCH_LIMIT)
}

/// Posts for a location within `[start, end]`, newest first.
pub fn skeets_between_query(location_id: &str, start: &str, end: &str) -> Query {
    Query::collection(skeets_path(location_id))
        .filter(SKEET_TIMESTAMP_FIELD, FieldOp::GreaterThanOrEqual, start)
        .filter(SKEET_TIMESTAMP_FIELD, FieldOp::LessThanOrEqual, end)
        .order_by(SKEET_TIMESTAMP_FIELD, Direction::Descending)
}

/// The newest posts across every location.
pub fn latest_global_query(limit: u32) -> Query {
    Query::collection(GLOBAL_SKEETS_COLLECTION)
        .order_by("timestamp", Direction::Descending)
        .limit(limit)
}

// ============================================================================
// Mapping
// ============================================================================

/// Convert documents to locations, skipping (and logging) invalid ones.
pub fn locations_from_documents(docs: &[Document]) -> Vec<Location> {
    docs.iter()
        .filter_map(|doc| match Location::from_document(&doc.id, &doc.data) {
            Ok(location) => Some(location),
            Err(e) => {
                warn!(location_id = %doc.id, error = %e, "Skipping location document");
                None
            }
        })
        .collect()
}

/// Where the post fields live inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkeetLayout {
    /// `{ skeetData: { ... } }`, as in a location's sub-collection.
    Nested,
    /// Fields at the top level, as in the global collection.
    Flat,
}

pub fn skeets_from_documents(docs: &[Document], layout: SkeetLayout) -> Vec<Skeet> {
    docs.iter()
        .filter_map(|doc| {
            let data = match layout {
                SkeetLayout::Nested => doc.data.get(SKEET_DATA_FIELD),
                SkeetLayout::Flat => Some(&doc.data),
            };
            let parsed = match data {
                Some(data) => Skeet::from_document(&doc.id, data),
                None => Err(ValidationError::Malformed {
                    id: doc.id.clone(),
                    reason: format!("missing {}", SKEET_DATA_FIELD),
                }),
            };
            match parsed {
                Ok(skeet) => Some(skeet),
                Err(e) => {
                    warn!(skeet_id = %doc.id, error = %e, "Skipping skeet document");
                    None
                }
            }
        })
        .collect()
}

// ============================================================================
// Failures
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The store rejected the query for lack of an index or other setup.
    IndexMissing,
    Other,
}

/// Classify a fetch failure by its `ApiError`, falling back to the message.
pub fn classify(err: &anyhow::Error) -> FailureKind {
    if let Some(api) = err.downcast_ref::<ApiError>() {
        if api.is_index_error() {
            return FailureKind::IndexMissing;
        }
    }
    let message = format!("{:#}", err);
    if message.contains("index") || message.contains("FAILED_PRECONDITION") {
        FailureKind::IndexMissing
    } else {
        FailureKind::Other
    }
}

/// User-facing message for a failure, with `generic` used for anything that
/// is not a setup problem.
pub fn failure_message(err: &anyhow::Error, generic: &str) -> String {
    match classify(err) {
        FailureKind::IndexMissing => INDEX_MISSING.to_string(),
        FailureKind::Other => generic.to_string(),
    }
}
