//! Location entity and its conversion from raw remote documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[cfg(feature = "ts")]
use ts_rs::TS;

use super::category::{Category, DisasterCount};
use super::ValidationError;
use crate::utils::format::cmp_timestamps;

/// Placeholder for a missing formatted address.
const ADDRESS_PLACEHOLDER: &str = "N/A";

/// One sample of the per-location sentiment time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct SentimentSample {
    #[serde(rename = "timeStamp")]
    pub timestamp: String,
    #[serde(rename = "skeetsAmount", default)]
    pub post_count: f64,
    #[serde(rename = "averageSentiment", default)]
    pub average_sentiment: f64,
    #[serde(rename = "disasterCount", default, skip_serializing_if = "Option::is_none")]
    pub disaster_count: Option<DisasterCount>,
}

/// A geographic point where disaster-related posts have been aggregated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct Location {
    pub id: String,
    #[serde(rename = "locationName")]
    pub name: String,
    #[serde(rename = "formattedAddress")]
    pub formatted_address: String,
    pub lat: f64,
    pub long: f64,
    pub category: Category,
    #[serde(rename = "avgSentimentList", default)]
    pub avg_sentiment_list: Vec<SentimentSample>,
    #[serde(rename = "latestSkeetsAmount", default)]
    pub latest_skeets_amount: Option<f64>,
    #[serde(rename = "latestDisasterCount", default)]
    pub latest_disaster_count: Option<DisasterCount>,
    #[serde(rename = "latestSentiment", default)]
    pub latest_sentiment: Option<f64>,
    #[serde(rename = "firstSkeetTimestamp", default)]
    pub first_seen: Option<String>,
    #[serde(rename = "lastSkeetTimestamp", default)]
    pub last_seen: Option<String>,
}

impl Location {
    /// Build a location from a remote document, rejecting records without
    /// coordinates or a name.
    pub fn from_document(id: &str, data: &Value) -> Result<Self, ValidationError> {
        let raw: RawLocation = serde_json::from_value(data.clone()).map_err(|e| {
            ValidationError::Malformed {
                id: id.to_string(),
                reason: e.to_string(),
            }
        })?;
        raw.into_location(id)
    }

    /// Replace the scalar rollups with `newer`'s and fold its sentiment
    /// samples into the existing series.
    pub fn merge_from(&mut self, newer: Location) {
        let mut series = std::mem::take(&mut self.avg_sentiment_list);
        for sample in newer.avg_sentiment_list.iter() {
            match series.iter_mut().find(|s| s.timestamp == sample.timestamp) {
                Some(existing) => *existing = sample.clone(),
                None => series.push(sample.clone()),
            }
        }
        series.sort_by(|a, b| cmp_timestamps(&a.timestamp, &b.timestamp));

        *self = Location {
            avg_sentiment_list: series,
            ..newer
        };
    }

    /// Most recent sentiment sample, if any.
    pub fn latest_sample(&self) -> Option<&SentimentSample> {
        self.avg_sentiment_list.last()
    }

    pub fn display_name(&self) -> &str {
        &self.name
    }
}

/// Location document as stored remotely. Every field is optional; validation
/// happens in `into_location`.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawLocation {
    #[serde(rename = "locationName")]
    location_name: Option<String>,
    #[serde(rename = "formattedAddress")]
    formatted_address: Option<String>,
    lat: Option<f64>,
    long: Option<f64>,
    #[serde(rename = "avgSentimentList")]
    avg_sentiment_list: Option<Value>,
    #[serde(rename = "latestSkeetsAmount")]
    latest_skeets_amount: Option<f64>,
    #[serde(rename = "latestDisasterCount")]
    latest_disaster_count: Option<Value>,
    #[serde(rename = "latestSentiment")]
    latest_sentiment: Option<f64>,
    #[serde(rename = "firstSkeetTimestamp")]
    first_skeet_timestamp: Option<String>,
    #[serde(rename = "lastSkeetTimestamp")]
    last_skeet_timestamp: Option<String>,
}

impl RawLocation {
    fn into_location(self, id: &str) -> Result<Location, ValidationError> {
        let (lat, long) = match (self.lat, self.long) {
            (Some(lat), Some(long)) if lat.is_finite() && long.is_finite() => (lat, long),
            _ => return Err(ValidationError::MissingCoordinates(id.to_string())),
        };

        let name = match self.location_name {
            Some(name) if !name.trim().is_empty() => name,
            _ => return Err(ValidationError::MissingName(id.to_string())),
        };

        // A malformed breakdown is treated as absent rather than rejecting the location
        let latest_disaster_count = self
            .latest_disaster_count
            .and_then(|v| serde_json::from_value::<DisasterCount>(v).ok());
        let category = latest_disaster_count
            .as_ref()
            .map(Category::from_counts)
            .unwrap_or_default();

        let mut avg_sentiment_list = samples_from_value(id, self.avg_sentiment_list);
        avg_sentiment_list.sort_by(|a, b| cmp_timestamps(&a.timestamp, &b.timestamp));

        let formatted_address = self
            .formatted_address
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| ADDRESS_PLACEHOLDER.to_string());

        Ok(Location {
            id: id.to_string(),
            name,
            formatted_address,
            lat,
            long,
            category,
            avg_sentiment_list,
            latest_skeets_amount: self.latest_skeets_amount,
            latest_disaster_count,
            latest_sentiment: self.latest_sentiment,
            first_seen: self.first_skeet_timestamp,
            last_seen: self.last_skeet_timestamp,
        })
    }
}

/// Sentiment sample as stored remotely. Null numbers read as zero.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawSample {
    #[serde(rename = "timeStamp")]
    timestamp: Option<String>,
    #[serde(rename = "skeetsAmount")]
    post_count: Option<f64>,
    #[serde(rename = "averageSentiment")]
    average_sentiment: Option<f64>,
    #[serde(rename = "disasterCount")]
    disaster_count: Option<Value>,
}

impl RawSample {
    fn into_sample(self) -> Option<SentimentSample> {
        let timestamp = self.timestamp.filter(|t| !t.is_empty())?;
        Some(SentimentSample {
            timestamp,
            post_count: self.post_count.unwrap_or_default(),
            average_sentiment: self.average_sentiment.unwrap_or_default(),
            disaster_count: self
                .disaster_count
                .and_then(|v| serde_json::from_value::<DisasterCount>(v).ok()),
        })
    }
}

/// Parse the sentiment series, skipping samples that have no timestamp or
/// the wrong shape.
fn samples_from_value(id: &str, value: Option<Value>) -> Vec<SentimentSample> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    let total = items.len();
    let samples: Vec<SentimentSample> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RawSample>(item).ok())
        .filter_map(RawSample::into_sample)
        .collect();
    if samples.len() < total {
        debug!(location_id = id, dropped = total - samples.len(), "Skipped unusable sentiment samples");
    }
    samples
}
