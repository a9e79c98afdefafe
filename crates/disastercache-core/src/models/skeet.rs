//! Skeet (social post) entity.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[cfg(feature = "ts")]
use ts_rs::TS;

use super::category::Category;
use super::ValidationError;
use crate::utils::format::cmp_timestamps;

const DEFAULT_HANDLE: &str = "unknown";
const DEFAULT_DISPLAY_NAME: &str = "Unknown User";

/// Prefix of post identifiers that can be turned into a web link.
const AT_URI_PREFIX: &str = "at://";

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct Sentiment {
    #[serde(alias = "Magnitude", default)]
    pub magnitude: f64,
    #[serde(alias = "Score", default)]
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct Skeet {
    pub id: String,
    pub content: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    pub handle: String,
    pub avatar: String,
    /// ISO-8601 timestamp; the ordering key.
    pub timestamp: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub sentiment: Sentiment,
    #[serde(default)]
    pub classification: Vec<f64>,
    #[serde(rename = "externalLink", default, skip_serializing_if = "Option::is_none")]
    pub external_link: Option<String>,
}

impl Skeet {
    /// Build a skeet from the post fields of a remote document, filling
    /// placeholders for anything missing.
    pub fn from_document(id: &str, data: &Value) -> Result<Self, ValidationError> {
        if !data.is_object() {
            return Err(ValidationError::Malformed {
                id: id.to_string(),
                reason: "post data is not an object".to_string(),
            });
        }
        let raw: RawSkeet = serde_json::from_value(data.clone()).map_err(|e| {
            ValidationError::Malformed {
                id: id.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(raw.into_skeet(id))
    }

    /// Category with the highest classifier probability.
    pub fn category(&self) -> Category {
        Category::from_classification(&self.classification)
    }
}

/// Build a web link from a handle and an `at://` post URI.
pub fn external_link(handle: &str, uid: &str) -> Option<String> {
    if !uid.starts_with(AT_URI_PREFIX) {
        return None;
    }
    let post_id = uid.rsplit('/').next().unwrap_or_default();
    if handle.is_empty() || post_id.is_empty() {
        return None;
    }
    Some(format!("https://bsky.app/profile/{}/post/{}", handle, post_id))
}

/// Merge `incoming` into `existing`: drop ids already present, then sort
/// newest first.
pub fn merge_skeets(existing: &[Skeet], incoming: Vec<Skeet>) -> Vec<Skeet> {
    let mut merged = existing.to_vec();
    for skeet in incoming {
        if !merged.iter().any(|s| s.id == skeet.id) {
            merged.push(skeet);
        }
    }
    merged.sort_by(|a, b| cmp_timestamps(&b.timestamp, &a.timestamp));
    merged
}

/// The newest timestamp in `skeets`, if any.
pub fn watermark(skeets: &[Skeet]) -> Option<&str> {
    skeets
        .iter()
        .map(|s| s.timestamp.as_str())
        .max_by(|a, b| cmp_timestamps(a, b))
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawSkeet {
    avatar: Option<String>,
    content: Option<String>,
    timestamp: Option<String>,
    handle: Option<String>,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    uid: Option<String>,
    classification: Option<Value>,
    sentiment: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawSentiment {
    #[serde(alias = "Magnitude")]
    magnitude: Option<f64>,
    #[serde(alias = "Score")]
    score: Option<f64>,
}

/// Non-numeric entries keep their position as zero, since the index is the category.
fn classification_from_value(value: Option<Value>) -> Vec<f64> {
    match value {
        Some(Value::Array(items)) => items.iter().map(|v| v.as_f64().unwrap_or(0.0)).collect(),
        _ => Vec::new(),
    }
}

fn sentiment_from_value(value: Option<Value>) -> Sentiment {
    value
        .and_then(|v| serde_json::from_value::<RawSentiment>(v).ok())
        .map(|raw| Sentiment {
            magnitude: raw.magnitude.unwrap_or_default(),
            score: raw.score.unwrap_or_default(),
        })
        .unwrap_or_default()
}

impl RawSkeet {
    fn into_skeet(self, id: &str) -> Skeet {
        let handle = self
            .handle
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_HANDLE.to_string());
        let uid = self.uid.unwrap_or_default();
        let external_link = external_link(&handle, &uid);

        Skeet {
            id: id.to_string(),
            content: self.content.unwrap_or_default(),
            display_name: self
                .display_name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string()),
            handle,
            avatar: self.avatar.unwrap_or_default(),
            timestamp: self
                .timestamp
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            uid,
            sentiment: sentiment_from_value(self.sentiment),
            classification: classification_from_value(self.classification),
            external_link,
        }
    }
}
