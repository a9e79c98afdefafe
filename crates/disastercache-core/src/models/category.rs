use serde::{Deserialize, Serialize};

#[cfg(feature = "ts")]
use ts_rs::TS;

/// Disaster category shown on the map and in the accordions.
///
/// Posts that the classifier could not attribute to one of the three tracked
/// disaster kinds, and locations whose counts have no single winner, fall
/// into `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub enum Category {
    Wildfire,
    Hurricane,
    Earthquake,
    #[default]
    #[serde(alias = "NonDisaster", alias = "non-disaster")]
    Other,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Wildfire,
        Category::Hurricane,
        Category::Earthquake,
        Category::Other,
    ];

    /// Pick the category whose count is strictly greater than every other
    /// count, including the "other" bucket. Ties for the maximum (and the
    /// all-zero case) resolve to `Other`.
    pub fn from_counts(counts: &DisasterCount) -> Self {
        let fire = counts.fire;
        let hurricane = counts.hurricane;
        let earthquake = counts.earthquake;
        let other = counts.other;

        if fire > hurricane.max(earthquake).max(other) {
            Category::Wildfire
        } else if hurricane > fire.max(earthquake).max(other) {
            Category::Hurricane
        } else if earthquake > fire.max(hurricane).max(other) {
            Category::Earthquake
        } else {
            Category::Other
        }
    }

    /// Map a classifier probability vector to a category.
    /// Index 0/1/2 are wildfire/hurricane/earthquake; the first maximum wins.
    pub fn from_classification(classification: &[f64]) -> Self {
        if classification.len() < 3 {
            return Category::Other;
        }

        let mut max_index = None;
        let mut max_prob = f64::NEG_INFINITY;
        for (i, &p) in classification.iter().enumerate() {
            if p > max_prob {
                max_prob = p;
                max_index = Some(i);
            }
        }

        match max_index {
            Some(0) => Category::Wildfire,
            Some(1) => Category::Hurricane,
            Some(2) => Category::Earthquake,
            _ => Category::Other,
        }
    }

    /// Parse a user-supplied label, case-insensitively.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "wildfire" | "fire" => Some(Category::Wildfire),
            "hurricane" => Some(Category::Hurricane),
            "earthquake" => Some(Category::Earthquake),
            "other" | "nondisaster" | "non-disaster" => Some(Category::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Wildfire => write!(f, "Wildfire"),
            Category::Hurricane => write!(f, "Hurricane"),
            Category::Earthquake => write!(f, "Earthquake"),
            Category::Other => write!(f, "Other"),
        }
    }
}

/// Per-category post counts aggregated for a location.
///
/// The remote documents use `fireCount`/`hurricaneCount`/`earthquakeCount`
/// and either `nonDisasterCount` or `OtherCount` for the last bucket.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct DisasterCount {
    #[serde(rename = "fireCount", default)]
    pub fire: f64,
    #[serde(rename = "hurricaneCount", default)]
    pub hurricane: f64,
    #[serde(rename = "earthquakeCount", default)]
    pub earthquake: f64,
    #[serde(rename = "nonDisasterCount", alias = "OtherCount", default)]
    pub other: f64,
}
