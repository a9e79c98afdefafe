//! Data models for cached disaster data.
//!
//! - `Location`: an aggregated point of disaster-related activity, with its
//!   sentiment time series and derived `Category`
//! - `Skeet`: a classified social post belonging to one location
//! - `ValidationError`: why a remote document was not admitted to the cache

pub mod category;
pub mod location;
pub mod skeet;

use thiserror::Error;

pub use category::{Category, DisasterCount};
pub use location::{Location, SentimentSample};
pub use skeet::{Sentiment, Skeet};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Document {0} is missing coordinates")]
    MissingCoordinates(String),

    #[error("Document {0} is missing a name")]
    MissingName(String),

    #[error("Document {id} is malformed: {reason}")]
    Malformed { id: String, reason: String },
}
