//! Remote document store access.
//!
//! The caches only depend on the narrow `DocumentStore` contract: filtered,
//! ordered, limited collection queries plus point lookups by id, with nested
//! sub-collections addressed by path (`locations/{id}/skeetIds`).
//!
//! `FirestoreClient` implements the contract over the Firestore REST API.

pub mod client;
pub mod error;
pub mod store;
mod value;

pub use client::FirestoreClient;
pub use error::ApiError;
pub use store::{Direction, Document, DocumentStore, FieldFilter, FieldOp, Query};
