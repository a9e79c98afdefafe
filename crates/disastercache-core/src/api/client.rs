//! Firestore REST client.
//!
//! Implements `DocumentStore` with `documents:runQuery` for collection
//! queries and a plain document GET for point lookups. Documents are decoded
//! from Firestore's typed value encoding to plain JSON before they reach the
//! caches.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::store::{Direction, Document, DocumentStore, Query};
use super::value::{decode_fields, encode};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

const FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";

/// Database id used when none is configured.
pub const DEFAULT_DATABASE: &str = "(default)";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// One element of the `runQuery` response stream. Elements without a
/// document only carry progress metadata.
#[derive(Debug, Deserialize)]
struct RunQueryItem {
    document: Option<RawDocument>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    name: String,
    #[serde(default)]
    fields: Option<Value>,
}

impl RawDocument {
    fn into_document(self) -> Document {
        let id = self
            .name
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Document::new(id, decode_fields(self.fields.as_ref()))
    }
}

/// Firestore client. Clone is cheap - reqwest::Client is reference counted.
#[derive(Clone)]
pub struct FirestoreClient {
    client: Client,
    base_url: String,
    project_id: String,
    database: String,
    api_key: Option<String>,
}

impl FirestoreClient {
    pub fn new(project_id: &str, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: FIRESTORE_BASE_URL.to_string(),
            project_id: project_id.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            api_key,
        })
    }

    /// Use a named database instead of `(default)`.
    pub fn with_database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    /// Point the client at another endpoint, e.g. the local emulator.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn documents_root(&self) -> String {
        format!(
            "{}/projects/{}/databases/{}/documents",
            self.base_url, self.project_id, self.database
        )
    }

    fn with_key(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_key {
            Some(ref key) => request.query(&[("key", key.as_str())]),
            None => request,
        }
    }

    /// Build the `structuredQuery` body for `query`.
    fn structured_query(query: &Query) -> Value {
        let (_, collection_id) = query.parent_and_collection_id();
        let mut structured = json!({
            "from": [{ "collectionId": collection_id }],
        });

        let filters: Vec<Value> = query
            .filters
            .iter()
            .map(|f| {
                json!({
                    "fieldFilter": {
                        "field": { "fieldPath": f.field },
                        "op": f.op.as_firestore(),
                        "value": encode(&f.value),
                    }
                })
            })
            .collect();

        match filters.len() {
            0 => {}
            1 => structured["where"] = filters[0].clone(),
            _ => {
                structured["where"] = json!({
                    "compositeFilter": { "op": "AND", "filters": filters }
                })
            }
        }

        if !query.order_by.is_empty() {
            structured["orderBy"] = Value::Array(
                query
                    .order_by
                    .iter()
                    .map(|(field, direction)| {
                        let direction = match direction {
                            Direction::Ascending => "ASCENDING",
                            Direction::Descending => "DESCENDING",
                        };
                        json!({ "field": { "fieldPath": field }, "direction": direction })
                    })
                    .collect(),
            );
        }

        if let Some(limit) = query.limit {
            structured["limit"] = json!(limit);
        }

        json!({ "structuredQuery": structured })
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: Response) -> Result<Option<Response>> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status() == StatusCode::TOO_MANY_REQUESTS {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    /// Send a request built by `build`, retrying with exponential backoff
    /// while the store answers 429.
    async fn send_with_retry<F>(&self, url: &str, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .with_key(build())
                .send()
                .await
                .map_err(ApiError::from)
                .with_context(|| format!("Failed to send request to {}", url))?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited.into());
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }
}

#[async_trait]
impl DocumentStore for FirestoreClient {
    async fn run_query(&self, query: &Query) -> Result<Vec<Document>> {
        let url = match query.parent_and_collection_id() {
            (Some(parent), _) => format!("{}/{}:runQuery", self.documents_root(), parent),
            (None, _) => format!("{}:runQuery", self.documents_root()),
        };
        let body = Self::structured_query(query);
        debug!(collection = %query.collection, filters = query.filters.len(), "Running query");

        let response = self
            .send_with_retry(&url, || self.client.post(&url).json(&body))
            .await?;

        let items: Vec<RunQueryItem> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse query response for {}", query.collection))?;

        let documents: Vec<Document> = items
            .into_iter()
            .filter_map(|item| item.document)
            .map(RawDocument::into_document)
            .collect();

        debug!(collection = %query.collection, count = documents.len(), "Query returned");
        Ok(documents)
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let url = format!("{}/{}/{}", self.documents_root(), collection, id);

        match self.send_with_retry(&url, || self.client.get(&url)).await {
            Ok(response) => {
                let raw: RawDocument = response
                    .json()
                    .await
                    .with_context(|| format!("Failed to parse document {}/{}", collection, id))?;
                Ok(Some(raw.into_document()))
            }
            Err(e) if e.downcast_ref::<ApiError>().is_some_and(ApiError::is_missing_document) => {
                debug!(collection = collection, id = id, "Document does not exist");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
