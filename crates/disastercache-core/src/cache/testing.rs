//! Scripted `DocumentStore` for cache tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::api::{ApiError, Document, DocumentStore, Query};

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    IndexMissing,
    Network,
}

impl Failure {
    fn into_error(self) -> anyhow::Error {
        match self {
            Failure::IndexMissing => ApiError::FailedPrecondition(
                "FAILED_PRECONDITION: The query requires an index".to_string(),
            )
            .into(),
            Failure::Network => anyhow::anyhow!("connection reset by peer"),
        }
    }
}

#[derive(Default)]
pub struct FakeStore {
    query_responses: Mutex<VecDeque<Result<Vec<Document>, Failure>>>,
    documents: Mutex<HashMap<String, Result<Document, Failure>>>,
    queries: Mutex<Vec<Query>>,
    query_calls: AtomicUsize,
    get_calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queries wait for the returned `Notify` before answering.
    pub fn gated() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let store = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (store, gate)
    }

    /// Queue the answer to the next query. With nothing queued, queries
    /// return no documents.
    pub fn push_query(&self, docs: Vec<Document>) {
        self.query_responses.lock().unwrap().push_back(Ok(docs));
    }

    pub fn push_query_failure(&self, failure: Failure) {
        self.query_responses.lock().unwrap().push_back(Err(failure));
    }

    pub fn put_document(&self, collection: &str, doc: Document) {
        let key = format!("{}/{}", collection, doc.id);
        self.documents.lock().unwrap().insert(key, Ok(doc));
    }

    pub fn fail_document(&self, collection: &str, id: &str, failure: Failure) {
        let key = format!("{}/{}", collection, id);
        self.documents.lock().unwrap().insert(key, Err(failure));
    }

    pub fn delete_document(&self, collection: &str, id: &str) {
        self.documents
            .lock()
            .unwrap()
            .remove(&format!("{}/{}", collection, id));
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<Query> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentStore for FakeStore {
    async fn run_query(&self, query: &Query) -> Result<Vec<Document>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.clone());

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let next = self.query_responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(docs)) => Ok(docs),
            Some(Err(failure)) => Err(failure.into_error()),
            None => Ok(Vec::new()),
        }
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let key = format!("{}/{}", collection, id);
        let entry = self.documents.lock().unwrap().get(&key).cloned();
        match entry {
            Some(Ok(doc)) => Ok(Some(doc)),
            Some(Err(failure)) => Err(failure.into_error()),
            None => Ok(None),
        }
    }
}

/// A valid location document.
pub fn location_doc(id: &str, name: &str, lat: f64, long: f64) -> Document {
    Document::new(
        id,
        json!({
            "locationName": name,
            "formattedAddress": format!("{}, USA", name),
            "lat": lat,
            "long": long,
            "latestSkeetsAmount": 12,
            "latestSentiment": -0.25,
            "latestDisasterCount": {
                "fireCount": 10, "hurricaneCount": 3, "earthquakeCount": 1, "nonDisasterCount": 0
            },
            "firstSkeetTimestamp": "2025-01-07T10:00:00Z",
            "lastSkeetTimestamp": "2025-01-09T12:00:00Z",
            "avgSentimentList": [
                {"timeStamp": "2025-01-09T00:00:00Z", "skeetsAmount": 12, "averageSentiment": -0.25}
            ]
        }),
    )
}

/// A sub-collection skeet document.
pub fn skeet_doc(id: &str, timestamp: &str) -> Document {
    Document::new(id, json!({ "skeetData": skeet_fields(id, timestamp) }))
}

pub fn skeet_fields(id: &str, timestamp: &str) -> Value {
    json!({
        "content": format!("post {}", id),
        "timestamp": timestamp,
        "handle": "watcher.bsky.social",
        "displayName": "Watcher",
        "uid": format!("at://did:plc:watcher/app.bsky.feed.post/{}", id),
        "classification": [0.8, 0.1, 0.1],
        "sentiment": {"magnitude": 0.6, "score": -0.7}
    })
}
