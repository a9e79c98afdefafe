use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Comparison operator of a single-field filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl FieldOp {
    /// Operator name in the Firestore structured query language.
    pub fn as_firestore(&self) -> &'static str {
        match self {
            FieldOp::Equal => "EQUAL",
            FieldOp::NotEqual => "NOT_EQUAL",
            FieldOp::LessThan => "LESS_THAN",
            FieldOp::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            FieldOp::GreaterThan => "GREATER_THAN",
            FieldOp::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    /// Dotted path into the document, e.g. `skeetData.timestamp`.
    pub field: String,
    pub op: FieldOp,
    pub value: Value,
}

/// A filtered, ordered, limited query over one collection.
///
/// `collection` is a slash-separated path; an odd number of segments names a
/// sub-collection under a parent document (`locations/abc/skeetIds`).
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<FieldFilter>,
    pub order_by: Vec<(String, Direction)>,
    pub limit: Option<u32>,
}

impl Query {
    pub fn collection(path: impl Into<String>) -> Self {
        Self {
            collection: path.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, field: &str, op: FieldOp, value: impl Into<Value>) -> Self {
        self.filters.push(FieldFilter {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by.push((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Split the collection path into (parent document path, collection id).
    pub fn parent_and_collection_id(&self) -> (Option<&str>, &str) {
        match self.collection.rsplit_once('/') {
            Some((parent, id)) => (Some(parent), id),
            None => (None, self.collection.as_str()),
        }
    }
}

/// A raw document: its id plus fields decoded to plain JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// Read-only access to a remote document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch documents matching `query`, in the requested order.
    async fn run_query(&self, query: &Query) -> Result<Vec<Document>>;

    /// Fetch one document by id. `Ok(None)` means it does not exist.
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_builder() {
        let q = Query::collection("locations")
            .filter("lat", FieldOp::GreaterThanOrEqual, 24.0)
            .filter("formattedAddress", FieldOp::NotEqual, "")
            .order_by("lastSkeetTimestamp", Direction::Descending)
            .limit(50);
        assert_eq!(q.filters.len(), 2);
        assert_eq!(q.filters[1].value, Value::String(String::new()));
        assert_eq!(q.limit, Some(50));
        assert_eq!(q.parent_and_collection_id(), (None, "locations"));
    }

    #[test]
    fn test_sub_collection_path() {
        let q = Query::collection("locations/abc/skeetIds");
        assert_eq!(q.parent_and_collection_id(), (Some("locations/abc"), "skeetIds"));
    }
}
