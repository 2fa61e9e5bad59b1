//! Record identity and the generic JSON document record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Stable identity of a record.
pub type RecordId = i64;

/// A value that can travel through a store chain.
///
/// Identity is the only property the orchestrator relies on. Everything else
/// about a record is opaque and forwarded untouched.
pub trait Record: Clone + Send + Sync + 'static {
    /// Returns the stable identity of this record.
    fn id(&self) -> RecordId;
}

/// Collects the ids of a batch of records, in order.
#[must_use]
pub fn ids_of<R: Record>(records: &[R]) -> Vec<RecordId> {
    records.iter().map(Record::id).collect()
}

/// A schemaless record: an id plus arbitrary JSON fields.
///
/// Serializes as a flat JSON object, e.g. `{"id": 1, "available": true}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier.
    pub id: RecordId,
    /// All other fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Creates a document with no fields besides its id.
    #[must_use]
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            fields: Map::new(),
        }
    }

    /// Sets a field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns a field value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl Record for Document {
    fn id(&self) -> RecordId {
        self.id
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "Document({})", self.id),
        }
    }
}
