//! Document model for the document store
//!
//! Documents are JSON objects addressed by a collection path and an id.
//! Collections can be nested under a document (`requests/{id}/messages`).
//! Typed records are decoded at the store boundary with [`Document::decode`],
//! which rejects documents that do not match the record shape.

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// Field map of a document
pub type Fields = Map<String, Value>;

/// Marker key of the server timestamp sentinel
pub const SERVER_TIMESTAMP: &str = "$serverTimestamp";

/// Slash separated path of a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionPath(String);

impl CollectionPath {
    /// Top level collection
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Collection nested under a document of this collection
    pub fn sub(&self, doc_id: &str, name: &str) -> Self {
        Self(format!("{}/{}/{}", self.0, doc_id, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last segment of the path
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Parent collection and document id for nested collections
    pub fn parent(&self) -> Option<(CollectionPath, &str)> {
        let mut segments = self.0.rsplitn(3, '/');
        let _name = segments.next()?;
        let doc_id = segments.next()?;
        let parent = segments.next()?;
        Some((CollectionPath::new(parent), doc_id))
    }

    /// Full path of a document in this collection
    pub fn doc_path(&self, id: &str) -> String {
        format!("{}/{}", self.0, id)
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub collection: CollectionPath,
    pub data: Fields,
}

impl Document {
    pub fn new(collection: CollectionPath, id: impl Into<String>, data: Fields) -> Self {
        Self {
            id: id.into(),
            collection,
            data,
        }
    }

    /// Full path of the document
    pub fn path(&self) -> String {
        self.collection.doc_path(&self.id)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    /// Decode the document into a typed record
    ///
    /// The document id is exposed to the record as an `id` field. Missing
    /// required fields or wrongly typed values yield [`StoreError::Malformed`].
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        let mut fields = self.data.clone();
        fields.insert("id".to_string(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(fields)).map_err(|e| StoreError::Malformed {
            path: self.path(),
            reason: e.to_string(),
        })
    }
}

/// Encode a typed record into document fields, dropping its `id`
pub fn encode<T: Serialize>(record: &T) -> StoreResult<Fields> {
    match serde_json::to_value(record) {
        Ok(Value::Object(mut fields)) => {
            fields.remove("id");
            Ok(fields)
        }
        Ok(other) => Err(StoreError::Malformed {
            path: String::new(),
            reason: format!("expected an object, got {}", other),
        }),
        Err(e) => Err(StoreError::Malformed {
            path: String::new(),
            reason: e.to_string(),
        }),
    }
}

/// Sentinel replaced by the store clock when the write is applied
pub fn server_timestamp() -> Value {
    json!({ SERVER_TIMESTAMP: true })
}

pub fn is_server_timestamp(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|o| o.len() == 1 && o.get(SERVER_TIMESTAMP) == Some(&Value::Bool(true)))
}

/// Whether any top level field carries the server timestamp sentinel
pub fn has_server_timestamps(fields: &Fields) -> bool {
    fields.values().any(is_server_timestamp)
}

/// Replace every server timestamp sentinel with `micros`
pub fn resolve_server_timestamps(fields: &mut Fields, micros: i64) {
    for value in fields.values_mut() {
        if is_server_timestamp(value) {
            *value = Value::from(micros);
        }
    }
}

/// Generate a fresh document id
pub fn new_document_id() -> String {
    Uuid::new_v4().simple().to_string()
}
