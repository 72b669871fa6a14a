//! Documents and content identity.
//!
//! A [`Document`] is the runtime unit a model produces: an
//! identity-relevant `selector` projection plus the full transformed,
//! schema-shaped `data` view. Documents are value objects - every
//! query/mutation/create produces a new one.
//!
//! [`content_id`] is the digest that names document services and drives
//! deduplication. Object keys are sorted recursively before serialization
//! so semantically identical data always hashes identically; the dedup
//! invariant depends on it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A value object produced by a model from raw source data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Identity-relevant projection, e.g. `{"id": 1}`.
    pub selector: Value,
    /// The full transformed, schema-shaped view.
    pub data: Value,
}

impl Document {
    pub fn new(selector: Value, data: Value) -> Document {
        Document { selector, data }
    }

    /// Content identity of this document's data.
    pub fn content_id(&self) -> String {
        content_id(&self.data)
    }
}

/// Sort a JSON value's object keys recursively for canonical serialization.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(key, child)| (key.clone(), canonicalize(child)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        _ => value.clone(),
    }
}

/// Hex digest over the canonical serialization of a JSON value.
///
/// This is an identity/dedup key, not a security boundary.
pub fn content_id(data: &Value) -> String {
    let canonical = canonicalize(data);
    let encoded = serde_json::to_string(&canonical).expect("serialize canonical json");

    let mut hasher = Sha256::new();
    hasher.update(encoded.as_bytes());
    hex::encode(hasher.finalize())
}
