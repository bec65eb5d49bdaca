//! Canonical JSON serialization for signing and hashing.
//!
//! Every signature in Palisade is computed over canonical JSON bytes:
//! object keys sorted lexicographically at every nesting level, arrays
//! left in order, no insignificant whitespace. Two implementations that
//! serialize the same record must produce identical bytes, otherwise
//! signatures cannot be verified across process or language boundaries.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while producing canonical bytes.
#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("Failed to serialize value for canonicalization: {reason}")]
    Serialization { reason: String },
}

/// Recursively sorts all object keys in a JSON value.
///
/// Arrays keep their element order; only object key order is normalized.
pub fn sort_json_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key, sort_json_value(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_json_value).collect()),
        other => other,
    }
}

/// Serializes a value to canonical JSON bytes.
pub fn to_canonical_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalError> {
    let json = serde_json::to_value(value).map_err(|e| CanonicalError::Serialization {
        reason: e.to_string(),
    })?;
    serde_json::to_vec(&sort_json_value(json)).map_err(|e| CanonicalError::Serialization {
        reason: e.to_string(),
    })
}

/// Serializes a value to a canonical JSON string.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
    let bytes = to_canonical_vec(value)?;
    String::from_utf8(bytes).map_err(|e| CanonicalError::Serialization {
        reason: e.to_string(),
    })
}
