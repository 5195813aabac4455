//! Content hashing for change detection.
//!
//! Definitions are canonicalized before hashing so that reordering object
//! keys or list elements yields the same fingerprint. A stored binding whose
//! hash equals the current one needs no work.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{Result, StateError};

/// Hasher for computing canonical content hashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentHasher;

impl ContentHasher {
    /// Creates a new content hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Returns the canonical form of a JSON value.
    ///
    /// Object keys are sorted, and array elements are sorted by their own
    /// canonical serialization.
    #[must_use]
    pub fn canonicalize(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut sorted = Map::new();
                for key in keys {
                    if let Some(inner) = map.get(key) {
                        sorted.insert(key.clone(), Self::canonicalize(inner));
                    }
                }
                Value::Object(sorted)
            }
            Value::Array(items) => {
                let mut canonical: Vec<(String, Value)> = items
                    .iter()
                    .map(|item| {
                        let item = Self::canonicalize(item);
                        (item.to_string(), item)
                    })
                    .collect();
                canonical.sort_by(|a, b| a.0.cmp(&b.0));
                Value::Array(canonical.into_iter().map(|(_, item)| item).collect())
            }
            other => other.clone(),
        }
    }

    /// Computes the hash of a JSON value.
    #[must_use]
    pub fn hash_value(&self, value: &Value) -> String {
        let canonical = Self::canonicalize(value);
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Computes the hash of any serializable definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the definition cannot be converted to JSON.
    pub fn hash_serializable<T: Serialize + ?Sized>(&self, definition: &T) -> Result<String> {
        let value = serde_json::to_value(definition).map_err(|e| {
            StateError::serialization(format!("Failed to serialize definition for hashing: {e}"))
        })?;
        Ok(self.hash_value(&value))
    }

    /// Computes the hash of a raw text document.
    #[must_use]
    pub fn hash_text(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}
