//! Cache key derivation.
//!
//! A cache key is a stable digest over a logical prefix, the ordered
//! positional arguments, and the *sorted* keyword arguments of the wrapped
//! call. Sorting the keyword arguments makes argument-order-insensitive
//! calls collide correctly; the digest keeps unrelated calls apart and
//! yields filesystem-safe names for the file tier.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Builder for cache keys.
#[derive(Debug, Clone, Default)]
pub struct KeyBuilder {
    prefix: String,
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
}

impl KeyBuilder {
    /// Start a key for the given logical operation prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Serialize) -> Self {
        self.args
            .push(serde_json::to_value(value).unwrap_or(Value::Null));
        self
    }

    /// Add a named argument. Insertion order does not matter; names are
    /// sorted during digesting.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        self.kwargs
            .insert(name.into(), serde_json::to_value(value).unwrap_or(Value::Null));
        self
    }

    /// Produce the hex digest key.
    pub fn build(self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prefix.as_bytes());
        hasher.update(b":");
        // Vec serializes in insertion order, BTreeMap in sorted key order.
        hasher.update(
            serde_json::to_string(&self.args)
                .unwrap_or_default()
                .as_bytes(),
        );
        hasher.update(b":");
        hasher.update(
            serde_json::to_string(&self.kwargs)
                .unwrap_or_default()
                .as_bytes(),
        );
        hex::encode(hasher.finalize())
    }
}
