//! Design payloads
//!
//! The store treats a payload as opaque structured data. The engine only
//! needs to move it around, compare it and measure it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque structured content of a design
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesignPayload(Value);

impl DesignPayload {
    /// Empty design (`{}`)
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self(Value::Object(serde_json::Map::new()))
    }

    /// Wrap a JSON value
    #[inline]
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Borrow the JSON value
    #[inline]
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Mutable access to the JSON value
    #[inline]
    pub fn as_value_mut(&mut self) -> &mut Value {
        &mut self.0
    }

    /// Unwrap into the JSON value
    #[inline]
    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Canonical encoding
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        // serde_json::Map is a BTreeMap without `preserve_order`, so keys are sorted
        serde_json::to_vec(&self.0).unwrap_or_default()
    }

    /// Size of the canonical encoding in bytes
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.to_bytes().len()
    }

    /// True for `{}`, `[]` and `null`
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.is_empty(),
            _ => false,
        }
    }
}

impl Default for DesignPayload {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for DesignPayload {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
