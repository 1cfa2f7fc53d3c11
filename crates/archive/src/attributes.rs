//! Opaque DICOM attribute sets.
//!
//! Request and report payloads are persisted as attribute sets keyed by DICOM keyword
//! (`TransactionUID`, `ReferencedSOPSequence`, ...). The ledger never interprets them
//! beyond what the typed payloads in [`crate::commitment`] expose.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use stgcmt_core::{DomainError, DomainResult};

/// An attribute set represented as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(Map<String, JsonValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value; only objects are valid attribute sets.
    pub fn from_json(value: JsonValue) -> DomainResult<Self> {
        match value {
            JsonValue::Object(map) => Ok(Self(map)),
            other => Err(DomainError::validation(format!(
                "attribute set must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Encode a typed payload as an attribute set.
    pub fn encode<T: Serialize>(payload: &T) -> DomainResult<Self> {
        let value = serde_json::to_value(payload)
            .map_err(|e| DomainError::validation(format!("payload serialization failed: {e}")))?;
        Self::from_json(value)
    }

    /// Decode the attribute set into a typed payload.
    pub fn decode<T: DeserializeOwned>(&self) -> DomainResult<T> {
        serde_json::from_value(JsonValue::Object(self.0.clone()))
            .map_err(|e| DomainError::validation(format!("payload deserialization failed: {e}")))
    }

    pub fn get(&self, keyword: &str) -> Option<&JsonValue> {
        self.0.get(keyword)
    }

    pub fn get_str(&self, keyword: &str) -> Option<&str> {
        self.0.get(keyword).and_then(JsonValue::as_str)
    }

    pub fn set(&mut self, keyword: impl Into<String>, value: impl Into<JsonValue>) {
        self.0.insert(keyword.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(self.0.clone())
    }

    pub fn into_json(self) -> JsonValue {
        JsonValue::Object(self.0)
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
