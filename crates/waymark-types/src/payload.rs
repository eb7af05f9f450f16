use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;

/// A JSON value flowing across a persistence boundary: workflow inputs and
/// results, activity args/kwargs, signal payloads, heartbeat details, query
/// payloads.
///
/// Construction always goes through [`Payload::encode`], which is the single
/// point enforcing the "JSON round-trippable or fail fast" rule instead of
/// panicking deep inside the scheduler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Value);

impl Payload {
    /// Wrap an already-constructed JSON value. Infallible: any `serde_json::Value`
    /// is by definition JSON.
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Serialize `value` to JSON, failing with [`DomainError::Serialization`]
    /// rather than panicking when it cannot round-trip.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, DomainError> {
        Ok(Self(serde_json::to_value(value)?))
    }

    /// Deserialize the wrapped value back into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DomainError> {
        Ok(serde_json::from_value(self.0.clone())?)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn null() -> Self {
        Self(Value::Null)
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::null()
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
