//! Object graph serialization for serializable and remote flavors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DataTransferError, Result};

/// Serializes object graphs to bytes and back
pub trait ObjectSerializer: Send + Sync {
    /// Write `value` to bytes
    fn serialize(&self, value: &Value) -> Result<Vec<u8>>;

    /// Read a value back
    fn deserialize(&self, bytes: &[u8]) -> Result<Value>;
}

/// JSON object serializer
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonObjectSerializer;

impl ObjectSerializer for JsonObjectSerializer {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Marshalled form of a remote object reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarshalledObject {
    /// Interface or type the reference stands for
    pub type_name: String,
    /// Marshalled state
    pub payload: Value,
}

impl MarshalledObject {
    /// Marshal a reference
    pub fn new(type_name: impl Into<String>, payload: Value) -> Self {
        Self {
            type_name: type_name.into(),
            payload,
        }
    }

    /// Serialize through `serializer`
    pub fn marshal(&self, serializer: &dyn ObjectSerializer) -> Result<Vec<u8>> {
        serializer.serialize(&serde_json::to_value(self)?)
    }

    /// Deserialize through `serializer`
    pub fn unmarshal(bytes: &[u8], serializer: &dyn ObjectSerializer) -> Result<Self> {
        let value = serializer.deserialize(bytes)?;
        serde_json::from_value(value)
            .map_err(|e| DataTransferError::InvalidData(format!("not a marshalled object: {e}")))
    }
}
