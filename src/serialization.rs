//! Serialization for network communication.
//!
//! The wire encoding of protocol messages is delegated to serde; this
//! module only selects the concrete format.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{DriverError, DriverResult};

/// Serialization format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationFormat {
    /// Bincode binary format (efficient)
    #[default]
    Bincode,

    /// JSON text format (human readable)
    Json,
}

/// Concrete serializer selected by format
#[derive(Debug, Clone, Copy)]
pub struct Serializer {
    format: SerializationFormat,
}

impl Serializer {
    /// Create a serializer for the given format
    pub fn new(format: SerializationFormat) -> Self {
        Serializer { format }
    }

    /// The format this serializer encodes with
    pub fn format(&self) -> SerializationFormat {
        self.format
    }

    /// Serialize a value into bytes
    pub fn serialize<T: Serialize>(&self, value: &T) -> DriverResult<Vec<u8>> {
        match self.format {
            SerializationFormat::Bincode => bincode::serialize(value)
                .map_err(|e| DriverError::SerializationError(e.to_string())),
            SerializationFormat::Json => serde_json::to_vec(value)
                .map_err(|e| DriverError::SerializationError(e.to_string())),
        }
    }

    /// Deserialize bytes into a value
    pub fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> DriverResult<T> {
        match self.format {
            SerializationFormat::Bincode => bincode::deserialize(bytes)
                .map_err(|e| DriverError::DecodeError(e.to_string())),
            SerializationFormat::Json => serde_json::from_slice(bytes)
                .map_err(|e| DriverError::DecodeError(e.to_string())),
        }
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Serializer::new(SerializationFormat::default())
    }
}
