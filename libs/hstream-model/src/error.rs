//! Model Layer Error Types

use errors::StreamError;
use thiserror::Error;

/// Result type for hstream-model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Model layer errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Timestamp field missing from the payload
    #[error("Timestamp field not found: {0}")]
    TimestampFieldNotFound(String),

    /// Timestamp value does not match the declared format
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Field value does not match the declared type
    #[error("Invalid value for field {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Unknown enum name (field type, multiplicity, alarm state)
    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    /// Rule verdict attached to a derived packet is missing or malformed
    #[error("Invalid rule verdict: {0}")]
    InvalidVerdict(String),
}

impl From<ModelError> for StreamError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::InvalidVerdict(msg) => StreamError::Classification(msg),
            other => StreamError::Deserialization(other.to_string()),
        }
    }
}
