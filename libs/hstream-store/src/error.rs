//! Error types for hstream-store

use errors::StreamError;
use hstream_timeline::TimelineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("Table is disabled: {0}")]
    TableDisabled(String),

    #[error("Column family {family} not declared on table {table}")]
    FamilyNotFound { table: String, family: String },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error(transparent)]
    Timeline(#[from] TimelineError),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Backend failures may succeed on a later attempt; schema and record
    /// problems will not
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Backend(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::SerializationError(err.to_string())
    }
}

impl From<StoreError> for StreamError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeline(e) => e.into(),
            StoreError::InvalidRecord(msg) => StreamError::Parse(msg),
            StoreError::SerializationError(msg) => StreamError::Serialization(msg),
            other => StreamError::persistence("store", other),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_family_not_found_display() {
        let err = StoreError::FamilyNotFound {
            table: "hproject_1".to_string(),
            family: "bogus".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Column family bogus not declared on table hproject_1"
        );
    }

    #[test]
    fn test_only_backend_errors_retry() {
        assert!(StoreError::Backend(anyhow::anyhow!("timeout")).is_retryable());
        assert!(!StoreError::TableNotFound("t".into()).is_retryable());
        assert!(!StoreError::TableDisabled("t".into()).is_retryable());
    }

    #[test]
    fn test_into_stream_error() {
        let err: StreamError = StoreError::TableNotFound("event_1".into()).into();
        assert_eq!(err.kind(), "PersistenceError");

        let err: StreamError =
            StoreError::Timeline(TimelineError::UnsupportedGranularity("WEEK".into())).into();
        assert_eq!(err.kind(), "UnsupportedGranularity");
    }
}
