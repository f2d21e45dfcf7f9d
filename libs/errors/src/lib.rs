//! Unified error handling for hstream services
//!
//! Every library crate keeps its own `thiserror` enum and converts into
//! [`StreamError`] at the service boundary. The variants follow the
//! ingestion error taxonomy: each kind has a fixed handling policy in the
//! pipeline (dead-letter, retry, log-only, fail-fast).

use thiserror::Error;

// ============================================================================
// StreamError - Main error type
// ============================================================================

/// Main error type for the ingestion pipeline and its collaborators
#[derive(Debug, Error)]
pub enum StreamError {
    // ======================================
    // Pipeline Stage Errors
    // ======================================
    /// Malformed payload; recorded in the error store, never retried
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Rule engine failure; payload retained for replay
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Message could not be routed to any sink
    #[error("Classification error: {0}")]
    Classification(String),

    /// A single sink write failed
    #[error("Persistence error on {sink} sink: {message}")]
    Persistence { sink: String, message: String },

    /// Table provisioning or teardown failed for one store
    #[error("Table provisioning error on {table}: {message}")]
    TableProvisioning { table: String, message: String },

    // ======================================
    // Storage Engine Errors
    // ======================================
    #[error("Unsupported granularity: {0}")]
    UnsupportedGranularity(String),

    #[error("Parse error: {0}")]
    Parse(String),

    // ======================================
    // Alarm Errors
    // ======================================
    #[error("Rule {rule_id} is not registered for alarm {alarm_id}")]
    AlarmRuleUnknown { alarm_id: i64, rule_id: i64 },

    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ======================================
    // Infrastructure Errors
    // ======================================
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Service startup failed: {0}")]
    StartupFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using StreamError
pub type StreamResult<T> = Result<T, StreamError>;

impl StreamError {
    /// Short, stable name of the error kind (stored with dead-letter records)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Deserialization(_) => "DeserializationError",
            Self::Evaluation(_) => "EvaluationError",
            Self::Classification(_) => "ClassificationError",
            Self::Persistence { .. } => "PersistenceError",
            Self::TableProvisioning { .. } => "TableProvisioningError",
            Self::UnsupportedGranularity(_) => "UnsupportedGranularity",
            Self::Parse(_) => "ParseError",
            Self::AlarmRuleUnknown { .. } => "AlarmRuleUnknown",
            Self::Configuration(_) | Self::InvalidConfig { .. } => "ConfigurationError",
            Self::Redis(_) => "RedisError",
            Self::Io(_) => "IoError",
            Self::Serialization(_) => "SerializationError",
            Self::StartupFailed(_) => "StartupError",
            Self::Other(_) => "InternalError",
        }
    }

    /// Check if this error is retryable
    ///
    /// Only store-level failures are retried; payload and configuration
    /// problems would fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence { .. } | Self::Redis(_) | Self::Io(_))
    }

    /// Build a persistence error for the named sink
    pub fn persistence(sink: impl Into<String>, message: impl ToString) -> Self {
        Self::Persistence {
            sink: sink.into(),
            message: message.to_string(),
        }
    }
}

// Conversion traits for common error types
impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for StreamError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// Helper macros for creating errors
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::StreamError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::StreamError::Configuration(format!($fmt, $($arg)*))
    };
}
