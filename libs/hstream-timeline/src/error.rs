//! Error types for hstream-timeline

use errors::StreamError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimelineError {
    #[error("Unsupported granularity: {0}")]
    UnsupportedGranularity(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Range too large: {buckets} buckets exceeds limit of {limit}")]
    RangeTooLarge { buckets: usize, limit: usize },
}

pub type Result<T> = std::result::Result<T, TimelineError>;

impl TimelineError {
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }
}

impl From<TimelineError> for StreamError {
    fn from(err: TimelineError) -> Self {
        match err {
            TimelineError::UnsupportedGranularity(name) => StreamError::UnsupportedGranularity(name),
            TimelineError::ParseError(msg) => StreamError::Parse(msg),
            other @ TimelineError::RangeTooLarge { .. } => StreamError::Parse(other.to_string()),
        }
    }
}
