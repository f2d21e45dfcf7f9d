//! hstream shared service library
//!
//! Plumbing shared by the ingestion service and the storage crates:
//! - logging (console + daily rolling file, runtime level changes)
//! - Redis client with connection pooling
//! - layered configuration loading
//! - shutdown signal handling
//! - bounded exponential backoff

#[cfg(feature = "redis")]
pub mod redis;

pub mod config_loader;
pub mod logging;
pub mod retry;
pub mod shutdown;

pub use logging::{LogConfig, LoggingConfig};
pub use retry::{retry_with_backoff, retry_with_backoff_if, RetryPolicy};

#[cfg(feature = "redis")]
pub use crate::redis::{RedisClient, RedisConfig};

// Re-export common dependencies
pub use anyhow;
pub use serde;
pub use serde_json;
pub use tokio;

// Pre-import common types
pub mod prelude {
    #[cfg(feature = "redis")]
    pub use crate::redis::RedisClient;
    pub use crate::retry::RetryPolicy;
}
