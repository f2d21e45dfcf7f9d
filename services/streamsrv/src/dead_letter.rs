//! Dead-letter edge
//!
//! Failed payloads land in the project's error table together with the
//! replay label of the sink or stage that failed.

use common::{retry_with_backoff_if, RetryPolicy};
use errors::StreamError;
use hstream_model::ErrorRecord;
use hstream_store::{ErrorSink, StoreError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

/// Replay labels of the pipeline stages
pub mod stage {
    pub const DESERIALIZATION: &str = "deserialization";
    pub const EVALUATION: &str = "evaluation";
    pub const CLASSIFICATION: &str = "classification";
}

#[derive(Clone)]
pub struct DeadLetter {
    sink: ErrorSink,
    retry: RetryPolicy,
    recorded: Arc<AtomicU64>,
    lost: Arc<AtomicU64>,
}

impl DeadLetter {
    pub fn new(sink: ErrorSink, retry: RetryPolicy) -> Self {
        Self {
            sink,
            retry,
            recorded: Arc::new(AtomicU64::new(0)),
            lost: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Store one failed payload; returns false when the error table itself
    /// rejected the record after the retry budget
    ///
    /// `timestamp` is the message time when known, otherwise now.
    pub async fn record(
        &self,
        label: &str,
        err: &StreamError,
        received: &str,
        timestamp: Option<i64>,
    ) -> bool {
        let record = ErrorRecord {
            stage: label.to_string(),
            error_type: err.kind().to_string(),
            message: err.to_string(),
            received_packet: received.to_string(),
            timestamp: timestamp.unwrap_or_else(|| self.sink.now_millis()),
        };
        warn!(stage = label, kind = err.kind(), "Dead-lettering message: {}", err);

        let written = retry_with_backoff_if(
            || self.sink.record(&record),
            self.retry.max_attempts,
            self.retry.initial_delay(),
            StoreError::is_retryable,
        )
        .await;
        match written {
            Ok(_) => {
                self.recorded.fetch_add(1, Ordering::Relaxed);
                true
            },
            Err(e) => {
                self.lost.fetch_add(1, Ordering::Relaxed);
                error!(
                    table = self.sink.table(),
                    stage = label,
                    "Dead-letter write failed, message dropped: {}",
                    e
                );
                false
            },
        }
    }

    /// Records written to the error table
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    /// Records the error table refused
    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }
}
