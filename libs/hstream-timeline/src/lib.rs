//! hstream Time-Bucketed Storage Engine
//!
//! Pure key arithmetic behind the timeline counters: every ingested message
//! increments one counter per granularity, addressed by a bucket key built
//! from an identifier and the message timestamp.
//!
//! # Key Components
//!
//! - **Granularity**: YEAR..MILLISECOND truncation levels
//! - **bucket**: key construction, splitting, truncation and parsing
//! - **range**: zero-seeded query ranges and JSON rendering
//!
//! Counter storage itself lives in `hstream-store` (`TimelineSink`).

pub mod bucket;
pub mod error;
pub mod granularity;
pub mod range;

// Re-exports
pub use bucket::{
    compute_bucket_key, parse_bucket_timestamp, split_bucket_key, strip_identifier,
    truncate_key_to_granularity, DELIMITER,
};
pub use error::{Result, TimelineError};
pub use granularity::Granularity;
pub use range::{
    initialize_range, merge_count, parse_timezone, to_json_series, to_points, TimelinePoint,
    MAX_RANGE_BUCKETS,
};
