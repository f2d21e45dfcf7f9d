//! streamsrv - real-time IoT ingestion pipeline
//!
//! Turns raw device messages into the six per-project representations
//! (raw records, timeline counters, events, alarms, rule state, errors)
//! and keeps the project's alarm state machine current.
//!
//! # Modules
//!
//! - `source`: message sources (Redis list, in-process channel)
//! - `deserialize`: schema-driven payload parsing
//! - `enrich`: rule evaluation and derived packets
//! - `classify`: packet / event / alarm-event routing
//! - `dispatch`: concurrent sink writes with per-sink retry
//! - `dead_letter`: error table edge
//! - `publish`: realtime channel
//! - `pipeline`: worker pool and context
//! - `lifecycle`: per-project table provisioning

pub mod bootstrap;
pub mod classify;
pub mod config;
pub mod dead_letter;
pub mod deserialize;
pub mod dispatch;
pub mod enrich;
pub mod lifecycle;
pub mod pipeline;
pub mod publish;
pub mod source;

pub use classify::{classify, Classified};
pub use config::StreamConfig;
pub use dead_letter::DeadLetter;
pub use deserialize::Deserializer;
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use enrich::{Enricher, NoopEvaluator, RedisFunctionEvaluator, RuleEvaluator};
pub use lifecycle::{
    LifecycleAction, LifecycleHandle, LifecycleReport, TableLifecycleManager, TableOutcome,
};
pub use pipeline::{Pipeline, PipelineContext, PipelineStats, ProcessReport};
pub use publish::{BroadcastPublisher, RealtimeMessage, RealtimePublisher, RedisPublisher};
pub use source::{ChannelSource, MessageSource, RawMessage, RedisListSource, SourceEvent};
