//! # Configuration for the ingestion service
//!
//! `StreamConfig` is assembled by figment, lowest to highest priority:
//!
//! 1. built-in defaults (`StreamConfig::default()`)
//! 2. the YAML file (`config/streamsrv.yaml` or `--config`)
//! 3. environment variables prefixed `STREAMSRV_`, nested with `__`
//!    (`STREAMSRV_REDIS__URL`, `STREAMSRV_SERVICE__WORKERS`)
//!
//! ## Configuration File Example
//!
//! ```yaml
//! service:
//!   project_id: 1
//!   workers: 4
//! store:
//!   backend: redis
//! rules:
//!   evaluator: redis_function
//! packets:
//!   - packet_id: 12
//!     device_id: 3
//!     project_id: 1
//!     name: weather
//!     timestamp_field: ts
//!     timestamp_format: unix_seconds
//!     fields:
//!       temperature: { id: 1, type: DOUBLE }
//!       ts: { id: 2, type: TIMESTAMP }
//! alarms:
//!   - id: 7
//!     rules: [42, 43]
//! ```
//!
//! Configuration is read once at startup; restart the service to apply
//! changes.

use common::{LoggingConfig, RedisConfig, RetryPolicy};
use errors::{StreamError, StreamResult};
use hstream_model::PacketSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "STREAMSRV_";

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "config/streamsrv.yaml";

// ============================================================================
// Sections
// ============================================================================

/// `service` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSection {
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Project whose messages this instance ingests
    #[serde(default)]
    pub project_id: i64,
    /// Pipeline workers; messages of one device always hit the same worker
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Bounded queue in front of each worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_service_name() -> String {
    "streamsrv".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            project_id: 0,
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Table store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    Memory,
}

/// `store` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Redis key namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    "hstream".to_string()
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            namespace: default_namespace(),
        }
    }
}

/// `source` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSection {
    /// Redis list to consume; `streaming.<projectId>` when unset
    #[serde(default)]
    pub list_key: Option<String>,
    /// BLPOP timeout; bounds how long shutdown waits on an idle source
    #[serde(default = "default_blpop_timeout")]
    pub blpop_timeout_secs: f64,
}

fn default_blpop_timeout() -> f64 {
    1.0
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            list_key: None,
            blpop_timeout_secs: default_blpop_timeout(),
        }
    }
}

/// `publish` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Channel is `<channel_prefix>.<projectId>`
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
}

fn default_true() -> bool {
    true
}

fn default_channel_prefix() -> String {
    "hstream.realtime".to_string()
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            enabled: true,
            channel_prefix: default_channel_prefix(),
        }
    }
}

/// `lifecycle` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleSection {
    #[serde(default = "default_lifecycle_workers")]
    pub workers: usize,
    #[serde(default = "default_lifecycle_queue")]
    pub queue_capacity: usize,
    /// Redis list carrying project created/updated/deleted events
    #[serde(default = "default_events_key")]
    pub events_key: String,
    #[serde(default = "default_true")]
    pub listen: bool,
}

fn default_lifecycle_workers() -> usize {
    2
}

fn default_lifecycle_queue() -> usize {
    64
}

fn default_events_key() -> String {
    "hstream:project_events".to_string()
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            workers: default_lifecycle_workers(),
            queue_capacity: default_lifecycle_queue(),
            events_key: default_events_key(),
            listen: true,
        }
    }
}

/// Rule evaluator selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorKind {
    /// No rule engine: no events, no alarms
    #[default]
    None,
    /// Redis Function returning a JSON array of verdicts
    RedisFunction,
}

/// `rules` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesSection {
    #[serde(default)]
    pub evaluator: EvaluatorKind,
    #[serde(default = "default_function")]
    pub function: String,
}

fn default_function() -> String {
    "hstream_evaluate".to_string()
}

impl Default for RulesSection {
    fn default() -> Self {
        Self {
            evaluator: EvaluatorKind::default(),
            function: default_function(),
        }
    }
}

/// One alarm and the rules that drive it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmDefinition {
    pub id: i64,
    pub rules: Vec<i64>,
}

// ============================================================================
// StreamConfig
// ============================================================================

/// Complete service configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub lifecycle: LifecycleSection,
    #[serde(default)]
    pub rules: RulesSection,
    /// Packet definitions of the project
    #[serde(default)]
    pub packets: Vec<PacketSchema>,
    #[serde(default)]
    pub alarms: Vec<AlarmDefinition>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StreamConfig {
    /// Load from defaults, `path` and `STREAMSRV_` variables
    pub fn load(path: &Path) -> StreamResult<Self> {
        common::config_loader::load_config(path, ENV_PREFIX)
    }

    /// Redis list the source consumes
    pub fn source_key(&self) -> String {
        self.source
            .list_key
            .clone()
            .unwrap_or_else(|| format!("streaming.{}", self.service.project_id))
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> StreamResult<()> {
        if self.service.workers == 0 {
            return Err(invalid("service.workers", "must be at least 1"));
        }
        if self.service.queue_capacity == 0 {
            return Err(invalid("service.queue_capacity", "must be at least 1"));
        }
        if self.lifecycle.workers == 0 || self.lifecycle.queue_capacity == 0 {
            return Err(invalid("lifecycle", "workers and queue_capacity must be at least 1"));
        }
        if self.store.backend == StoreBackend::Redis && self.redis.url.trim().is_empty() {
            return Err(invalid("redis.url", "must not be empty"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.source.blpop_timeout_secs <= 0.0 {
            return Err(invalid("source.blpop_timeout_secs", "must be positive"));
        }

        let mut packet_ids = HashSet::new();
        for packet in &self.packets {
            if !packet_ids.insert(packet.packet_id) {
                return Err(invalid(
                    "packets",
                    format!("duplicate packet id {}", packet.packet_id),
                ));
            }
            if packet.project_id != self.service.project_id {
                return Err(invalid(
                    "packets",
                    format!(
                        "packet {} belongs to project {}, service ingests project {}",
                        packet.packet_id, packet.project_id, self.service.project_id
                    ),
                ));
            }
        }

        let mut alarm_ids = HashSet::new();
        for alarm in &self.alarms {
            if !alarm_ids.insert(alarm.id) {
                return Err(invalid("alarms", format!("duplicate alarm id {}", alarm.id)));
            }
            if alarm.rules.is_empty() {
                return Err(invalid("alarms", format!("alarm {} has no rules", alarm.id)));
            }
        }
        Ok(())
    }

    /// Alarm id -> rule ids mapping for the state machine
    pub fn alarm_rules(&self) -> BTreeMap<i64, Vec<i64>> {
        self.alarms
            .iter()
            .map(|alarm| (alarm.id, alarm.rules.clone()))
            .collect()
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> StreamError {
    StreamError::InvalidConfig {
        field: field.to_string(),
        reason: reason.into(),
    }
}
