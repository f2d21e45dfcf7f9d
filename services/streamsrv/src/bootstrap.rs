//! Service bootstrap
//!
//! Command-line arguments and logging setup, ahead of everything else in
//! `main`.

use clap::Parser;
use common::logging::{self, LogConfig};
use common::redis::RedisClient;
use errors::{StreamError, StreamResult};
use hstream_store::{KeySpaceConfig, MemoryStore, RedisStore, SharedStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::{EvaluatorKind, StoreBackend, StreamConfig, DEFAULT_CONFIG_PATH};
use crate::enrich::{NoopEvaluator, RedisFunctionEvaluator, RuleEvaluator};
use crate::publish::{RealtimePublisher, RedisPublisher};

/// Command-line arguments for streamsrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "streamsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Real-time IoT ingestion pipeline",
    long_about = None
)]
pub struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH, env = "STREAMSRV_CONFIG")]
    pub config: PathBuf,

    /// Log filter, overrides `logging.level` (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,

    /// Print the effective configuration as YAML and exit
    #[arg(long)]
    pub print_config: bool,
}

/// Initialize logging from the `logging` section and CLI overrides
pub fn initialize_logging(args: &Args, config: &StreamConfig) -> StreamResult<()> {
    let mut section = config.logging.clone();
    if let Some(level) = &args.log_level {
        section.level = level.clone();
    }
    let log_config = LogConfig::from_section(&config.service.name, &section);
    logging::init_with_config(log_config)
        .map_err(|e| StreamError::Configuration(format!("Failed to init logging: {}", e)))
}

/// Render the effective configuration
pub fn render_config(config: &StreamConfig) -> StreamResult<String> {
    Ok(serde_yaml::to_string(config)?)
}

// ============================================================================
// Backends
// ============================================================================

/// Connect the shared Redis pool
pub async fn connect_redis(config: &StreamConfig) -> StreamResult<Arc<RedisClient>> {
    let client = RedisClient::with_config(config.redis.clone())
        .await
        .map_err(|e| StreamError::StartupFailed(format!("Redis unavailable: {:#}", e)))?;
    info!(url = client.url(), "Redis connected");
    Ok(Arc::new(client))
}

/// Table store selected by `store.backend`
pub fn build_store(config: &StreamConfig, redis: &Arc<RedisClient>) -> SharedStore {
    match config.store.backend {
        StoreBackend::Redis => Arc::new(RedisStore::from_client(
            Arc::clone(redis),
            KeySpaceConfig::with_namespace(config.store.namespace.clone()),
        )),
        StoreBackend::Memory => {
            info!("Using in-memory table store, data is lost on exit");
            Arc::new(MemoryStore::new())
        },
    }
}

pub fn build_evaluator(config: &StreamConfig, redis: &Arc<RedisClient>) -> Arc<dyn RuleEvaluator> {
    match config.rules.evaluator {
        EvaluatorKind::None => Arc::new(NoopEvaluator),
        EvaluatorKind::RedisFunction => Arc::new(RedisFunctionEvaluator::new(
            Arc::clone(redis),
            config.rules.function.clone(),
        )),
    }
}

pub fn build_publisher(
    config: &StreamConfig,
    redis: &Arc<RedisClient>,
) -> Option<Arc<dyn RealtimePublisher>> {
    if !config.publish.enabled {
        return None;
    }
    let publisher = RedisPublisher::new(
        Arc::clone(redis),
        &config.publish.channel_prefix,
        config.service.project_id,
    );
    info!(channel = publisher.channel(), "Realtime publishing enabled");
    Some(Arc::new(publisher))
}
