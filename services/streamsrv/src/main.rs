//! Ingestion Service (streamsrv)
//!
//! Startup order: configuration, logging, backends, project tables, alarm
//! state, pipeline. Ctrl+C or SIGTERM drains the pipeline and stops.

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use errors::StreamResult;
use hstream_alarm::AlarmStateMachine;
use hstream_store::{system_clock, ProjectSinks};
use streamsrv::bootstrap::{self, Args};
use streamsrv::lifecycle::{listen_project_events, TableLifecycleManager};
use streamsrv::{Pipeline, PipelineContext, RedisListSource, StreamConfig};

#[tokio::main]
async fn main() -> StreamResult<()> {
    // ============ Phase 1: Configuration and logging ============
    let args = Args::parse();
    let config = StreamConfig::load(&args.config)?;

    if args.print_config {
        print!("{}", bootstrap::render_config(&config)?);
        return Ok(());
    }
    if args.validate {
        config.validate()?;
        println!("Configuration OK: {}", args.config.display());
        return Ok(());
    }

    bootstrap::initialize_logging(&args, &config)?;
    config.validate()?;
    let project_id = config.service.project_id;
    info!(
        project_id,
        config = %args.config.display(),
        "Starting {} v{}",
        config.service.name,
        env!("CARGO_PKG_VERSION")
    );

    // ============ Phase 2: Backends ============
    let redis = bootstrap::connect_redis(&config).await?;
    let store = bootstrap::build_store(&config, &redis);

    // ============ Phase 3: Project tables ============
    let lifecycle = Arc::new(TableLifecycleManager::new(
        store.clone(),
        config.lifecycle.workers,
        config.lifecycle.queue_capacity,
    ));
    let report = lifecycle.on_project_updated(project_id).wait().await;
    if !report.is_complete() {
        warn!(
            project_id,
            failed = report.failures(),
            "Some project tables are unavailable, affected sinks will dead-letter"
        );
    }

    // ============ Phase 4: Alarm state ============
    let clock = system_clock();
    let sinks = ProjectSinks::new(store.clone(), project_id, clock.clone());
    let alarms =
        Arc::new(AlarmStateMachine::rehydrate(&sinks.rule_state, config.alarm_rules()).await);

    // ============ Phase 5: Pipeline ============
    let context = Arc::new(PipelineContext::new(
        sinks,
        config.packets.clone(),
        clock,
        bootstrap::build_evaluator(&config, &redis),
        alarms,
        bootstrap::build_publisher(&config, &redis),
        config.retry,
    ));
    let pipeline = Pipeline::new(context, config.service.workers, config.service.queue_capacity);
    let source = RedisListSource::new(
        redis.clone(),
        config.source_key(),
        config.source.blpop_timeout_secs,
    );
    info!(key = %source.key(), "Consuming messages");

    // ============ Phase 6: Project events and shutdown ============
    let token = CancellationToken::new();
    let listener = config.lifecycle.listen.then(|| {
        tokio::spawn(listen_project_events(
            redis.clone(),
            config.lifecycle.events_key.clone(),
            config.source.blpop_timeout_secs,
            lifecycle.clone(),
            token.clone(),
        ))
    });
    let signals = common::shutdown::cancel_on_shutdown(token.clone());

    // ============ Phase 7: Run until shutdown ============
    let result = pipeline.run(source, token.clone()).await;
    token.cancel();

    if let Some(listener) = listener {
        if let Err(e) = listener.await {
            error!("Project event listener failed: {}", e);
        }
    }
    lifecycle.shutdown().await;
    let _ = signals.await;

    let stats = result?;
    info!(
        received = stats.received,
        processed = stats.processed,
        malformed = stats.malformed,
        sink_failures = stats.sink_failures,
        dead_lettered = stats.dead_lettered,
        "streamsrv stopped"
    );
    Ok(())
}
