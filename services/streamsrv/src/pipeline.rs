//! Ingestion pipeline
//!
//! Deserialize → Enrich+Evaluate → Classify → Dispatch, run by a fixed
//! pool of workers. Messages are routed to workers by hashing their key,
//! so one device's packets are always handled in arrival order by the
//! same worker. Stage failures go to the dead-letter edge; nothing a
//! single message does stops the pipeline.

use crate::classify::classify;
use crate::dead_letter::{stage, DeadLetter};
use crate::deserialize::Deserializer;
use crate::dispatch::Dispatcher;
use crate::enrich::{Enricher, RuleEvaluator};
use crate::publish::RealtimePublisher;
use crate::source::{MessageSource, RawMessage, SourceEvent};
use common::RetryPolicy;
use errors::{StreamError, StreamResult};
use hstream_alarm::AlarmStateMachine;
use hstream_model::PacketSchema;
use hstream_store::{ProjectSinks, SharedClock};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a failed source poll
const SOURCE_ERROR_BACKOFF: Duration = Duration::from_millis(500);

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    processed: AtomicU64,
    malformed: AtomicU64,
    evaluation_failures: AtomicU64,
    classification_failures: AtomicU64,
    derived: AtomicU64,
    sink_failures: AtomicU64,
    transitions: AtomicU64,
    unknown_rules: AtomicU64,
}

/// Snapshot of pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub received: u64,
    /// Messages that produced a packet
    pub processed: u64,
    /// Envelope or deserialization failures
    pub malformed: u64,
    pub evaluation_failures: u64,
    pub classification_failures: u64,
    pub derived: u64,
    pub sink_failures: u64,
    pub transitions: u64,
    pub unknown_rules: u64,
    pub dead_lettered: u64,
}

/// Per-message result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub deserialized: bool,
    pub evaluation_failed: bool,
    pub derived: usize,
    pub written: usize,
    pub failed: usize,
    pub transitions: usize,
    pub unknown_rules: usize,
}

// ============================================================================
// Context
// ============================================================================

/// Everything one project's pipeline needs, wired explicitly at startup
pub struct PipelineContext {
    pub project_id: i64,
    deserializer: Deserializer,
    enricher: Enricher,
    dispatcher: Dispatcher,
    dead_letter: DeadLetter,
    counters: Counters,
}

impl PipelineContext {
    pub fn new(
        sinks: ProjectSinks,
        schemas: impl IntoIterator<Item = PacketSchema>,
        clock: SharedClock,
        evaluator: Arc<dyn RuleEvaluator>,
        alarms: Arc<AlarmStateMachine>,
        publisher: Option<Arc<dyn RealtimePublisher>>,
        retry: RetryPolicy,
    ) -> Self {
        let dead_letter = DeadLetter::new(sinks.error.clone(), retry);
        let project_id = sinks.project_id;
        Self {
            project_id,
            deserializer: Deserializer::new(schemas, clock),
            enricher: Enricher::new(evaluator),
            dispatcher: Dispatcher::new(sinks, alarms, dead_letter.clone(), publisher, retry),
            dead_letter,
            counters: Counters::default(),
        }
    }

    pub fn alarms(&self) -> &Arc<AlarmStateMachine> {
        self.dispatcher.alarms()
    }

    /// Run one message through every stage
    pub async fn process(&self, message: &RawMessage) -> ProcessReport {
        let mut report = ProcessReport::default();
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let received = message.payload_text();

        let packet = match self.deserializer.deserialize(message) {
            Ok(packet) => packet,
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                self.dead_letter
                    .record(stage::DESERIALIZATION, &e, &received, None)
                    .await;
                return report;
            },
        };
        report.deserialized = true;
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        let timestamp = packet.timestamp_millis();

        let enrichment = self.enricher.enrich(packet).await;
        if let Some(e) = &enrichment.error {
            report.evaluation_failed = true;
            self.counters.evaluation_failures.fetch_add(1, Ordering::Relaxed);
            self.dead_letter
                .record(stage::EVALUATION, e, &received, timestamp)
                .await;
        }
        report.derived = enrichment.derived.len();
        self.counters
            .derived
            .fetch_add(report.derived as u64, Ordering::Relaxed);

        let packets = std::iter::once(enrichment.packet).chain(enrichment.derived);
        for packet in packets {
            let classified = match classify(packet) {
                Ok(classified) => classified,
                Err(e) => {
                    self.counters
                        .classification_failures
                        .fetch_add(1, Ordering::Relaxed);
                    self.dead_letter
                        .record(stage::CLASSIFICATION, &e, &received, timestamp)
                        .await;
                    continue;
                },
            };

            let outcome = self
                .dispatcher
                .dispatch(&classified, &message.key, &received)
                .await;
            report.written += outcome.written.len();
            report.failed += outcome.failed.len();
            if outcome.transition.is_some() {
                report.transitions += 1;
            }
            if outcome.unknown_rule.is_some() {
                report.unknown_rules += 1;
            }
        }

        self.counters
            .sink_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        self.counters
            .transitions
            .fetch_add(report.transitions as u64, Ordering::Relaxed);
        self.counters
            .unknown_rules
            .fetch_add(report.unknown_rules as u64, Ordering::Relaxed);
        report
    }

    /// Dead-letter a source entry that never became a message
    pub async fn reject_malformed(&self, raw: &str, reason: &str) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        self.counters.malformed.fetch_add(1, Ordering::Relaxed);
        let err = StreamError::Deserialization(reason.to_string());
        self.dead_letter
            .record(stage::DESERIALIZATION, &err, raw, None)
            .await;
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            received: c.received.load(Ordering::Relaxed),
            processed: c.processed.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            evaluation_failures: c.evaluation_failures.load(Ordering::Relaxed),
            classification_failures: c.classification_failures.load(Ordering::Relaxed),
            derived: c.derived.load(Ordering::Relaxed),
            sink_failures: c.sink_failures.load(Ordering::Relaxed),
            transitions: c.transitions.load(Ordering::Relaxed),
            unknown_rules: c.unknown_rules.load(Ordering::Relaxed),
            dead_lettered: self.dead_letter.recorded(),
        }
    }
}

// ============================================================================
// Worker pool
// ============================================================================

/// Worker owning `key` out of `workers`
pub fn worker_index(key: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % workers.max(1) as u64) as usize
}

pub struct Pipeline {
    context: Arc<PipelineContext>,
    workers: usize,
    queue_capacity: usize,
}

impl Pipeline {
    pub fn new(context: Arc<PipelineContext>, workers: usize, queue_capacity: usize) -> Self {
        Self {
            context,
            workers: workers.max(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.context
    }

    /// Pull from `source` until it closes or `token` is cancelled
    ///
    /// Queued messages are drained before this returns.
    pub async fn run<S: MessageSource>(
        &self,
        mut source: S,
        token: CancellationToken,
    ) -> StreamResult<PipelineStats> {
        let mut senders = Vec::with_capacity(self.workers);
        let mut handles = Vec::with_capacity(self.workers);
        for worker in 0..self.workers {
            let (tx, mut rx) = mpsc::channel::<RawMessage>(self.queue_capacity);
            let context = Arc::clone(&self.context);
            handles.push(tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    let report = context.process(&message).await;
                    debug!(worker, key = %message.key, ?report, "Message processed");
                }
                debug!(worker, "Worker drained");
            }));
            senders.push(tx);
        }
        info!(
            project_id = self.context.project_id,
            workers = self.workers,
            queue_capacity = self.queue_capacity,
            "Pipeline started"
        );

        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                event = source.poll() => event,
            };
            match event {
                Ok(SourceEvent::Message(message)) => {
                    let index = worker_index(&message.key, self.workers);
                    if senders[index].send(message).await.is_err() {
                        error!(worker = index, "Worker stopped, pipeline aborting");
                        break;
                    }
                },
                Ok(SourceEvent::Malformed { raw, reason }) => {
                    self.context.reject_malformed(&raw, &reason).await;
                },
                Ok(SourceEvent::Idle) => {},
                Ok(SourceEvent::Closed) => {
                    info!("Source closed");
                    break;
                },
                Err(e) => {
                    warn!("Source poll failed: {}", e);
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(SOURCE_ERROR_BACKOFF) => {},
                    }
                },
            }
        }

        drop(senders);
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Pipeline worker panicked: {}", e);
            }
        }

        let stats = self.context.stats();
        info!(
            received = stats.received,
            processed = stats.processed,
            dead_lettered = stats.dead_lettered,
            "Pipeline stopped"
        );
        Ok(stats)
    }
}
