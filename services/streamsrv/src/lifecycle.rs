//! Table lifecycle manager
//!
//! Creates, heals and tears down the six tables of a project on a bounded
//! background worker pool. Requests never block the caller: each returns a
//! [`LifecycleHandle`] that may be awaited for the per-table report or
//! dropped for fire-and-forget.

use common::redis::RedisClient;
use errors::StreamError;
use futures::future::join_all;
use hstream_model::{ProjectEvent, ProjectEventKind};
use hstream_store::{project_tables, SharedStore, StoreError, TableKind};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ============================================================================
// Requests and reports
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Create,
    /// Re-create whatever is missing
    Update,
    Delete,
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleAction::Create => "create",
            LifecycleAction::Update => "update",
            LifecycleAction::Delete => "delete",
        })
    }
}

impl From<ProjectEventKind> for LifecycleAction {
    fn from(kind: ProjectEventKind) -> Self {
        match kind {
            ProjectEventKind::Created => LifecycleAction::Create,
            ProjectEventKind::Updated => LifecycleAction::Update,
            ProjectEventKind::Deleted => LifecycleAction::Delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOutcome {
    Created,
    AlreadyExisted,
    Dropped,
    /// Nothing to drop
    Missing,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    pub kind: TableKind,
    pub table: String,
    pub outcome: TableOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleReport {
    pub project_id: i64,
    pub action: LifecycleAction,
    pub tables: Vec<TableReport>,
    /// Never queued (queue full or manager stopped)
    pub rejected: bool,
}

impl LifecycleReport {
    fn rejected(project_id: i64, action: LifecycleAction) -> Self {
        Self {
            project_id,
            action,
            tables: Vec::new(),
            rejected: true,
        }
    }

    pub fn count(&self, outcome: &TableOutcome) -> usize {
        self.tables.iter().filter(|t| &t.outcome == outcome).count()
    }

    pub fn failures(&self) -> usize {
        self.tables
            .iter()
            .filter(|t| matches!(t.outcome, TableOutcome::Failed(_)))
            .count()
    }

    /// Accepted and no table failed
    pub fn is_complete(&self) -> bool {
        !self.rejected && self.failures() == 0
    }
}

/// Completion future of one lifecycle request
pub struct LifecycleHandle {
    project_id: i64,
    action: LifecycleAction,
    rx: oneshot::Receiver<LifecycleReport>,
}

impl LifecycleHandle {
    pub async fn wait(self) -> LifecycleReport {
        match self.rx.await {
            Ok(report) => report,
            Err(_) => LifecycleReport::rejected(self.project_id, self.action),
        }
    }
}

struct Job {
    project_id: i64,
    action: LifecycleAction,
    reply: oneshot::Sender<LifecycleReport>,
}

// ============================================================================
// Manager
// ============================================================================

pub struct TableLifecycleManager {
    store: SharedStore,
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TableLifecycleManager {
    /// Start `workers` workers behind a queue of `queue_capacity` requests
    pub fn new(store: SharedStore, workers: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        let Some(job) = job else { break };
                        let report = run_job(&store, job.project_id, job.action).await;
                        log_report(&report);
                        // Receiver may have been dropped (fire-and-forget)
                        let _ = job.reply.send(report);
                    }
                    debug!(worker, "Lifecycle worker stopped");
                })
            })
            .collect();

        Self {
            store,
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn on_project_created(&self, project_id: i64) -> LifecycleHandle {
        self.submit(project_id, LifecycleAction::Create)
    }

    pub fn on_project_updated(&self, project_id: i64) -> LifecycleHandle {
        self.submit(project_id, LifecycleAction::Update)
    }

    pub fn on_project_deleted(&self, project_id: i64) -> LifecycleHandle {
        self.submit(project_id, LifecycleAction::Delete)
    }

    pub fn handle_event(&self, event: &ProjectEvent) -> LifecycleHandle {
        self.submit(event.project_id, event.event.into())
    }

    fn submit(&self, project_id: i64, action: LifecycleAction) -> LifecycleHandle {
        let (reply, rx) = oneshot::channel();
        let handle = LifecycleHandle {
            project_id,
            action,
            rx,
        };
        let job = Job {
            project_id,
            action,
            reply,
        };

        let sender = self.tx.lock().clone();
        let refused = match sender {
            Some(tx) => match tx.try_send(job) {
                Ok(()) => return handle,
                Err(TrySendError::Full(job)) => (job, "lifecycle queue full"),
                Err(TrySendError::Closed(job)) => (job, "lifecycle manager stopped"),
            },
            None => {
                let err = provisioning_error(project_id, "lifecycle manager stopped");
                error!(%action, "Request rejected: {}", err);
                return handle;
            },
        };

        let (job, reason) = refused;
        let err = provisioning_error(project_id, reason);
        error!(%action, "Request rejected: {}", err);
        let _ = job.reply.send(LifecycleReport::rejected(project_id, action));
        handle
    }

    /// Stop accepting requests and wait for queued ones to finish
    pub async fn shutdown(&self) {
        self.tx.lock().take();
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Lifecycle worker panicked: {}", e);
            }
        }
        info!("Table lifecycle manager stopped");
    }
}

fn provisioning_error(project_id: i64, message: impl Into<String>) -> StreamError {
    StreamError::TableProvisioning {
        table: format!("project {}", project_id),
        message: message.into(),
    }
}

async fn run_job(store: &SharedStore, project_id: i64, action: LifecycleAction) -> LifecycleReport {
    let tables = project_tables(project_id);
    let outcomes = join_all(tables.iter().map(|(kind, table)| async move {
        match action {
            LifecycleAction::Create | LifecycleAction::Update => {
                ensure_table(store, *kind, table).await
            },
            LifecycleAction::Delete => teardown_table(store, table).await,
        }
    }))
    .await;

    LifecycleReport {
        project_id,
        action,
        tables: tables
            .into_iter()
            .zip(outcomes)
            .map(|((kind, table), outcome)| TableReport {
                kind,
                table,
                outcome,
            })
            .collect(),
        rejected: false,
    }
}

/// Check-then-create; losing a creation race counts as existing
async fn ensure_table(store: &SharedStore, kind: TableKind, table: &str) -> TableOutcome {
    match store.table_exists(table).await {
        Ok(true) => TableOutcome::AlreadyExisted,
        Ok(false) => match store.create_table(table, &kind.families()).await {
            Ok(()) => TableOutcome::Created,
            Err(StoreError::TableExists(_)) => TableOutcome::AlreadyExisted,
            Err(e) => failed(table, e),
        },
        Err(e) => failed(table, e),
    }
}

/// Disable then drop; a failed disable does not prevent the drop
async fn teardown_table(store: &SharedStore, table: &str) -> TableOutcome {
    match store.table_exists(table).await {
        Ok(false) => return TableOutcome::Missing,
        Ok(true) => {},
        Err(e) => return failed(table, e),
    }
    if let Err(e) = store.disable_table(table).await {
        warn!(table, "Disable failed, dropping anyway: {}", e);
    }
    match store.drop_table(table).await {
        Ok(()) => TableOutcome::Dropped,
        Err(StoreError::TableNotFound(_)) => TableOutcome::Missing,
        Err(e) => failed(table, e),
    }
}

fn failed(table: &str, e: StoreError) -> TableOutcome {
    let err = StreamError::TableProvisioning {
        table: table.to_string(),
        message: e.to_string(),
    };
    error!("{}", err);
    TableOutcome::Failed(e.to_string())
}

fn log_report(report: &LifecycleReport) {
    info!(
        project_id = report.project_id,
        action = %report.action,
        created = report.count(&TableOutcome::Created),
        existing = report.count(&TableOutcome::AlreadyExisted),
        dropped = report.count(&TableOutcome::Dropped),
        failed = report.failures(),
        "Project tables processed"
    );
}

// ============================================================================
// Project event feed
// ============================================================================

/// Feed `{"event":..,"projectId":..}` entries from a Redis list into the
/// manager until `token` is cancelled
pub async fn listen_project_events(
    client: Arc<RedisClient>,
    key: String,
    timeout_secs: f64,
    manager: Arc<TableLifecycleManager>,
    token: CancellationToken,
) {
    info!(key = %key, "Listening for project events");
    let keys = [key.as_str()];
    loop {
        let popped = tokio::select! {
            _ = token.cancelled() => break,
            popped = client.blpop(&keys, timeout_secs) => popped,
        };
        match popped {
            Ok(Some((_, raw))) => match serde_json::from_str::<ProjectEvent>(&raw) {
                Ok(event) => {
                    debug!(project_id = event.project_id, kind = ?event.event, "Project event");
                    // Outcome is logged by the worker
                    let _ = manager.handle_event(&event);
                },
                Err(e) => warn!(raw = %raw, "Invalid project event: {}", e),
            },
            Ok(None) => {},
            Err(e) => {
                warn!("Project event poll failed: {:#}", e);
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(500)) => {},
                }
            },
        }
    }
    info!("Project event listener stopped");
}
