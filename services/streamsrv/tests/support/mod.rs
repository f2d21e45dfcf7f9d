//! Shared fixtures for streamsrv integration tests

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)]

use async_trait::async_trait;
use bytes::Bytes;
use common::RetryPolicy;
use errors::StreamResult;
use hstream_alarm::AlarmStateMachine;
use hstream_model::{
    FieldSpec, FieldType, FiredRule, Packet, PacketSchema, RuleKind, RuleVerdict,
    SerializationType, TimestampFormat,
};
use hstream_store::{
    FamilyCells, FixedTimeProvider, MemoryStore, ProjectSinks, Result, RowCells, SharedClock,
    SharedStore, StoreError, TableStore,
};
use parking_lot::Mutex;
use serde_json::json;
use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use streamsrv::{PipelineContext, RawMessage, RuleEvaluator};
use tokio::sync::{Notify, Semaphore};

pub const PROJECT: i64 = 1;
pub const DEVICE: i64 = 3;
pub const PACKET: i64 = 12;
/// 2024-03-05T14:07:09.123Z
pub const TS: i64 = 1_709_647_629_123;
pub const ALARM: i64 = 7;

pub fn clock() -> SharedClock {
    Arc::new(FixedTimeProvider::new(TS + 60_000))
}

pub fn weather_schema() -> PacketSchema {
    let mut fields = BTreeMap::new();
    fields.insert(
        "temperature".to_string(),
        FieldSpec {
            id: 1,
            field_type: FieldType::Double,
        },
    );
    fields.insert(
        "ts".to_string(),
        FieldSpec {
            id: 2,
            field_type: FieldType::Timestamp,
        },
    );
    PacketSchema {
        packet_id: PACKET,
        device_id: DEVICE,
        project_id: PROJECT,
        name: "weather".to_string(),
        serialization: SerializationType::Json,
        timestamp_field: "ts".to_string(),
        timestamp_format: TimestampFormat::UnixMillis,
        fields,
    }
}

pub fn message(temperature: f64, timestamp: i64) -> RawMessage {
    RawMessage::new(
        format!("{}.{}", DEVICE, PACKET),
        json!({"temperature": temperature, "ts": timestamp}).to_string(),
    )
}

pub fn event_verdict(rule_id: i64) -> RuleVerdict {
    RuleVerdict {
        fired_rule: FiredRule::new(rule_id, true, TS),
        rule_name: format!("rule-{}", rule_id),
        kind: RuleKind::Event,
        payload: json!({"notify": "ops"}),
    }
}

pub fn alarm_verdict(rule_id: i64, fired: bool) -> RuleVerdict {
    RuleVerdict {
        fired_rule: FiredRule::new(rule_id, fired, TS),
        rule_name: format!("rule-{}", rule_id),
        kind: RuleKind::AlarmEvent { alarm_id: ALARM },
        payload: json!({}),
    }
}

/// Pipeline context for project 1 over `store`; alarm 7 owns rules 1 and 2
pub fn context(store: SharedStore, evaluator: Arc<dyn RuleEvaluator>) -> Arc<PipelineContext> {
    let alarms = Arc::new(AlarmStateMachine::new(alarm_rules()));
    context_with(store, evaluator, alarms)
}

pub fn alarm_rules() -> [(i64, Vec<i64>); 1] {
    [(ALARM, vec![1, 2])]
}

pub fn context_with(
    store: SharedStore,
    evaluator: Arc<dyn RuleEvaluator>,
    alarms: Arc<AlarmStateMachine>,
) -> Arc<PipelineContext> {
    let clock = clock();
    let sinks = ProjectSinks::new(store, PROJECT, clock.clone());
    Arc::new(PipelineContext::new(
        sinks,
        [weather_schema()],
        clock,
        evaluator,
        alarms,
        None,
        RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1,
        },
    ))
}

/// Sinks over `store` for assertions
pub fn sinks(store: SharedStore) -> ProjectSinks {
    ProjectSinks::new(store, PROJECT, clock())
}

// ============================================================================
// Rule engines
// ============================================================================

/// Returns queued verdict lists in order, then nothing
#[derive(Default)]
pub struct ScriptedEvaluator {
    script: Mutex<VecDeque<Vec<RuleVerdict>>>,
}

impl ScriptedEvaluator {
    pub fn new(script: impl IntoIterator<Item = Vec<RuleVerdict>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
        }
    }
}

#[async_trait]
impl RuleEvaluator for ScriptedEvaluator {
    async fn evaluate(&self, _packet: &Packet) -> StreamResult<Vec<RuleVerdict>> {
        Ok(self.script.lock().pop_front().unwrap_or_default())
    }
}

pub struct UnreachableEvaluator;

#[async_trait]
impl RuleEvaluator for UnreachableEvaluator {
    async fn evaluate(&self, _packet: &Packet) -> StreamResult<Vec<RuleVerdict>> {
        Err(errors::StreamError::Evaluation("rule engine unreachable".into()))
    }
}

// ============================================================================
// Fault-injecting store
// ============================================================================

/// Holds table administration until released
pub struct Gate {
    pub entered: Notify,
    release: Semaphore,
}

impl Gate {
    fn new() -> Self {
        Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        }
    }

    pub fn open(&self) {
        self.release.add_permits(1024);
    }
}

/// Memory store that can fail writes to one table, fail disables, or
/// block on a gate
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    /// Table to fail and how many more writes fail (`None` is forever)
    failing_table: Mutex<Option<(String, Option<u32>)>>,
    fail_disable: AtomicBool,
    gate: Mutex<Option<Arc<Gate>>>,
    pub failed_writes: AtomicU32,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    pub fn fail_writes_to(&self, table: &str) {
        *self.failing_table.lock() = Some((table.to_string(), None));
    }

    /// Fail the next `times` writes to `table`, then recover
    pub fn fail_next_writes_to(&self, table: &str, times: u32) {
        *self.failing_table.lock() = Some((table.to_string(), Some(times)));
    }

    pub fn fail_disable(&self) {
        self.fail_disable.store(true, Ordering::SeqCst);
    }

    pub fn install_gate(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::new());
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    fn check_write(&self, table: &str) -> Result<()> {
        let mut failing = self.failing_table.lock();
        let fail = match failing.as_mut() {
            Some((name, _)) if name != table => false,
            Some((_, None)) => true,
            Some((_, Some(0))) => false,
            Some((_, Some(left))) => {
                *left -= 1;
                true
            },
            None => false,
        };
        if fail {
            self.failed_writes.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Backend(anyhow::anyhow!("injected failure on {}", table)));
        }
        Ok(())
    }
}

#[async_trait]
impl TableStore for FaultyStore {
    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            let _permit = gate.release.acquire().await;
        }
        self.inner.table_exists(table).await
    }

    async fn create_table(&self, table: &str, families: &[&str]) -> Result<()> {
        self.inner.create_table(table, families).await
    }

    async fn disable_table(&self, table: &str) -> Result<()> {
        if self.fail_disable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!("disable refused")));
        }
        self.inner.disable_table(table).await
    }

    async fn is_enabled(&self, table: &str) -> Result<bool> {
        self.inner.is_enabled(table).await
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        self.inner.drop_table(table).await
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.inner.list_tables().await
    }

    async fn families(&self, table: &str) -> Result<Vec<String>> {
        self.inner.families(table).await
    }

    async fn put(
        &self,
        table: &str,
        row: &str,
        family: &str,
        qualifier: &str,
        value: Bytes,
    ) -> Result<()> {
        self.check_write(table)?;
        self.inner.put(table, row, family, qualifier, value).await
    }

    async fn put_cells(
        &self,
        table: &str,
        row: &str,
        family: &str,
        cells: Vec<(String, Bytes)>,
    ) -> Result<()> {
        self.check_write(table)?;
        self.inner.put_cells(table, row, family, cells).await
    }

    async fn increment(
        &self,
        table: &str,
        row: &str,
        family: &str,
        qualifier: &str,
        delta: i64,
    ) -> Result<i64> {
        self.check_write(table)?;
        self.inner.increment(table, row, family, qualifier, delta).await
    }

    async fn get(
        &self,
        table: &str,
        row: &str,
        family: &str,
        qualifier: &str,
    ) -> Result<Option<Bytes>> {
        self.inner.get(table, row, family, qualifier).await
    }

    async fn get_row(&self, table: &str, row: &str) -> Result<HashMap<String, FamilyCells>> {
        self.inner.get_row(table, row).await
    }

    async fn scan_family(
        &self,
        table: &str,
        family: &str,
        row_prefix: &str,
    ) -> Result<Vec<RowCells>> {
        self.inner.scan_family(table, family, row_prefix).await
    }
}

/// Faulty store wrapping a memory store with project 1 provisioned
pub async fn provisioned_faulty_store() -> Arc<FaultyStore> {
    let store = Arc::new(FaultyStore::default());
    for (kind, table) in hstream_store::project_tables(PROJECT) {
        store.create_table(&table, &kind.families()).await.unwrap();
    }
    store
}
