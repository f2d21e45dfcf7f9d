use super::SharedStore;
use crate::error::Result;
use crate::tables::{TableKind, EVENT_FAMILY};
use bytes::Bytes;

/// Qualifier of the event payload cell
pub const PAYLOAD_QUALIFIER: &str = "payload";

/// Classified domain events
///
/// Row = `<timestamp>_<ruleId>`, `event:payload` = the rule action JSON.
#[derive(Clone)]
pub struct EventSink {
    store: SharedStore,
    table: String,
}

/// One stored event
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub timestamp: i64,
    pub rule_id: i64,
    pub payload: serde_json::Value,
}

pub fn event_row(timestamp: i64, rule_id: i64) -> String {
    format!("{timestamp}_{rule_id}")
}

impl EventSink {
    pub fn new(store: SharedStore, project_id: i64) -> Self {
        Self {
            store,
            table: TableKind::Event.table_name(project_id),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn persist(
        &self,
        timestamp: i64,
        rule_id: i64,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let value = serde_json::to_vec(payload)?;
        self.store
            .put(
                &self.table,
                &event_row(timestamp, rule_id),
                EVENT_FAMILY,
                PAYLOAD_QUALIFIER,
                Bytes::from(value),
            )
            .await
    }

    /// Stored events, oldest first; unparsable rows are skipped
    pub async fn events(&self) -> Result<Vec<EventRecord>> {
        let rows = self.store.scan_family(&self.table, EVENT_FAMILY, "").await?;
        let mut events: Vec<EventRecord> = rows
            .into_iter()
            .filter_map(|row| {
                let (ts, rule) = row.row.split_once('_')?;
                let payload = row.cells.get(PAYLOAD_QUALIFIER)?;
                Some(EventRecord {
                    timestamp: ts.parse().ok()?,
                    rule_id: rule.parse().ok()?,
                    payload: serde_json::from_slice(payload).ok()?,
                })
            })
            .collect();
        events.sort_by_key(|e| (e.timestamp, e.rule_id));
        Ok(events)
    }
}
