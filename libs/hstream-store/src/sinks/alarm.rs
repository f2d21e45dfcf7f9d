use super::SharedStore;
use crate::error::Result;
use crate::tables::TableKind;
use bytes::Bytes;
use hstream_model::AlarmState;

/// Alarm transition records
///
/// Row = transition timestamp, family = new state, qualifier = device id,
/// value = the verdict that caused the transition.
#[derive(Clone)]
pub struct AlarmSink {
    store: SharedStore,
    table: String,
}

/// One stored alarm transition
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmRecord {
    pub timestamp: i64,
    pub device_id: i64,
    pub state: AlarmState,
    pub detail: serde_json::Value,
}

impl AlarmSink {
    pub fn new(store: SharedStore, project_id: i64) -> Self {
        Self {
            store,
            table: TableKind::Alarm.table_name(project_id),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn record(
        &self,
        timestamp: i64,
        device_id: i64,
        state: AlarmState,
        detail: &serde_json::Value,
    ) -> Result<()> {
        self.store
            .put(
                &self.table,
                &timestamp.to_string(),
                state.as_str(),
                &device_id.to_string(),
                Bytes::from(serde_json::to_vec(detail)?),
            )
            .await
    }

    /// Transitions into `state`, oldest first
    pub async fn history(&self, state: AlarmState) -> Result<Vec<AlarmRecord>> {
        let rows = self
            .store
            .scan_family(&self.table, state.as_str(), "")
            .await?;
        let mut records = Vec::new();
        for row in rows {
            let Ok(timestamp) = row.row.parse::<i64>() else {
                continue;
            };
            for (device, value) in row.cells {
                let Ok(device_id) = device.parse() else {
                    continue;
                };
                records.push(AlarmRecord {
                    timestamp,
                    device_id,
                    state,
                    detail: serde_json::from_slice(&value).unwrap_or(serde_json::Value::Null),
                });
            }
        }
        records.sort_by_key(|r| (r.timestamp, r.device_id));
        Ok(records)
    }
}
