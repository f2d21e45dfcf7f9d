use super::{SharedStore, TimelineSink};
use crate::error::Result;
use crate::tables::{TableKind, ERROR_FAMILY};
use crate::time::SharedClock;
use bytes::Bytes;
use hstream_model::{ErrorRecord, ERROR_TIMELINE};
use tracing::warn;

const COL_MESSAGE: &str = "message";
const COL_ERROR_TYPE: &str = "error_type";
const COL_STAGE: &str = "stage";
const COL_RECEIVED: &str = "received_packet";
const COL_TIMESTAMP: &str = "timestamp";

/// Dead-letter records
///
/// Row = `<now millis>_<uuid>`, one column per record attribute. Every
/// record also bumps the `Error` timeline.
#[derive(Clone)]
pub struct ErrorSink {
    store: SharedStore,
    table: String,
    timeline: TimelineSink,
    clock: SharedClock,
}

impl ErrorSink {
    pub fn new(store: SharedStore, project_id: i64, timeline: TimelineSink, clock: SharedClock) -> Self {
        Self {
            store,
            table: TableKind::Error.table_name(project_id),
            timeline,
            clock,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Store a record and count it on the `Error` timeline
    ///
    /// Only the row write can fail the call. A failed timeline increment is
    /// logged, since the record itself is already stored.
    pub async fn record(&self, record: &ErrorRecord) -> Result<String> {
        let row = format!("{}_{}", self.clock.now_millis(), uuid::Uuid::new_v4().simple());
        let cells = vec![
            (COL_MESSAGE.to_string(), Bytes::from(record.message.clone())),
            (COL_ERROR_TYPE.to_string(), Bytes::from(record.error_type.clone())),
            (COL_STAGE.to_string(), Bytes::from(record.stage.clone())),
            (COL_RECEIVED.to_string(), Bytes::from(record.received_packet.clone())),
            (COL_TIMESTAMP.to_string(), Bytes::from(record.timestamp.to_string())),
        ];
        self.store
            .put_cells(&self.table, &row, ERROR_FAMILY, cells)
            .await?;
        if let Err(e) = self
            .timeline
            .increment_all(ERROR_TIMELINE, record.timestamp)
            .await
        {
            warn!(table = %self.table, row = %row, "Error timeline not updated: {}", e);
        }
        Ok(row)
    }

    /// Stored records, oldest first
    pub async fn records(&self) -> Result<Vec<ErrorRecord>> {
        let rows = self.store.scan_family(&self.table, ERROR_FAMILY, "").await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let text = |column: &str| {
                    row.cells
                        .get(column)
                        .map(|v| String::from_utf8_lossy(v).into_owned())
                        .unwrap_or_default()
                };
                ErrorRecord {
                    stage: text(COL_STAGE),
                    error_type: text(COL_ERROR_TYPE),
                    message: text(COL_MESSAGE),
                    received_packet: text(COL_RECEIVED),
                    timestamp: text(COL_TIMESTAMP).parse().unwrap_or_default(),
                }
            })
            .collect())
    }
}
