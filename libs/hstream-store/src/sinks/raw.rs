use super::SharedStore;
use crate::error::{Result, StoreError};
use crate::tables::{TableKind, ATTACHMENTS_FAMILY, RAW_FAMILY};
use bytes::Bytes;
use hstream_model::Packet;

/// Raw structured records
///
/// Row = packet timestamp, `hpacket:<packetId>` = packet JSON without FILE
/// fields, `attachments:<fieldId>` = each stripped FILE value.
#[derive(Clone)]
pub struct RawSink {
    store: SharedStore,
    table: String,
}

impl RawSink {
    pub fn new(store: SharedStore, project_id: i64) -> Self {
        Self {
            store,
            table: TableKind::Raw.table_name(project_id),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn persist(&self, packet: &Packet) -> Result<()> {
        let timestamp = packet.timestamp_millis().ok_or_else(|| {
            StoreError::InvalidRecord(format!("packet {} has no timestamp", packet.id))
        })?;
        let row = timestamp.to_string();
        let (stripped, attachments) = packet.strip_files();

        let json = serde_json::to_vec(&stripped)?;
        self.store
            .put(&self.table, &row, RAW_FAMILY, &packet.id.to_string(), Bytes::from(json))
            .await?;

        if !attachments.is_empty() {
            let cells = attachments
                .into_iter()
                .map(|(field_id, value)| {
                    let bytes = match value {
                        serde_json::Value::String(text) => Bytes::from(text),
                        other => Bytes::from(other.to_string()),
                    };
                    (field_id.to_string(), bytes)
                })
                .collect();
            self.store
                .put_cells(&self.table, &row, ATTACHMENTS_FAMILY, cells)
                .await?;
        }
        Ok(())
    }

    /// Stored packet (without FILE fields)
    pub async fn get(&self, timestamp: i64, packet_id: i64) -> Result<Option<Packet>> {
        let value = self
            .store
            .get(&self.table, &timestamp.to_string(), RAW_FAMILY, &packet_id.to_string())
            .await?;
        value
            .map(|bytes| serde_json::from_slice(&bytes).map_err(StoreError::from))
            .transpose()
    }

    /// Stored FILE value of one field
    pub async fn attachment(&self, timestamp: i64, field_id: i64) -> Result<Option<Bytes>> {
        self.store
            .get(
                &self.table,
                &timestamp.to_string(),
                ATTACHMENTS_FAMILY,
                &field_id.to_string(),
            )
            .await
    }
}
