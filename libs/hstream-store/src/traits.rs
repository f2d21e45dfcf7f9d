//! Trait definitions for the wide-column table store

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::any::Any;
use std::collections::HashMap;

/// Cells of one row within one family: qualifier -> value
pub type FamilyCells = HashMap<String, Bytes>;

/// One scanned row: row key plus its cells in the scanned family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowCells {
    pub row: String,
    pub cells: FamilyCells,
}

/// Wide-column table store
///
/// Tables declare their column families at creation. Writes to a missing
/// table, a disabled table or an undeclared family fail; counters are
/// stored as decimal text and incremented atomically by the backend.
///
/// Implementations:
/// - `RedisStore`: production Redis backend
/// - `MemoryStore`: in-memory backend for tests and embedding
#[async_trait]
pub trait TableStore: Send + Sync + 'static {
    // ========== Introspection ==========

    /// Allow downcasting to concrete types
    fn as_any(&self) -> &dyn Any;

    // ========== Table Administration ==========

    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Create a table; `TableExists` if it is already there
    async fn create_table(&self, table: &str, families: &[&str]) -> Result<()>;

    /// Stop accepting writes; reads keep working
    async fn disable_table(&self, table: &str) -> Result<()>;

    async fn is_enabled(&self, table: &str) -> Result<bool>;

    /// Delete a table with all its cells
    async fn drop_table(&self, table: &str) -> Result<()>;

    async fn list_tables(&self) -> Result<Vec<String>>;

    async fn families(&self, table: &str) -> Result<Vec<String>>;

    // ========== Cell Writes ==========

    async fn put(
        &self,
        table: &str,
        row: &str,
        family: &str,
        qualifier: &str,
        value: Bytes,
    ) -> Result<()>;

    /// Write several qualifiers of one row/family together
    async fn put_cells(
        &self,
        table: &str,
        row: &str,
        family: &str,
        cells: Vec<(String, Bytes)>,
    ) -> Result<()> {
        for (qualifier, value) in cells {
            self.put(table, row, family, &qualifier, value).await?;
        }
        Ok(())
    }

    /// Atomic counter increment, returns the new value
    async fn increment(
        &self,
        table: &str,
        row: &str,
        family: &str,
        qualifier: &str,
        delta: i64,
    ) -> Result<i64>;

    // ========== Reads ==========

    async fn get(
        &self,
        table: &str,
        row: &str,
        family: &str,
        qualifier: &str,
    ) -> Result<Option<Bytes>>;

    /// All families of one row: family -> cells
    async fn get_row(&self, table: &str, row: &str) -> Result<HashMap<String, FamilyCells>>;

    /// Rows of one family whose key starts with `row_prefix`, sorted by row
    async fn scan_family(&self, table: &str, family: &str, row_prefix: &str)
        -> Result<Vec<RowCells>>;
}

/// Parse a stored counter cell
pub fn decode_counter(value: &[u8]) -> Option<i64> {
    std::str::from_utf8(value).ok()?.trim().parse().ok()
}
