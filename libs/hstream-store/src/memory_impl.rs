//! In-memory table store
//!
//! DashMap based; counter increments happen under the cell's shard lock, so
//! concurrent increments never lose updates. Used by tests and embedded
//! pipelines.

use crate::error::{Result, StoreError};
use crate::traits::*;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct MemoryTable {
    families: HashSet<String>,
    enabled: AtomicBool,
    /// (family, row) -> qualifier -> value
    cells: DashMap<(String, String), DashMap<String, Bytes>>,
}

impl MemoryTable {
    fn check_family(&self, table: &str, family: &str) -> Result<()> {
        if self.families.contains(family) {
            Ok(())
        } else {
            Err(StoreError::FamilyNotFound {
                table: table.to_string(),
                family: family.to_string(),
            })
        }
    }
}

/// In-memory table store with concurrent access support
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<DashMap<String, Arc<MemoryTable>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all tables (useful for testing)
    pub fn clear(&self) {
        self.tables.clear();
    }

    /// Get statistics about stored data
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            table_count: self.tables.len(),
            row_count: self.tables.iter().map(|t| t.cells.len()).sum(),
        }
    }

    fn table(&self, table: &str) -> Result<Arc<MemoryTable>> {
        self.tables
            .get(table)
            .map(|t| Arc::clone(t.value()))
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }

    fn writable(&self, table: &str, family: &str) -> Result<Arc<MemoryTable>> {
        let t = self.table(table)?;
        if !t.enabled.load(Ordering::Acquire) {
            return Err(StoreError::TableDisabled(table.to_string()));
        }
        t.check_family(table, family)?;
        Ok(t)
    }
}

/// Memory store statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub table_count: usize,
    pub row_count: usize,
}

#[async_trait]
impl TableStore for MemoryStore {
    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.tables.contains_key(table))
    }

    async fn create_table(&self, table: &str, families: &[&str]) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.tables.entry(table.to_string()) {
            Entry::Occupied(_) => Err(StoreError::TableExists(table.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(MemoryTable {
                    families: families.iter().map(|f| f.to_string()).collect(),
                    enabled: AtomicBool::new(true),
                    cells: DashMap::new(),
                }));
                Ok(())
            },
        }
    }

    async fn disable_table(&self, table: &str) -> Result<()> {
        self.table(table)?.enabled.store(false, Ordering::Release);
        Ok(())
    }

    async fn is_enabled(&self, table: &str) -> Result<bool> {
        Ok(self.table(table)?.enabled.load(Ordering::Acquire))
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        self.tables
            .remove(table)
            .map(|_| ())
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.tables.iter().map(|t| t.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn families(&self, table: &str) -> Result<Vec<String>> {
        let mut families: Vec<String> = self.table(table)?.families.iter().cloned().collect();
        families.sort();
        Ok(families)
    }

    async fn put(
        &self,
        table: &str,
        row: &str,
        family: &str,
        qualifier: &str,
        value: Bytes,
    ) -> Result<()> {
        let t = self.writable(table, family)?;
        t.cells
            .entry((family.to_string(), row.to_string()))
            .or_default()
            .insert(qualifier.to_string(), value);
        Ok(())
    }

    async fn increment(
        &self,
        table: &str,
        row: &str,
        family: &str,
        qualifier: &str,
        delta: i64,
    ) -> Result<i64> {
        let t = self.writable(table, family)?;
        let row_cells = t
            .cells
            .entry((family.to_string(), row.to_string()))
            .or_default();
        let mut cell = row_cells
            .entry(qualifier.to_string())
            .or_insert_with(|| Bytes::from_static(b"0"));

        let current = decode_counter(cell.value()).ok_or_else(|| {
            StoreError::InvalidRecord(format!(
                "cell {table}/{family}/{row}/{qualifier} is not a counter"
            ))
        })?;
        let next = current.saturating_add(delta);
        *cell.value_mut() = Bytes::from(next.to_string());
        Ok(next)
    }

    async fn get(
        &self,
        table: &str,
        row: &str,
        family: &str,
        qualifier: &str,
    ) -> Result<Option<Bytes>> {
        let t = self.table(table)?;
        t.check_family(table, family)?;
        Ok(t
            .cells
            .get(&(family.to_string(), row.to_string()))
            .and_then(|cells| cells.get(qualifier).map(|v| v.value().clone())))
    }

    async fn get_row(&self, table: &str, row: &str) -> Result<HashMap<String, FamilyCells>> {
        let t = self.table(table)?;
        let mut result = HashMap::new();
        for family in &t.families {
            if let Some(cells) = t.cells.get(&(family.clone(), row.to_string())) {
                let cells: FamilyCells = cells
                    .iter()
                    .map(|c| (c.key().clone(), c.value().clone()))
                    .collect();
                result.insert(family.clone(), cells);
            }
        }
        Ok(result)
    }

    async fn scan_family(
        &self,
        table: &str,
        family: &str,
        row_prefix: &str,
    ) -> Result<Vec<RowCells>> {
        let t = self.table(table)?;
        t.check_family(table, family)?;
        let mut rows: Vec<RowCells> = t
            .cells
            .iter()
            .filter(|entry| entry.key().0 == family && entry.key().1.starts_with(row_prefix))
            .map(|entry| RowCells {
                row: entry.key().1.clone(),
                cells: entry
                    .value()
                    .iter()
                    .map(|c| (c.key().clone(), c.value().clone()))
                    .collect(),
            })
            .collect();
        rows.sort_by(|a, b| a.row.cmp(&b.row));
        Ok(rows)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    async fn store_with_table() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_table("t", &["a", "b"]).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_twice_reports_exists() {
        let store = store_with_table().await;
        let err = store.create_table("t", &["a"]).await.unwrap_err();
        assert!(matches!(err, StoreError::TableExists(ref t) if t == "t"));
        assert_eq!(store.families("t").await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_put_get_and_row() {
        let store = store_with_table().await;
        store.put("t", "r1", "a", "q", Bytes::from("v")).await.unwrap();
        store.put("t", "r1", "b", "q2", Bytes::from("w")).await.unwrap();

        assert_eq!(store.get("t", "r1", "a", "q").await.unwrap(), Some(Bytes::from("v")));
        assert_eq!(store.get("t", "r2", "a", "q").await.unwrap(), None);

        let row = store.get_row("t", "r1").await.unwrap();
        assert_eq!(row.len(), 2);
        assert_eq!(row["b"]["q2"], Bytes::from("w"));
    }

    #[tokio::test]
    async fn test_unknown_family_and_table() {
        let store = store_with_table().await;
        let err = store.put("t", "r", "zzz", "q", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::FamilyNotFound { .. }));
        let err = store.put("missing", "r", "a", "q", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::TableNotFound(_)));
    }

    #[tokio::test]
    async fn test_disabled_table_rejects_writes_but_reads() {
        let store = store_with_table().await;
        store.put("t", "r", "a", "q", Bytes::from("v")).await.unwrap();
        store.disable_table("t").await.unwrap();

        assert!(!store.is_enabled("t").await.unwrap());
        let err = store.increment("t", "r", "a", "c", 1).await.unwrap_err();
        assert!(matches!(err, StoreError::TableDisabled(_)));
        assert!(store.get("t", "r", "a", "q").await.unwrap().is_some());

        store.drop_table("t").await.unwrap();
        assert!(!store.table_exists("t").await.unwrap());
    }

    #[tokio::test]
    async fn test_increment_rejects_non_counter() {
        let store = store_with_table().await;
        store.put("t", "r", "a", "q", Bytes::from("text")).await.unwrap();
        let err = store.increment("t", "r", "a", "q", 1).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_do_not_lose_updates() {
        let store = store_with_table().await;
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store.increment("t", "row", "a", "count", 1).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let value = store.get("t", "row", "a", "count").await.unwrap().unwrap();
        assert_eq!(decode_counter(&value), Some(800));
    }

    #[tokio::test]
    async fn test_scan_family_filters_and_sorts() {
        let store = store_with_table().await;
        for row in ["x_2", "x_1", "y_1"] {
            store.put("t", row, "a", "q", Bytes::from(row)).await.unwrap();
        }
        store.put("t", "x_3", "b", "q", Bytes::new()).await.unwrap();

        let rows = store.scan_family("t", "a", "x_").await.unwrap();
        let keys: Vec<&str> = rows.iter().map(|r| r.row.as_str()).collect();
        assert_eq!(keys, vec!["x_1", "x_2"]);
        assert_eq!(store.stats().table_count, 1);
    }
}
