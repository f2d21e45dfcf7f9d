//! Redis implementation of the table store

use crate::error::{Result, StoreError};
use crate::keyspace::KeySpaceConfig;
use crate::traits::*;
use async_trait::async_trait;
use bytes::Bytes;
use common::redis::RedisClient;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

const META_FAMILIES: &str = "families";
const META_ENABLED: &str = "enabled";

/// DEL batch size when dropping a table
const DROP_BATCH: usize = 500;

/// Redis-backed table store
///
/// Every (table, family, row) is one hash; the table metadata hash records
/// the declared families and the enabled flag.
pub struct RedisStore {
    client: Arc<RedisClient>,
    keyspace: KeySpaceConfig,
}

struct TableMeta {
    families: Vec<String>,
    enabled: bool,
}

impl RedisStore {
    /// Create new Redis store from URL
    pub async fn new(url: &str, keyspace: KeySpaceConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: Arc::new(RedisClient::new(url).await?),
            keyspace,
        })
    }

    /// Create from existing RedisClient
    pub fn from_client(client: Arc<RedisClient>, keyspace: KeySpaceConfig) -> Self {
        Self { client, keyspace }
    }

    /// Get reference to underlying Redis client
    pub fn client(&self) -> &Arc<RedisClient> {
        &self.client
    }

    pub fn keyspace(&self) -> &KeySpaceConfig {
        &self.keyspace
    }

    async fn meta(&self, table: &str) -> Result<TableMeta> {
        let raw = self.client.hgetall(&self.keyspace.table_meta(table)).await?;
        if raw.is_empty() {
            return Err(StoreError::TableNotFound(table.to_string()));
        }
        let families = raw
            .get(META_FAMILIES)
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .unwrap_or_default();
        Ok(TableMeta {
            families: families
                .split(',')
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect(),
            enabled: raw.get(META_ENABLED).map(|v| v.as_slice()) != Some(b"0"),
        })
    }

    async fn readable(&self, table: &str, family: &str) -> Result<TableMeta> {
        let meta = self.meta(table).await?;
        if !meta.families.iter().any(|f| f == family) {
            return Err(StoreError::FamilyNotFound {
                table: table.to_string(),
                family: family.to_string(),
            });
        }
        Ok(meta)
    }

    async fn writable(&self, table: &str, family: &str) -> Result<()> {
        let meta = self.readable(table, family).await?;
        if !meta.enabled {
            return Err(StoreError::TableDisabled(table.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TableStore for RedisStore {
    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.client.exists(&self.keyspace.table_meta(table)).await?)
    }

    async fn create_table(&self, table: &str, families: &[&str]) -> Result<()> {
        // SADD settles creation races; HSETNX in the same transaction
        // restores meta for a registered table that lost it
        let added = self
            .client
            .sadd_with_hash_defaults(
                &self.keyspace.table_registry(),
                table,
                &self.keyspace.table_meta(table),
                &[
                    (META_FAMILIES.to_string(), families.join(",")),
                    (META_ENABLED.to_string(), "1".to_string()),
                ],
            )
            .await?;
        if !added {
            return Err(StoreError::TableExists(table.to_string()));
        }
        Ok(())
    }

    async fn disable_table(&self, table: &str) -> Result<()> {
        self.meta(table).await?;
        self.client
            .hset(&self.keyspace.table_meta(table), META_ENABLED, b"0")
            .await?;
        Ok(())
    }

    async fn is_enabled(&self, table: &str) -> Result<bool> {
        Ok(self.meta(table).await?.enabled)
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        let registered = self
            .client
            .srem(&self.keyspace.table_registry(), table)
            .await?;
        let meta_key = self.keyspace.table_meta(table);
        if !registered && !self.client.exists(&meta_key).await? {
            return Err(StoreError::TableNotFound(table.to_string()));
        }

        let keys = self
            .client
            .scan_match(&self.keyspace.table_pattern(table))
            .await?;
        for chunk in keys.chunks(DROP_BATCH) {
            let refs: Vec<&str> = chunk.iter().map(String::as_str).collect();
            self.client.del(&refs).await?;
        }
        self.client.del(&[meta_key.as_str()]).await?;
        tracing::debug!(table, cells = keys.len(), "Dropped table");
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut tables = self
            .client
            .smembers(&self.keyspace.table_registry())
            .await?;
        tables.sort();
        Ok(tables)
    }

    async fn families(&self, table: &str) -> Result<Vec<String>> {
        let mut families = self.meta(table).await?.families;
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
        self.writable(table, family).await?;
        self.client
            .hset(&self.keyspace.cell_key(table, family, row), qualifier, &value)
            .await?;
        Ok(())
    }

    async fn put_cells(
        &self,
        table: &str,
        row: &str,
        family: &str,
        cells: Vec<(String, Bytes)>,
    ) -> Result<()> {
        self.writable(table, family).await?;
        let key = self.keyspace.cell_key(table, family, row);
        for (qualifier, value) in cells {
            self.client.hset(&key, &qualifier, &value).await?;
        }
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
        self.writable(table, family).await?;
        Ok(self
            .client
            .hincrby(&self.keyspace.cell_key(table, family, row), qualifier, delta)
            .await?)
    }

    async fn get(
        &self,
        table: &str,
        row: &str,
        family: &str,
        qualifier: &str,
    ) -> Result<Option<Bytes>> {
        self.readable(table, family).await?;
        let value = self
            .client
            .hget(&self.keyspace.cell_key(table, family, row), qualifier)
            .await?;
        Ok(value.map(Bytes::from))
    }

    async fn get_row(&self, table: &str, row: &str) -> Result<HashMap<String, FamilyCells>> {
        let meta = self.meta(table).await?;
        let mut result = HashMap::new();
        for family in meta.families {
            let raw = self
                .client
                .hgetall(&self.keyspace.cell_key(table, &family, row))
                .await?;
            if !raw.is_empty() {
                result.insert(family, into_cells(raw));
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
        self.readable(table, family).await?;
        let prefix = self.keyspace.family_prefix(table, family);
        let keys = self
            .client
            .scan_match(&self.keyspace.family_pattern(table, family, row_prefix))
            .await?;

        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(row) = key.strip_prefix(&prefix) else {
                continue;
            };
            let raw = self.client.hgetall(&key).await?;
            if raw.is_empty() {
                continue;
            }
            rows.push(RowCells {
                row: row.to_string(),
                cells: into_cells(raw),
            });
        }
        // SCAN may return a key twice
        rows.sort_by(|a, b| a.row.cmp(&b.row));
        rows.dedup_by(|a, b| a.row == b.row);
        Ok(rows)
    }
}

fn into_cells(raw: HashMap<String, Vec<u8>>) -> FamilyCells {
    raw.into_iter().map(|(k, v)| (k, Bytes::from(v))).collect()
}
