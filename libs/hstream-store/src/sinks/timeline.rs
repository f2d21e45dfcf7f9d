use super::SharedStore;
use crate::error::Result;
use crate::tables::TableKind;
use crate::traits::decode_counter;
use futures::future::try_join_all;
use hstream_timeline::{
    compute_bucket_key, initialize_range, merge_count, parse_bucket_timestamp, split_bucket_key,
    Granularity, DELIMITER,
};
use std::collections::BTreeMap;

/// Time-bucketed counters
///
/// The bucket key of granularity g splits into row (the next coarser key)
/// and qualifier (g's own component); the counter lives in family g.
#[derive(Clone)]
pub struct TimelineSink {
    store: SharedStore,
    table: String,
}

impl TimelineSink {
    pub fn new(store: SharedStore, project_id: i64) -> Self {
        Self {
            store,
            table: TableKind::Timeline.table_name(project_id),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Atomically add one to the bucket holding `timestamp`
    pub async fn increment_bucket(
        &self,
        identifier: &str,
        granularity: Granularity,
        timestamp: i64,
    ) -> Result<i64> {
        let key = compute_bucket_key(identifier, granularity, timestamp)?;
        let (row, qualifier) = split_bucket_key(&key)?;
        self.store
            .increment(&self.table, row, granularity.column_family(), qualifier, 1)
            .await
    }

    /// Increment the buckets of all seven granularities in parallel
    pub async fn increment_all(&self, identifier: &str, timestamp: i64) -> Result<()> {
        try_join_all(
            Granularity::ALL
                .iter()
                .map(|g| self.increment_bucket(identifier, *g, timestamp)),
        )
        .await?;
        Ok(())
    }

    /// Current value of one bucket counter
    pub async fn bucket_count(
        &self,
        identifier: &str,
        granularity: Granularity,
        timestamp: i64,
    ) -> Result<u64> {
        let key = compute_bucket_key(identifier, granularity, timestamp)?;
        let (row, qualifier) = split_bucket_key(&key)?;
        let value = self
            .store
            .get(&self.table, row, granularity.column_family(), qualifier)
            .await?;
        Ok(value
            .and_then(|v| decode_counter(&v))
            .map(|n| n.max(0) as u64)
            .unwrap_or(0))
    }

    /// Zero-seeded series over `[start, end)` summing all `identifiers`
    ///
    /// Buckets are seeded in `timezone` at `step`; counters are read at HOUR
    /// or finer so day/month/year boundaries in non-UTC zones still bind
    /// correctly.
    pub async fn scan(
        &self,
        identifiers: &[&str],
        start: i64,
        end: i64,
        step: Granularity,
        timezone: &str,
    ) -> Result<BTreeMap<i64, u64>> {
        let mut range = initialize_range(start, end, step, timezone)?;
        let read_step = step.at_least(Granularity::Hour);

        for identifier in identifiers {
            let prefix = format!("{identifier}{DELIMITER}");
            let rows = self
                .store
                .scan_family(&self.table, read_step.column_family(), &prefix)
                .await?;

            for row in rows {
                for (qualifier, value) in &row.cells {
                    let key = format!("{}{DELIMITER}{}", row.row, qualifier);
                    let timestamp = parse_bucket_timestamp(&key, read_step)?;
                    if timestamp < start || timestamp >= end {
                        continue;
                    }
                    if let Some(count) = decode_counter(value) {
                        merge_count(&mut range, timestamp, count.max(0) as u64);
                    }
                }
            }
        }

        Ok(range)
    }
}
