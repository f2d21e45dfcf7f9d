//! hstream Table Store and Persistence Sinks
//!
//! A small wide-column abstraction (tables with declared column families,
//! enable/disable, put, atomic increment, family scans) with Redis and
//! in-memory backends, plus the six per-project sinks built on it.
//!
//! # Key Components
//!
//! - **TableStore trait**: backend-neutral table operations
//! - **KeySpaceConfig**: Redis key naming
//! - **TableKind**: the six per-project tables and their families
//! - **sinks**: Raw, Timeline, Event, Alarm, RuleState and Error sinks

pub mod error;
pub mod keyspace;
pub mod sinks;
pub mod tables;
pub mod time;
pub mod traits;

#[cfg(feature = "redis-backend")]
pub mod redis_impl;

pub mod memory_impl;

// Re-exports
pub use bytes::Bytes;
pub use error::{Result, StoreError};
pub use keyspace::KeySpaceConfig;
pub use memory_impl::{MemoryStats, MemoryStore};
pub use sinks::{
    AlarmRecord, AlarmSink, ErrorSink, EventRecord, EventSink, ProjectSinks, RawSink,
    RuleStateSink, SharedStore, TimelineSink,
};
pub use tables::{project_tables, TableKind};
pub use time::{system_clock, FixedTimeProvider, SharedClock, SystemTimeProvider, TimeProvider};
pub use traits::{decode_counter, FamilyCells, RowCells, TableStore};

#[cfg(feature = "redis-backend")]
pub use redis_impl::RedisStore;

/// Helper functions for tests and embedding
pub mod helpers {
    use super::{project_tables, MemoryStore, SharedStore, TableStore};
    use std::sync::Arc;

    /// Memory store with the six tables of `project_id` already created
    pub async fn provisioned_memory_store(project_id: i64) -> crate::Result<Arc<MemoryStore>> {
        let store = Arc::new(MemoryStore::new());
        for (kind, table) in project_tables(project_id) {
            store.create_table(&table, &kind.families()).await?;
        }
        Ok(store)
    }

    /// Same as [`provisioned_memory_store`] behind the trait object
    pub async fn provisioned_store(project_id: i64) -> crate::Result<SharedStore> {
        let store: SharedStore = provisioned_memory_store(project_id).await?;
        Ok(store)
    }
}
