//! Per-project persistence sinks
//!
//! One sink per table kind. Sinks are thin: they own the row-key and
//! cell layout of their table and delegate storage to a [`TableStore`].
//! Retries and dead-lettering belong to the caller.

mod alarm;
mod error;
mod event;
mod raw;
mod rule_state;
mod timeline;

pub use alarm::{AlarmRecord, AlarmSink};
pub use error::ErrorSink;
pub use event::{event_row, EventRecord, EventSink, PAYLOAD_QUALIFIER};
pub use raw::RawSink;
pub use rule_state::{RuleStateSink, STATE_QUALIFIER};
pub use timeline::TimelineSink;

use crate::time::SharedClock;
use crate::traits::TableStore;
use std::sync::Arc;

/// Shared store handle
pub type SharedStore = Arc<dyn TableStore>;

/// The six sinks of one project
#[derive(Clone)]
pub struct ProjectSinks {
    pub project_id: i64,
    pub raw: RawSink,
    pub timeline: TimelineSink,
    pub event: EventSink,
    pub alarm: AlarmSink,
    pub rule_state: RuleStateSink,
    pub error: ErrorSink,
}

impl ProjectSinks {
    pub fn new(store: SharedStore, project_id: i64, clock: SharedClock) -> Self {
        let timeline = TimelineSink::new(store.clone(), project_id);
        Self {
            project_id,
            raw: RawSink::new(store.clone(), project_id),
            event: EventSink::new(store.clone(), project_id),
            alarm: AlarmSink::new(store.clone(), project_id),
            rule_state: RuleStateSink::new(store.clone(), project_id),
            error: ErrorSink::new(store, project_id, timeline.clone(), clock),
            timeline,
        }
    }
}
