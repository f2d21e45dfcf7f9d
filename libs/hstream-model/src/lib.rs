//! hstream Data Model
//!
//! Types shared by the ingestion pipeline, the sinks and the alarm state
//! machine. Pure data: no I/O.
//!
//! # Modules
//!
//! - `packet`: structured device messages and their fields
//! - `rule`: rule verdicts and alarm states
//! - `schema`: packet definitions used by deserialization
//! - `record`: dead-letter records and project events
//! - `identifiers`: fixed suffixes, field names and timeline identifiers

pub mod error;
pub mod identifiers;
pub mod packet;
pub mod record;
pub mod rule;
pub mod schema;

// Re-exports for convenience
pub use error::{ModelError, Result};
pub use identifiers::{
    alarm_timeline, packet_timeline, ALARM_EVENT_SUFFIX, ERROR_TIMELINE, EVENT_FIELD,
    EVENT_SUFFIX, EVENT_TIMELINE, VERDICT_FIELD,
};
pub use packet::{FieldType, Multiplicity, Packet, PacketField};
pub use record::{ErrorRecord, ProjectEvent, ProjectEventKind};
pub use rule::{AlarmState, FiredRule, RuleKind, RuleVerdict};
pub use schema::{FieldSpec, PacketSchema, SerializationType, TimestampFormat};
