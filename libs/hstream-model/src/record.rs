//! Dead-letter records and project events

use serde::{Deserialize, Serialize};

/// Failed message captured by the dead-letter edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Replay label: failed sink (`raw`, `timeline`, ..) or stage
    pub stage: String,
    /// Error kind name (`PersistenceError`, `DeserializationError`, ..)
    pub error_type: String,
    pub message: String,
    /// Original payload, as received
    pub received_packet: String,
    pub timestamp: i64,
}

/// Administrative change on a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEvent {
    pub event: ProjectEventKind,
    pub project_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectEventKind {
    Created,
    Updated,
    Deleted,
}
