//! The six per-project tables
//!
//! Each project owns one table per kind, named `<prefix><projectId>`.

use hstream_timeline::Granularity;
use std::fmt;

/// Raw table family holding packet JSON
pub const RAW_FAMILY: &str = "hpacket";
/// Raw table family holding stripped FILE values
pub const ATTACHMENTS_FAMILY: &str = "attachments";
pub const ERROR_FAMILY: &str = "error";
pub const EVENT_FAMILY: &str = "event";
pub const RULE_FAMILY: &str = "rule";

/// Kind of per-project table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Raw,
    Timeline,
    Error,
    Event,
    Alarm,
    RuleState,
}

impl TableKind {
    /// Provisioning order
    pub const ALL: [TableKind; 6] = [
        TableKind::Raw,
        TableKind::Timeline,
        TableKind::Error,
        TableKind::Event,
        TableKind::Alarm,
        TableKind::RuleState,
    ];

    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Raw => "hproject_",
            Self::Timeline => "timeline_hproject_",
            Self::Error => "hproject_error_",
            Self::Event => "event_",
            Self::Alarm => "alarm_",
            Self::RuleState => "hproject_event_rule_state_",
        }
    }

    /// Column families declared at creation
    pub fn families(&self) -> Vec<&'static str> {
        match self {
            Self::Raw => vec![RAW_FAMILY, ATTACHMENTS_FAMILY],
            Self::Timeline => Granularity::ALL.iter().map(|g| g.column_family()).collect(),
            Self::Error => vec![ERROR_FAMILY],
            Self::Event => vec![EVENT_FAMILY],
            Self::Alarm => vec!["UP", "DOWN", "HANDLED"],
            Self::RuleState => vec![RULE_FAMILY],
        }
    }

    /// Physical table name for a project
    pub fn table_name(&self, project_id: i64) -> String {
        format!("{}{}", self.prefix(), project_id)
    }

    /// Replay label stored with dead-letter records of this sink
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Timeline => "timeline",
            Self::Error => "error",
            Self::Event => "event",
            Self::Alarm => "alarm",
            Self::RuleState => "rule_state",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// All six table names of a project, in provisioning order
pub fn project_tables(project_id: i64) -> Vec<(TableKind, String)> {
    TableKind::ALL
        .iter()
        .map(|kind| (*kind, kind.table_name(project_id)))
        .collect()
}
