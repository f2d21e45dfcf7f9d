//! Error types for hstream-alarm

use errors::StreamError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlarmError {
    /// Rule (or alarm) not registered; nothing was mutated
    #[error("Rule {rule_id} is not registered for alarm {alarm_id}")]
    RuleUnknown { alarm_id: i64, rule_id: i64 },
}

pub type Result<T> = std::result::Result<T, AlarmError>;

impl From<AlarmError> for StreamError {
    fn from(err: AlarmError) -> Self {
        match err {
            AlarmError::RuleUnknown { alarm_id, rule_id } => {
                StreamError::AlarmRuleUnknown { alarm_id, rule_id }
            },
        }
    }
}
