//! Rule verdicts and alarm states

use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Evaluation verdict of one rule at a point in time
///
/// Persisted as `{"ruleId":..,"fired":..,"firedAt":..}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiredRule {
    pub rule_id: i64,
    pub fired: bool,
    pub fired_at: i64,
}

impl FiredRule {
    pub fn new(rule_id: i64, fired: bool, fired_at: i64) -> Self {
        Self {
            rule_id,
            fired,
            fired_at,
        }
    }
}

/// What a rule produces when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    /// Plain event, stored in the event table
    Event,
    /// Alarm event, drives the alarm state machine
    AlarmEvent {
        #[serde(rename = "alarmId")]
        alarm_id: i64,
    },
}

/// Rule engine output for one packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleVerdict {
    #[serde(flatten)]
    pub fired_rule: FiredRule,
    #[serde(default)]
    pub rule_name: String,
    #[serde(flatten)]
    pub kind: RuleKind,
    /// Action payload attached by the rule
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RuleVerdict {
    pub fn rule_id(&self) -> i64 {
        self.fired_rule.rule_id
    }

    pub fn alarm_id(&self) -> Option<i64> {
        match self.kind {
            RuleKind::AlarmEvent { alarm_id } => Some(alarm_id),
            RuleKind::Event => None,
        }
    }
}

// ============================================================================
// AlarmState
// ============================================================================

/// Alarm state; also the alarm table column family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlarmState {
    Up,
    #[default]
    Down,
    Handled,
}

impl AlarmState {
    pub const ALL: [AlarmState; 3] = [AlarmState::Up, AlarmState::Down, AlarmState::Handled];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmState::Up => "UP",
            AlarmState::Down => "DOWN",
            AlarmState::Handled => "HANDLED",
        }
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlarmState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "UP" => Ok(AlarmState::Up),
            "DOWN" => Ok(AlarmState::Down),
            "HANDLED" => Ok(AlarmState::Handled),
            _ => Err(ModelError::UnknownVariant {
                kind: "alarm state",
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fired_rule_json_shape() {
        let rule = FiredRule::new(42, true, 1_700_000_000_000);
        let json = serde_json::to_value(rule).unwrap();
        assert_eq!(
            json,
            json!({"ruleId": 42, "fired": true, "firedAt": 1_700_000_000_000_i64})
        );
    }

    #[test]
    fn test_alarm_verdict_deserializes() {
        let verdict: RuleVerdict = serde_json::from_value(json!({
            "ruleId": 7,
            "fired": false,
            "firedAt": 10,
            "ruleName": "overheat",
            "kind": "alarm_event",
            "alarmId": 3,
            "payload": {"severity": 2}
        }))
        .unwrap();
        assert_eq!(verdict.rule_id(), 7);
        assert_eq!(verdict.alarm_id(), Some(3));
        assert!(!verdict.fired_rule.fired);
        assert_eq!(verdict.payload["severity"], 2);
    }

    #[test]
    fn test_event_verdict_defaults() {
        let verdict: RuleVerdict = serde_json::from_value(json!({
            "ruleId": 1,
            "fired": true,
            "firedAt": 5,
            "kind": "event"
        }))
        .unwrap();
        assert_eq!(verdict.kind, RuleKind::Event);
        assert_eq!(verdict.alarm_id(), None);
        assert!(verdict.payload.is_null());
    }

    #[test]
    fn test_alarm_state_names() {
        assert_eq!(AlarmState::default(), AlarmState::Down);
        assert_eq!("handled".parse::<AlarmState>().unwrap(), AlarmState::Handled);
        assert!("FIRING".parse::<AlarmState>().is_err());
        assert_eq!(serde_json::to_string(&AlarmState::Up).unwrap(), "\"UP\"");
    }
}
