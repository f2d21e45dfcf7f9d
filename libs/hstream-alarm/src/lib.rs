//! hstream Alarm State Machine
//!
//! Turns per-rule verdicts into UP/DOWN alarm transitions. An alarm is UP
//! while at least one of its rules is active; HANDLED is an external
//! acknowledgement of an UP alarm.

pub mod error;
pub mod machine;

pub use error::{AlarmError, Result};
pub use machine::{Alarm, AlarmRuleState, AlarmSnapshot, AlarmStateMachine, Evaluation};
