//! Alarm state machine
//!
//! One registry entry per alarm, each behind its own mutex: evaluations of
//! the same alarm serialize, different alarms run in parallel. The registry
//! shape is fixed at construction, so the map itself needs no lock.

use crate::error::{AlarmError, Result};
use hstream_model::{AlarmState, FiredRule};
use hstream_store::RuleStateSink;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Activity of one rule owned by an alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmRuleState {
    pub rule_id: i64,
    pub active: bool,
}

/// Alarm with its rules
///
/// `active_count` mirrors the number of active rules so the UP/DOWN check
/// never walks the rule set.
#[derive(Debug, Clone)]
pub struct Alarm {
    pub alarm_id: i64,
    rules: BTreeMap<i64, AlarmRuleState>,
    active_count: usize,
    state: AlarmState,
}

impl Alarm {
    fn new(alarm_id: i64, rule_ids: &[i64]) -> Self {
        let rules = rule_ids
            .iter()
            .map(|id| {
                (
                    *id,
                    AlarmRuleState {
                        rule_id: *id,
                        active: false,
                    },
                )
            })
            .collect();
        Self {
            alarm_id,
            rules,
            active_count: 0,
            state: AlarmState::Down,
        }
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn exists_active_rule(&self) -> bool {
        self.active_count > 0
    }

    pub fn rules(&self) -> impl Iterator<Item = &AlarmRuleState> {
        self.rules.values()
    }

    /// Flip one rule, keeping the counter in sync; false if unknown
    fn set_rule(&mut self, rule_id: i64, active: bool) -> bool {
        let Some(rule) = self.rules.get_mut(&rule_id) else {
            return false;
        };
        match (rule.active, active) {
            (false, true) => self.active_count += 1,
            (true, false) => self.active_count -= 1,
            _ => {},
        }
        rule.active = active;
        true
    }
}

/// Outcome of one rule evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub alarm_id: i64,
    pub rule_id: i64,
    pub transitioned: bool,
    pub previous: AlarmState,
    pub state: AlarmState,
    pub timestamp: i64,
}

/// Point-in-time view of one alarm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmSnapshot {
    pub alarm_id: i64,
    pub state: AlarmState,
    pub rules: Vec<AlarmRuleState>,
}

/// Per-project alarm state machine
#[derive(Debug)]
pub struct AlarmStateMachine {
    alarms: HashMap<i64, Mutex<Alarm>>,
    /// rule id -> alarms that own it
    rule_index: HashMap<i64, Vec<i64>>,
}

impl AlarmStateMachine {
    /// Build from an alarm id -> rule ids mapping; every alarm starts DOWN
    pub fn new<I, R>(alarm_rules: I) -> Self
    where
        I: IntoIterator<Item = (i64, R)>,
        R: AsRef<[i64]>,
    {
        let mut alarms = HashMap::new();
        let mut rule_index: HashMap<i64, Vec<i64>> = HashMap::new();
        for (alarm_id, rule_ids) in alarm_rules {
            let rule_ids = rule_ids.as_ref();
            for rule_id in rule_ids {
                let owners = rule_index.entry(*rule_id).or_default();
                if !owners.contains(&alarm_id) {
                    owners.push(alarm_id);
                }
            }
            alarms.insert(alarm_id, Mutex::new(Alarm::new(alarm_id, rule_ids)));
        }
        for owners in rule_index.values_mut() {
            owners.sort_unstable();
        }
        Self { alarms, rule_index }
    }

    /// Build and seed rule activity from the last persisted verdicts
    ///
    /// An unreadable rule state table leaves every alarm DOWN; startup
    /// never blocks on it.
    pub async fn rehydrate<I, R>(rule_state: &RuleStateSink, alarm_rules: I) -> Self
    where
        I: IntoIterator<Item = (i64, R)>,
        R: AsRef<[i64]>,
    {
        let machine = Self::new(alarm_rules);
        match rule_state.load_all().await {
            Ok(persisted) => {
                let seeded = machine.seed(persisted.values());
                info!(
                    table = rule_state.table(),
                    alarms = machine.len(),
                    seeded,
                    "Alarm state rehydrated"
                );
            },
            Err(e) => {
                warn!(
                    table = rule_state.table(),
                    "Rule state unavailable, all alarms start DOWN: {}", e
                );
            },
        }
        machine
    }

    /// Apply persisted verdicts without reporting transitions; returns how
    /// many rule entries were set
    pub fn seed<'a>(&self, rules: impl IntoIterator<Item = &'a FiredRule>) -> usize {
        let mut seeded = 0;
        for rule in rules {
            let Some(owners) = self.rule_index.get(&rule.rule_id) else {
                continue;
            };
            for alarm_id in owners {
                if let Some(entry) = self.alarms.get(alarm_id) {
                    let mut alarm = entry.lock();
                    alarm.set_rule(rule.rule_id, rule.fired);
                    alarm.state = if alarm.exists_active_rule() {
                        AlarmState::Up
                    } else {
                        AlarmState::Down
                    };
                    seeded += 1;
                }
            }
        }
        seeded
    }

    /// Record one verdict; true if the alarm changed between UP and DOWN
    pub fn evaluate_rule_result(
        &self,
        alarm_id: i64,
        rule_id: i64,
        fired: bool,
        timestamp: i64,
    ) -> Result<bool> {
        self.evaluate(alarm_id, rule_id, fired, timestamp)
            .map(|e| e.transitioned)
    }

    /// Record one verdict and report the resulting state
    pub fn evaluate(
        &self,
        alarm_id: i64,
        rule_id: i64,
        fired: bool,
        timestamp: i64,
    ) -> Result<Evaluation> {
        let unknown = || AlarmError::RuleUnknown { alarm_id, rule_id };
        let entry = self.alarms.get(&alarm_id).ok_or_else(unknown)?;

        let mut alarm = entry.lock();
        if !alarm.rules.contains_key(&rule_id) {
            return Err(unknown());
        }

        let previous = alarm.state;
        let had_active = alarm.exists_active_rule();
        alarm.set_rule(rule_id, fired);
        let has_active = alarm.exists_active_rule();

        let next = if !had_active && has_active && previous != AlarmState::Up {
            Some(AlarmState::Up)
        } else if had_active && !has_active && previous == AlarmState::Up {
            Some(AlarmState::Down)
        } else {
            None
        };
        if let Some(state) = next {
            alarm.state = state;
        }
        let state = alarm.state;
        drop(alarm);

        if next.is_some() {
            debug!(alarm_id, rule_id, %previous, %state, "Alarm transition");
        }
        Ok(Evaluation {
            alarm_id,
            rule_id,
            transitioned: next.is_some(),
            previous,
            state,
            timestamp,
        })
    }

    pub fn state(&self, alarm_id: i64) -> Option<AlarmState> {
        self.alarms.get(&alarm_id).map(|a| a.lock().state)
    }

    /// Alarms that own `rule_id`, ascending
    pub fn alarms_for_rule(&self, rule_id: i64) -> &[i64] {
        self.rule_index
            .get(&rule_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Acknowledge an alarm; only an UP alarm can be handled
    ///
    /// Returns the state after the call, `None` for an unknown alarm.
    pub fn mark_handled(&self, alarm_id: i64) -> Option<AlarmState> {
        let entry = self.alarms.get(&alarm_id)?;
        let mut alarm = entry.lock();
        if alarm.state == AlarmState::Up {
            alarm.state = AlarmState::Handled;
            info!(alarm_id, "Alarm handled");
        }
        Some(alarm.state)
    }

    /// All alarms sorted by id
    pub fn snapshot(&self) -> Vec<AlarmSnapshot> {
        let mut snapshot: Vec<AlarmSnapshot> = self
            .alarms
            .values()
            .map(|entry| {
                let alarm = entry.lock();
                AlarmSnapshot {
                    alarm_id: alarm.alarm_id,
                    state: alarm.state,
                    rules: alarm.rules().copied().collect(),
                }
            })
            .collect();
        snapshot.sort_by_key(|s| s.alarm_id);
        snapshot
    }

    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn machine() -> AlarmStateMachine {
        AlarmStateMachine::new([(1, vec![10, 20]), (2, vec![20, 30])])
    }

    #[test]
    fn test_two_rule_sequence() {
        let asm = machine();
        assert_eq!(asm.state(1), Some(AlarmState::Down));

        assert!(asm.evaluate_rule_result(1, 10, true, 1).unwrap());
        assert_eq!(asm.state(1), Some(AlarmState::Up));

        assert!(!asm.evaluate_rule_result(1, 20, true, 2).unwrap());
        assert!(!asm.evaluate_rule_result(1, 10, false, 3).unwrap());
        assert_eq!(asm.state(1), Some(AlarmState::Up));

        assert!(asm.evaluate_rule_result(1, 20, false, 4).unwrap());
        assert_eq!(asm.state(1), Some(AlarmState::Down));
    }

    #[test]
    fn test_repeated_verdicts_do_not_transition() {
        let asm = machine();
        assert!(asm.evaluate_rule_result(1, 10, true, 1).unwrap());
        assert!(!asm.evaluate_rule_result(1, 10, true, 2).unwrap());
        assert!(!asm.evaluate_rule_result(1, 20, false, 3).unwrap());
        assert_eq!(asm.state(1), Some(AlarmState::Up));
    }

    #[test]
    fn test_unknown_rule_leaves_state_untouched() {
        let asm = machine();
        asm.evaluate_rule_result(1, 10, true, 1).unwrap();

        let err = asm.evaluate_rule_result(1, 30, false, 2).unwrap_err();
        assert_eq!(err, AlarmError::RuleUnknown { alarm_id: 1, rule_id: 30 });
        assert!(asm.evaluate_rule_result(99, 10, true, 2).is_err());

        let snap = &asm.snapshot()[0];
        assert_eq!(snap.state, AlarmState::Up);
        assert_eq!(snap.rules.iter().filter(|r| r.active).count(), 1);
    }

    #[test]
    fn test_shared_rule_is_indexed_for_both_alarms() {
        let asm = machine();
        assert_eq!(asm.alarms_for_rule(20), &[1, 2]);
        assert_eq!(asm.alarms_for_rule(10), &[1]);
        assert!(asm.alarms_for_rule(99).is_empty());
    }

    #[test]
    fn test_handled_is_external_and_only_left_by_rising_edge() {
        let asm = machine();
        assert_eq!(asm.mark_handled(1), Some(AlarmState::Down));

        asm.evaluate_rule_result(1, 10, true, 1).unwrap();
        assert_eq!(asm.mark_handled(1), Some(AlarmState::Handled));

        // still active: stays handled
        assert!(!asm.evaluate_rule_result(1, 20, true, 2).unwrap());
        assert_eq!(asm.state(1), Some(AlarmState::Handled));

        // falling edge only applies to UP
        assert!(!asm.evaluate_rule_result(1, 10, false, 3).unwrap());
        let e = asm.evaluate(1, 20, false, 4).unwrap();
        assert!(!e.transitioned);
        assert_eq!((e.previous, e.state), (AlarmState::Handled, AlarmState::Handled));

        // the next rising edge raises it again
        let e = asm.evaluate(1, 10, true, 5).unwrap();
        assert!(e.transitioned);
        assert_eq!((e.previous, e.state), (AlarmState::Handled, AlarmState::Up));
        assert_eq!(asm.mark_handled(42), None);
    }

    #[test]
    fn test_seed_sets_initial_state() {
        let asm = machine();
        let seeded = asm.seed(&[FiredRule::new(20, true, 5), FiredRule::new(77, true, 5)]);
        assert_eq!(seeded, 2);
        assert_eq!(asm.state(1), Some(AlarmState::Up));
        assert_eq!(asm.state(2), Some(AlarmState::Up));

        // clearing the seeded rule is a real transition
        assert!(asm.evaluate_rule_result(2, 20, false, 6).unwrap());
    }
}
