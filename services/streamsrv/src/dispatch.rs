//! Sink dispatch
//!
//! Fans one classified packet out to its sinks. Sinks run concurrently,
//! each with its own bounded retry; a sink that stays down is
//! dead-lettered under its own label and never blocks the others.

use crate::classify::{event_payload, Classified};
use crate::dead_letter::{stage, DeadLetter};
use crate::publish::{RealtimeMessage, RealtimePublisher};
use common::{retry_with_backoff_if, RetryPolicy};
use errors::StreamError;
use futures::future::{join_all, BoxFuture, FutureExt};
use hstream_alarm::{AlarmError, AlarmStateMachine, Evaluation};
use hstream_model::Packet;
use hstream_store::{ProjectSinks, StoreError, TableKind};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

type SinkResult = (TableKind, hstream_store::Result<()>);

/// What happened to one classified packet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub written: Vec<TableKind>,
    pub failed: Vec<TableKind>,
    /// Set when an alarm-event changed its alarm between UP and DOWN
    pub transition: Option<Evaluation>,
    /// `(alarm_id, rule_id)` of an alarm-event naming an unregistered rule
    pub unknown_rule: Option<(i64, i64)>,
    pub published: bool,
}

pub struct Dispatcher {
    sinks: ProjectSinks,
    alarms: Arc<AlarmStateMachine>,
    dead_letter: DeadLetter,
    publisher: Option<Arc<dyn RealtimePublisher>>,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        sinks: ProjectSinks,
        alarms: Arc<AlarmStateMachine>,
        dead_letter: DeadLetter,
        publisher: Option<Arc<dyn RealtimePublisher>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            sinks,
            alarms,
            dead_letter,
            publisher,
            retry,
        }
    }

    pub fn alarms(&self) -> &Arc<AlarmStateMachine> {
        &self.alarms
    }

    /// Persist and publish one classified packet
    ///
    /// `key` and `received` identify the source message for publishing
    /// and dead-letter records.
    pub async fn dispatch(
        &self,
        classified: &Classified,
        key: &str,
        received: &str,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let packet = classified.packet();
        let Some(timestamp) = packet.timestamp_millis() else {
            let err = StreamError::Classification(format!(
                "packet '{}' has no millisecond timestamp in '{}'",
                packet.name, packet.timestamp_field
            ));
            self.dead_letter
                .record(stage::CLASSIFICATION, &err, received, None)
                .await;
            return outcome;
        };

        let identifier = classified.timeline_identifier();
        let identifier = identifier.as_str();
        let timeline = &self.sinks.timeline;

        let results = match classified {
            Classified::Packet(packet) => {
                let raw = &self.sinks.raw;
                join_all([
                    self.write(TableKind::Raw, move || raw.persist(packet)),
                    self.write(TableKind::Timeline, move || {
                        timeline.increment_all(identifier, timestamp)
                    }),
                ])
                .await
            },
            Classified::Event { packet, verdict } => {
                let payload = event_payload(packet);
                let payload = &payload;
                let rule_id = verdict.rule_id();
                let events = &self.sinks.event;
                join_all([
                    self.write(TableKind::Event, move || {
                        events.persist(timestamp, rule_id, payload)
                    }),
                    self.write(TableKind::Timeline, move || {
                        timeline.increment_all(identifier, timestamp)
                    }),
                ])
                .await
            },
            Classified::AlarmEvent {
                packet,
                verdict,
                alarm_id,
            } => {
                let fired = verdict.fired_rule.fired;
                let evaluation =
                    match self
                        .alarms
                        .evaluate(*alarm_id, verdict.rule_id(), fired, timestamp)
                    {
                        Ok(evaluation) => evaluation,
                        Err(AlarmError::RuleUnknown { alarm_id, rule_id }) => {
                            let err: StreamError =
                                AlarmError::RuleUnknown { alarm_id, rule_id }.into();
                            warn!(alarm_id, rule_id, "Alarm-event skipped: {}", err);
                            outcome.unknown_rule = Some((alarm_id, rule_id));
                            return outcome;
                        },
                    };

                let detail = json!({
                    "alarmId": evaluation.alarm_id,
                    "ruleId": evaluation.rule_id,
                    "ruleName": verdict.rule_name,
                    "previous": evaluation.previous,
                    "state": evaluation.state,
                    "payload": verdict.payload,
                });
                let detail = &detail;
                let rule_state = &self.sinks.rule_state;
                let fired_rule = &verdict.fired_rule;
                let mut writes = vec![self.write(TableKind::RuleState, move || {
                    rule_state.save(fired_rule)
                })];

                if evaluation.transitioned {
                    info!(
                        alarm_id = evaluation.alarm_id,
                        device_id = packet.device_id,
                        previous = %evaluation.previous,
                        state = %evaluation.state,
                        "Alarm transition"
                    );
                    outcome.transition = Some(evaluation);
                    let alarm = &self.sinks.alarm;
                    let device_id = packet.device_id;
                    let state = evaluation.state;
                    writes.push(self.write(TableKind::Alarm, move || {
                        alarm.record(timestamp, device_id, state, detail)
                    }));
                    writes.push(self.write(TableKind::Timeline, move || {
                        timeline.increment_all(identifier, timestamp)
                    }));
                }
                join_all(writes).await
            },
        };

        for (kind, result) in results {
            match result {
                Ok(()) => outcome.written.push(kind),
                Err(e) => {
                    let err = StreamError::persistence(kind.label(), e);
                    self.dead_letter
                        .record(kind.label(), &err, received, Some(timestamp))
                        .await;
                    outcome.failed.push(kind);
                },
            }
        }

        outcome.published = self.publish(key, packet).await;
        debug!(
            class = classified.label(),
            written = outcome.written.len(),
            failed = outcome.failed.len(),
            "Dispatched"
        );
        outcome
    }

    /// One sink write under the retry policy; only backend failures retry
    fn write<'a, F, Fut>(&'a self, kind: TableKind, op: F) -> BoxFuture<'a, SinkResult>
    where
        F: FnMut() -> Fut + Send + 'a,
        Fut: Future<Output = hstream_store::Result<()>> + Send + 'a,
    {
        let policy = self.retry;
        async move {
            let result = retry_with_backoff_if(
                op,
                policy.max_attempts,
                policy.initial_delay(),
                StoreError::is_retryable,
            )
            .await;
            if let Err(e) = &result {
                warn!(sink = kind.label(), "Sink write failed: {}", e);
            }
            (kind, result)
        }
        .boxed()
    }

    /// Publish failures are logged only; the packet is already stored
    async fn publish(&self, key: &str, packet: &Packet) -> bool {
        let Some(publisher) = &self.publisher else {
            return false;
        };
        let message = RealtimeMessage {
            key: key.to_string(),
            packet: packet.clone(),
        };
        match publisher.publish(&message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key, "Realtime publish failed: {}", e);
                false
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::enrich::derive_packets;
    use crate::publish::BroadcastPublisher;
    use hstream_model::{
        AlarmState, FieldType, FiredRule, PacketField, RuleKind, RuleVerdict,
    };
    use hstream_store::helpers::provisioned_store;
    use hstream_store::FixedTimeProvider;
    use hstream_timeline::Granularity;

    const TS: i64 = 1_709_647_629_123;

    fn packet() -> Packet {
        Packet {
            id: 12,
            name: "weather".to_string(),
            device_id: 3,
            project_id: 1,
            timestamp_field: "ts".to_string(),
            fields: vec![
                PacketField::new(1, "temperature", FieldType::Double, json!(21.5)),
                PacketField::new(2, "ts", FieldType::Timestamp, json!(TS)),
            ],
        }
    }

    fn alarm_event(rule_id: i64, fired: bool) -> Classified {
        let verdict = RuleVerdict {
            fired_rule: FiredRule::new(rule_id, fired, TS),
            rule_name: "overheat".to_string(),
            kind: RuleKind::AlarmEvent { alarm_id: 7 },
            payload: json!({}),
        };
        let derived = derive_packets(&packet(), &[verdict]).unwrap();
        classify(derived[0].clone()).unwrap()
    }

    async fn dispatcher(publisher: Option<Arc<dyn RealtimePublisher>>) -> Dispatcher {
        let store = provisioned_store(1).await.unwrap();
        let sinks = ProjectSinks::new(store, 1, Arc::new(FixedTimeProvider::new(TS)));
        let dead_letter = DeadLetter::new(sinks.error.clone(), RetryPolicy::none());
        Dispatcher::new(
            sinks,
            Arc::new(AlarmStateMachine::new([(7, vec![1, 2])])),
            dead_letter,
            publisher,
            RetryPolicy::none(),
        )
    }

    #[tokio::test]
    async fn test_ordinary_packet_writes_raw_and_timeline() {
        let publisher = Arc::new(BroadcastPublisher::new(4));
        let mut rx = publisher.subscribe();
        let dispatcher = dispatcher(Some(publisher)).await;

        let outcome = dispatcher
            .dispatch(&Classified::Packet(packet()), "3.12", "{}")
            .await;
        assert_eq!(outcome.written, vec![TableKind::Raw, TableKind::Timeline]);
        assert!(outcome.failed.is_empty());
        assert!(outcome.published);
        assert_eq!(rx.recv().await.unwrap().key, "3.12");

        let sinks = &dispatcher.sinks;
        assert!(sinks.raw.get(TS, 12).await.unwrap().is_some());
        let count = sinks
            .timeline
            .bucket_count("HPacket.12", Granularity::Second, TS)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_alarm_transition_writes_alarm_table() {
        let dispatcher = dispatcher(None).await;

        let up = dispatcher.dispatch(&alarm_event(1, true), "3.12", "{}").await;
        let transition = up.transition.unwrap();
        assert_eq!(transition.state, AlarmState::Up);
        assert_eq!(
            up.written,
            vec![TableKind::RuleState, TableKind::Alarm, TableKind::Timeline]
        );

        // Second rule keeps the alarm UP: rule state only
        let steady = dispatcher.dispatch(&alarm_event(2, true), "3.12", "{}").await;
        assert!(steady.transition.is_none());
        assert_eq!(steady.written, vec![TableKind::RuleState]);

        let history = dispatcher.sinks.alarm.history(AlarmState::Up).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].device_id, 3);
        assert_eq!(history[0].detail["alarmId"], 7);

        let persisted = dispatcher.sinks.rule_state.load_all().await.unwrap();
        assert_eq!(persisted.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_rule_is_skipped() {
        let dispatcher = dispatcher(None).await;
        let outcome = dispatcher.dispatch(&alarm_event(99, true), "3.12", "{}").await;
        assert_eq!(outcome.unknown_rule, Some((7, 99)));
        assert!(outcome.written.is_empty());
        assert_eq!(dispatcher.alarms().state(7), Some(AlarmState::Down));
        assert!(dispatcher.sinks.rule_state.load_all().await.unwrap().is_empty());
    }
}
