//! End-to-end pipeline behaviour over the in-memory store

// Allow unwrap() in tests for cleaner test code
#![allow(clippy::disallowed_methods)]

mod support;

use hstream_alarm::AlarmStateMachine;
use hstream_model::AlarmState;
use hstream_store::helpers::provisioned_store;
use hstream_store::SharedStore;
use hstream_timeline::Granularity;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use streamsrv::{ChannelSource, NoopEvaluator, Pipeline, RawMessage};
use support::*;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

#[tokio::test]
async fn test_message_fans_out_to_every_sink() {
    let store = provisioned_store(PROJECT).await.unwrap();
    let evaluator = Arc::new(ScriptedEvaluator::new([
        vec![event_verdict(10), alarm_verdict(1, true)],
        vec![alarm_verdict(1, true)],
    ]));
    let context = context(store.clone(), evaluator);
    let pipeline = Pipeline::new(context.clone(), 2, 16);

    let (tx, source) = ChannelSource::new(16);
    tx.send(message(21.5, TS)).await.unwrap();
    tx.send(message(22.0, TS + 1_000)).await.unwrap();
    drop(tx);

    let stats = pipeline.run(source, CancellationToken::new()).await.unwrap();
    assert_eq!(stats.received, 2);
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.derived, 3);
    assert_eq!(stats.transitions, 1);
    assert_eq!(stats.sink_failures, 0);
    assert_eq!(stats.dead_lettered, 0);

    let sinks = sinks(store);
    assert!(sinks.raw.get(TS, PACKET).await.unwrap().is_some());
    assert!(sinks.raw.get(TS + 1_000, PACKET).await.unwrap().is_some());

    let packets = sinks
        .timeline
        .bucket_count("HPacket.12", Granularity::Day, TS)
        .await
        .unwrap();
    assert_eq!(packets, 2);
    let events = sinks
        .timeline
        .bucket_count("Event", Granularity::Day, TS)
        .await
        .unwrap();
    assert_eq!(events, 1);
    // Second alarm-event kept the alarm UP: no second count
    let alarms = sinks
        .timeline
        .bucket_count("Alarm.3", Granularity::Day, TS)
        .await
        .unwrap();
    assert_eq!(alarms, 1);

    let stored_events = sinks.event.events().await.unwrap();
    assert_eq!(stored_events.len(), 1);
    assert_eq!(stored_events[0].rule_id, 10);
    assert_eq!(stored_events[0].payload, json!({"notify": "ops"}));

    assert_eq!(sinks.alarm.history(AlarmState::Up).await.unwrap().len(), 1);
    assert_eq!(context.alarms().state(ALARM), Some(AlarmState::Up));
}

#[tokio::test]
async fn test_poison_messages_are_isolated() {
    let store = provisioned_store(PROJECT).await.unwrap();
    let context = context(store.clone(), Arc::new(NoopEvaluator));
    let pipeline = Pipeline::new(context, 1, 4);

    let (tx, source) = ChannelSource::new(8);
    tx.send(RawMessage::new("9.99", "{}")).await.unwrap();
    tx.send(RawMessage::new("3.12", "not json")).await.unwrap();
    tx.send(message(21.5, TS)).await.unwrap();
    drop(tx);

    let stats = pipeline.run(source, CancellationToken::new()).await.unwrap();
    assert_eq!(stats.received, 3);
    assert_eq!(stats.malformed, 2);
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.dead_lettered, 2);

    let sinks = sinks(store);
    let errors = sinks.error.records().await.unwrap();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| e.stage == "deserialization"));
    assert!(errors.iter().any(|e| e.received_packet == "not json"));
    assert!(sinks.raw.get(TS, PACKET).await.unwrap().is_some());

    // Error timeline counts at receive time
    let counted = sinks
        .timeline
        .bucket_count("Error", Granularity::Day, TS + 60_000)
        .await
        .unwrap();
    assert_eq!(counted, 2);
}

#[tokio::test]
async fn test_failing_sink_is_dead_lettered_once() {
    let store = provisioned_faulty_store().await;
    store.fail_writes_to("event_1");
    let shared: SharedStore = store.clone();
    let context = context(
        shared.clone(),
        Arc::new(ScriptedEvaluator::new([vec![event_verdict(10)]])),
    );

    let message = message(21.5, TS);
    let report = context.process(&message).await;
    assert_eq!(report.derived, 1);
    assert_eq!(report.failed, 1);
    // raw + packet timeline + event timeline
    assert_eq!(report.written, 3);
    // Backend failures are retried up to the policy limit
    assert_eq!(store.failed_writes.load(std::sync::atomic::Ordering::SeqCst), 3);

    let sinks = sinks(shared);
    let errors = sinks.error.records().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].stage, "event");
    assert_eq!(errors[0].error_type, "PersistenceError");
    assert_eq!(errors[0].received_packet, message.payload_text());
    assert_eq!(errors[0].timestamp, TS);

    assert!(sinks.raw.get(TS, PACKET).await.unwrap().is_some());
    let counted = sinks
        .timeline
        .bucket_count("Event", Granularity::Second, TS)
        .await
        .unwrap();
    assert_eq!(counted, 1);
}

#[tokio::test]
async fn test_dead_letter_write_is_retried() {
    let store = provisioned_faulty_store().await;
    store.fail_next_writes_to("hproject_error_1", 2);
    let shared: SharedStore = store.clone();
    let context = context(shared.clone(), Arc::new(NoopEvaluator));

    let report = context.process(&RawMessage::new("3.12", "not json")).await;
    assert!(!report.deserialized);
    assert_eq!(store.failed_writes.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(context.stats().dead_lettered, 1);

    let errors = sinks(shared).error.records().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].received_packet, "not json");
}

#[tokio::test]
async fn test_dead_letter_gives_up_after_retry_budget() {
    let store = provisioned_faulty_store().await;
    store.fail_writes_to("hproject_error_1");
    let shared: SharedStore = store.clone();
    let context = context(shared.clone(), Arc::new(NoopEvaluator));

    context.process(&RawMessage::new("3.12", "not json")).await;
    assert_eq!(store.failed_writes.load(std::sync::atomic::Ordering::SeqCst), 3);
    assert_eq!(context.stats().dead_lettered, 0);
    assert!(sinks(shared).error.records().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_error_timeline_failure_keeps_dead_letter_record() {
    let store = provisioned_faulty_store().await;
    store.fail_writes_to("timeline_hproject_1");
    let shared: SharedStore = store.clone();
    let context = context(shared.clone(), Arc::new(NoopEvaluator));

    context.process(&RawMessage::new("3.12", "not json")).await;
    let errors = sinks(shared).error.records().await.unwrap();
    assert_eq!(errors.len(), 1);
    // stored once: the timeline failure does not trigger a rewrite
    assert_eq!(context.stats().dead_lettered, 1);
}

#[tokio::test]
#[traced_test]
async fn test_unknown_alarm_rule_does_not_stop_pipeline() {
    let store = provisioned_store(PROJECT).await.unwrap();
    let evaluator = Arc::new(ScriptedEvaluator::new([
        vec![alarm_verdict(99, true)],
        vec![alarm_verdict(1, true)],
    ]));
    let context = context(store.clone(), evaluator);
    let pipeline = Pipeline::new(context.clone(), 1, 4);

    let (tx, source) = ChannelSource::new(4);
    tx.send(message(21.5, TS)).await.unwrap();
    tx.send(message(22.0, TS + 1_000)).await.unwrap();
    drop(tx);

    let stats = pipeline.run(source, CancellationToken::new()).await.unwrap();
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.unknown_rules, 1);
    assert_eq!(stats.transitions, 1);
    assert_eq!(stats.dead_lettered, 0);
    assert_eq!(context.alarms().state(ALARM), Some(AlarmState::Up));
    assert!(logs_contain("Alarm-event skipped"));

    // Nothing persisted for the unknown rule
    let persisted = sinks(store).rule_state.load_all().await.unwrap();
    assert_eq!(persisted.keys().copied().collect::<Vec<_>>(), vec![1]);
}

#[tokio::test]
async fn test_evaluation_failure_keeps_packet() {
    let store = provisioned_store(PROJECT).await.unwrap();
    let context = context(store.clone(), Arc::new(UnreachableEvaluator));

    let report = context.process(&message(21.5, TS)).await;
    assert!(report.evaluation_failed);
    assert_eq!(report.written, 2);

    let sinks = sinks(store);
    assert!(sinks.raw.get(TS, PACKET).await.unwrap().is_some());
    let errors = sinks.error.records().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].stage, "evaluation");
    assert_eq!(errors[0].error_type, "EvaluationError");
}

#[tokio::test]
async fn test_alarm_state_survives_restart() {
    let store = provisioned_store(PROJECT).await.unwrap();
    let first = context(
        store.clone(),
        Arc::new(ScriptedEvaluator::new([vec![alarm_verdict(1, true)]])),
    );
    first.process(&message(21.5, TS)).await;
    assert_eq!(first.alarms().state(ALARM), Some(AlarmState::Up));

    // New pipeline instance, state rebuilt from the rule state table
    let sinks = sinks(store.clone());
    let alarms = Arc::new(AlarmStateMachine::rehydrate(&sinks.rule_state, alarm_rules()).await);
    assert_eq!(alarms.state(ALARM), Some(AlarmState::Up));

    let second = context_with(
        store,
        Arc::new(ScriptedEvaluator::new([vec![alarm_verdict(1, false)]])),
        alarms,
    );
    let report = second.process(&message(20.0, TS + 5_000)).await;
    assert_eq!(report.transitions, 1);
    assert_eq!(second.alarms().state(ALARM), Some(AlarmState::Down));
    assert_eq!(sinks.alarm.history(AlarmState::Down).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancellation_drains_queued_messages() {
    let store = provisioned_store(PROJECT).await.unwrap();
    let context = context(store, Arc::new(NoopEvaluator));
    let pipeline = Pipeline::new(context.clone(), 2, 64);

    let (tx, source) = ChannelSource::new(64);
    for i in 0..20 {
        tx.send(message(20.0, TS + i * 1_000)).await.unwrap();
    }

    let token = CancellationToken::new();
    let run = tokio::spawn({
        let token = token.clone();
        async move { pipeline.run(source, token).await }
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while context.stats().processed < 20 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // Source still open: only the token ends the run
    token.cancel();
    let stats = run.await.unwrap().unwrap();
    assert_eq!(stats.processed, 20);
    drop(tx);
}
