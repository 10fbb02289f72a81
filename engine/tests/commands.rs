mod common;

use common::{device, settle, MemorySink, ScriptedTransport};
use devpoll_engine::{CommandOutcome, FailureKind, PollingConfig, TriggerOutcome};
use devpoll_transport::{Command, CommandRejection, TransportError, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_test::assert_ok;

fn plug() -> Arc<ScriptedTransport> {
    ScriptedTransport::new(&[
        ("power", Value::Bool(false)),
        ("watts", Value::Number(0.0)),
        ("firmware", Value::Text("1.4.2".into())),
    ])
}

#[tokio::test(start_paused = true)]
async fn successful_command_triggers_one_extra_refresh() {
    let transport = plug();
    let sink = MemorySink::new();
    let device = device(transport.clone(), sink.clone());

    assert_ok!(device.initialize(&PollingConfig::every(10, 0)));
    sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.fetches(), 1);
    sink.clear();

    let outcome = device.handle_command("power", Command::Set(Value::Bool(true))).await.unwrap();
    assert_eq!(outcome, CommandOutcome::Sent);
    settle().await;

    assert_eq!(transport.fetches(), 2);
    assert_eq!(sink.states(), vec![("power".to_string(), Value::Bool(true))]);

    sleep(Duration::from_millis(5500)).await;
    assert_eq!(transport.fetches(), 3);
    assert_eq!(transport.commands(), vec![("power".to_string(), Value::Bool(true))]);
}

#[tokio::test(start_paused = true)]
async fn command_during_fetch_queues_refresh() {
    let transport = plug();
    transport.set_latency(Duration::from_millis(500));
    let sink = MemorySink::new();
    let device = device(transport.clone(), sink.clone());

    assert_ok!(device.initialize(&PollingConfig::every(60, 0)));
    sleep(Duration::from_millis(100)).await;

    // The running fetch may have read the old value; a fresh one follows
    let outcome = device.coordinator().set("power", true).await.unwrap();
    assert_eq!(outcome, CommandOutcome::Sent);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(transport.fetches(), 2);
    assert_eq!(transport.overlaps(), 0);
    assert_eq!(
        device.last_snapshot().unwrap().get("power"),
        Some(&Value::Bool(true))
    );
}

#[tokio::test(start_paused = true)]
async fn settle_delay_postpones_refresh() {
    let transport = plug();
    let device = device(transport.clone(), MemorySink::new());

    let config = PollingConfig::every(60, 0).with_command_refresh_delay(Duration::from_millis(500));
    assert_ok!(device.initialize(&config));
    settle().await;

    assert_eq!(device.coordinator().set("power", true).await.unwrap(), CommandOutcome::Sent);
    sleep(Duration::from_millis(400)).await;
    assert_eq!(transport.fetches(), 1);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn delayed_refresh_is_dropped_after_dispose() {
    let transport = plug();
    let sink = MemorySink::new();
    let device = device(transport.clone(), sink.clone());

    let config = PollingConfig::every(60, 0).with_command_refresh_delay(Duration::from_millis(500));
    assert_ok!(device.initialize(&config));
    settle().await;

    assert_eq!(device.coordinator().set("power", true).await.unwrap(), CommandOutcome::Sent);
    device.dispose();
    assert_ok!(device.initialize(&config));
    settle().await;
    let fetches = transport.fetches();

    sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.fetches(), fetches);
}

#[tokio::test(start_paused = true)]
async fn rejected_commands_leave_availability_alone() {
    let transport = plug();
    let sink = MemorySink::new();
    let device = device(transport.clone(), sink.clone());

    assert_ok!(device.initialize(&PollingConfig::every(60, 0)));
    settle().await;
    sink.clear();

    let outcome = device.coordinator().set("firmware", "2.0.0").await.unwrap();
    assert_eq!(outcome, CommandOutcome::Rejected(CommandRejection::ReadOnly("firmware".into())));

    let outcome = device.coordinator().set("bogus", 1).await.unwrap();
    assert!(matches!(outcome, CommandOutcome::Rejected(CommandRejection::UnknownChannel(_))));

    let outcome = device.coordinator().set("power", "ON").await.unwrap();
    assert!(matches!(outcome, CommandOutcome::Rejected(CommandRejection::UnsupportedValue { .. })));

    settle().await;
    assert!(transport.commands().is_empty());
    assert_eq!(transport.fetches(), 1);
    assert!(sink.events().is_empty());
    assert!(device.availability().is_online());
}

#[tokio::test(start_paused = true)]
async fn failed_command_takes_device_offline() {
    let transport = plug();
    let sink = MemorySink::new();
    let device = device(transport.clone(), sink.clone());

    assert_ok!(device.initialize(&PollingConfig::every(10, 0)));
    settle().await;

    transport.fail_commands(Some(TransportError::ConnectionRefused("reset by peer".into())));
    let outcome = device.coordinator().set("power", true).await.unwrap();
    assert!(matches!(outcome, CommandOutcome::Failed(ref reason) if reason.kind == FailureKind::ConnectionRefused));

    settle().await;
    assert!(device.availability().is_offline());
    // No refresh follows a failed write
    assert_eq!(transport.fetches(), 1);

    transport.fail_commands(None);
    sleep(Duration::from_secs(10)).await;
    assert!(device.availability().is_online());
    let statuses = sink.statuses();
    assert_eq!(statuses.len(), 3);
    assert!(statuses[0].is_online());
    assert!(statuses[1].is_offline());
    assert!(statuses[2].is_online());
}

#[tokio::test(start_paused = true)]
async fn refresh_sentinel_requests_immediate_fetch() {
    let transport = plug();
    let device = device(transport.clone(), MemorySink::new());

    assert_ok!(device.initialize(&PollingConfig::every(60, 0)));
    settle().await;

    let outcome = device.handle_command("watts", Command::Refresh).await.unwrap();
    assert_eq!(outcome, CommandOutcome::RefreshRequested(TriggerOutcome::Started));
    settle().await;

    assert_eq!(transport.fetches(), 2);
    assert!(transport.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn commands_for_stopped_device_are_dropped() {
    let transport = plug();
    let device = device(transport.clone(), MemorySink::new());

    let outcome = device.coordinator().set("power", true).await.unwrap();
    assert_eq!(outcome, CommandOutcome::Inactive);

    let outcome = device.handle_command("power", Command::Refresh).await.unwrap();
    assert_eq!(outcome, CommandOutcome::RefreshRequested(TriggerOutcome::Inactive));

    assert!(transport.commands().is_empty());
    assert_eq!(transport.fetches(), 0);
}
