use std::time::Duration;

use anvil_core::bridge::{BridgeMessage, progress_channel};
use anvil_core::models::{ProgressEvent, TaskId, TaskStatus};
use anvil_core::runtime::Effect;

fn event(task: &str, progress: f64) -> ProgressEvent {
    ProgressEvent {
        task_id: TaskId::from(task),
        status: TaskStatus::Running,
        progress,
        stage: "build".to_string(),
        appended_output: None,
    }
}

#[tokio::test]
async fn empty_bridge_yields_within_the_poll_timeout() {
    let (_sender, bridge) = progress_channel(Duration::from_millis(40));

    let started = tokio::time::Instant::now();
    assert_eq!(bridge.next().await, BridgeMessage::Empty);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(40));
    assert!(elapsed < Duration::from_secs(1));
}

#[tokio::test]
async fn events_are_delivered_in_send_order() {
    let (sender, bridge) = progress_channel(Duration::from_millis(40));
    assert!(sender.send(event("a", 0.1)));
    assert!(sender.send(event("b", 0.2)));
    assert!(sender.send(event("a", 0.5)));

    let mut received = Vec::new();
    while let BridgeMessage::Event(event) = bridge.next().await {
        received.push((event.task_id.0, event.progress));
    }
    assert_eq!(
        received,
        vec![
            ("a".to_string(), 0.1),
            ("b".to_string(), 0.2),
            ("a".to_string(), 0.5),
        ]
    );
}

#[tokio::test]
async fn dropped_senders_report_disconnect_after_queued_events() {
    let (sender, bridge) = progress_channel(Duration::from_millis(20));
    sender.send(event("a", 1.0));
    drop(sender);

    assert!(matches!(bridge.next().await, BridgeMessage::Event(_)));
    let started = tokio::time::Instant::now();
    assert_eq!(bridge.next().await, BridgeMessage::Disconnected);
    assert!(started.elapsed() >= Duration::from_millis(20));
}

#[tokio::test]
async fn sender_notices_dropped_bridge() {
    let (sender, bridge) = progress_channel(Duration::from_millis(20));
    drop(bridge);

    assert!(sender.is_closed());
    assert!(!sender.send(event("a", 0.0)));
}

#[tokio::test]
async fn watch_next_maps_into_program_messages() {
    let (sender, bridge) = progress_channel(Duration::from_millis(20));
    sender.send(event("a", 0.3));

    let effect = bridge.watch_next(|message| match message {
        BridgeMessage::Event(event) => Some(event.progress),
        BridgeMessage::Empty | BridgeMessage::Disconnected => None,
    });
    let Effect::Task(future) = effect else {
        panic!("expected a task effect");
    };
    assert_eq!(future.await, Some(0.3));
}

#[tokio::test]
async fn drain_ready_returns_only_queued_events() {
    let (sender, bridge) = progress_channel(Duration::from_millis(20));
    assert!(bridge.drain_ready().is_empty());

    sender.send(event("a", 0.1));
    sender.send(event("a", 0.2));
    assert_eq!(bridge.drain_ready().len(), 2);
    assert!(bridge.drain_ready().is_empty());
}
