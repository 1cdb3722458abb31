//! Forwarded message tests for `ConnectionManager`.
//!
//! Sending needs only a registered client id and retries until the backend
//! accepts the forward; receiving filters the shared forward stream by
//! target.

use std::time::Duration;

use neotool_harness::SimTransport;
use neotool_session::{
    ConnectionManager, Envelope, Message, Operation, SessionConfig, SessionError, SystemEnv,
    TransportEvent,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

const RETRY: Duration = Duration::from_secs(10);

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
enum KeyboardMessage {
    Press { key: String },
    Release { key: String },
}

impl Message for KeyboardMessage {
    const TARGET: &'static str = "keyboard";
}

fn new_manager(sim: &SimTransport) -> ConnectionManager<SimTransport, SystemEnv> {
    ConnectionManager::new(sim.clone(), SystemEnv::new(), SessionConfig::new("app1"))
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn forward(target: &str, kind: &str) -> TransportEvent {
    let message = Envelope::new(target, kind, json!({"key": "a"}));
    TransportEvent::ReceiveForward {
        client_id: "peer".into(),
        message: serde_json::to_string(&message).unwrap(),
    }
}

#[tokio::test(start_paused = true)]
async fn message_waits_for_client_id() {
    let sim = SimTransport::live_backend();
    sim.fail_once(Operation::SetClientId, "not yet");
    let manager = new_manager(&sim);
    let envelope = Envelope::from_message(&KeyboardMessage::Press { key: "a".into() }).unwrap();

    manager.send_message_repeatedly("peer", &envelope).unwrap();
    let _session = manager.connect();
    settle().await;

    assert!(manager.state().is_logged_in());
    assert!(!manager.state().has_client_id());
    assert_eq!(sim.count(Operation::RequestForward), 0);

    assert!(sim.wait_for(Operation::RequestForward, 1).await);

    let request = sim.requests().into_iter().find(|r| r.operation == Operation::RequestForward);
    let payload = request.map(|r| r.payload).unwrap();
    assert_eq!(payload["clientID"], "peer");
    let sent: Envelope = serde_json::from_str(payload["message"].as_str().unwrap()).unwrap();
    assert_eq!(sent, envelope);
}

#[tokio::test(start_paused = true)]
async fn failed_forward_is_retried_once_delivered() {
    let sim = SimTransport::live_backend();
    let manager = new_manager(&sim);
    let mut errors = manager.on_error();
    let _session = manager.connect();
    settle().await;

    sim.fail_once(Operation::RequestForward, "peer offline");
    manager.send_message_repeatedly("peer", &Envelope::new("keyboard", "press", Value::Null)).unwrap();
    settle().await;

    assert_eq!(sim.count(Operation::RequestForward), 1);
    assert!(matches!(errors.try_recv(), Ok(SessionError::Transport(_))));

    tokio::time::sleep(RETRY * 3).await;

    assert_eq!(sim.count(Operation::RequestForward), 2);
}

#[tokio::test(start_paused = true)]
async fn teardown_stops_undelivered_messages() {
    let sim = SimTransport::new();
    let manager = new_manager(&sim);
    let session = manager.connect();

    manager.send_message_repeatedly("peer", &Envelope::new("keyboard", "press", Value::Null)).unwrap();
    session.close();
    sim.open();
    tokio::time::sleep(RETRY * 3).await;

    assert_eq!(sim.count(Operation::RequestForward), 0);
}

#[tokio::test]
async fn invalid_targets_are_rejected() {
    let sim = SimTransport::new();
    let manager = new_manager(&sim);
    let envelope = Envelope::new("keyboard", "press", Value::Null);

    assert_eq!(
        manager.send_message_repeatedly("", &envelope),
        Err(SessionError::InvalidTarget(String::new()))
    );
    assert_eq!(
        manager.send_message_repeatedly("peer", &Envelope::new("", "press", Value::Null)),
        Err(SessionError::InvalidTarget(String::new()))
    );
}

#[tokio::test]
async fn messages_are_filtered_by_target() {
    let sim = SimTransport::new();
    let manager = new_manager(&sim);
    let mut keyboard = manager.messages(KeyboardMessage::TARGET);

    sim.emit(forward("sticker", "show"));
    sim.emit(forward("keyboard", "release"));

    let received = keyboard.next_message::<KeyboardMessage>().await.unwrap();
    assert_eq!(received, Ok(KeyboardMessage::Release { key: "a".into() }));
}

#[tokio::test]
async fn undecodable_forward_is_reported_and_skipped() {
    let sim = SimTransport::new();
    let manager = new_manager(&sim);
    let mut errors = manager.on_error();
    let mut keyboard = manager.messages("keyboard");

    sim.emit(TransportEvent::ReceiveForward { client_id: "peer".into(), message: "{oops".into() });
    sim.emit(forward("keyboard", "press"));

    let envelope = keyboard.next().await.unwrap();
    assert_eq!(envelope.kind, "press");
    assert!(matches!(errors.try_recv(), Ok(SessionError::Payload { .. })));
}
