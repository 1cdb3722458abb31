//! Handshake tests for `ConnectionManager`.
//!
//! Drives the manager against `SimTransport` on tokio's paused clock and
//! checks the client-id and login sequences, token reuse, teardown, and the
//! generation guard around reconnects.

use std::time::Duration;

use neotool_core::types::{LoginData, TokenInfo};
use neotool_harness::{SessionSnapshot, SimTransport};
use neotool_session::{
    ConnectionManager, Operation, SessionConfig, SessionError, SystemEnv, TransportError,
};
use proptest::prelude::*;
use serde_json::{Value, json};

const RETRY: Duration = Duration::from_secs(10);

/// Backend that accepts every handshake step.
fn handshake_backend() -> SimTransport {
    let sim = SimTransport::new();
    sim.reply(Operation::SetClientId, Value::Null);
    sim.reply(Operation::SetToken, Value::Null);
    sim.reply(Operation::Login, token_json(42));
    sim
}

fn token_json(user_id: i64) -> Value {
    json!({"userID": user_id, "securityKey": "key", "serviceToken": "svc", "deviceID": "dev"})
}

fn new_manager(sim: &SimTransport, config: SessionConfig) -> ConnectionManager<SimTransport, SystemEnv> {
    ConnectionManager::new(sim.clone(), SystemEnv::new(), config)
}

/// Let every runnable task reach its next suspension point without crossing
/// a retry interval.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn payload_of(sim: &SimTransport, operation: Operation) -> Option<Value> {
    sim.requests().into_iter().find(|r| r.operation == operation).map(|r| r.payload)
}

#[tokio::test(start_paused = true)]
async fn open_runs_client_id_and_login() {
    let sim = handshake_backend();
    let manager = new_manager(&sim, SessionConfig::new("app1"));

    let _session = manager.connect();
    assert_eq!(sim.connects(), 1);
    assert_eq!(manager.generation(), 0);

    sim.open();
    settle().await;

    assert_eq!(manager.generation(), 1);
    let state = manager.state();
    assert!(state.is_connected());
    assert!(state.has_client_id());
    assert!(state.is_logged_in());
    assert_eq!(manager.token().map(|t| t.user_id), Some(42));

    // Oracle: anonymous login when no credentials are configured
    assert_eq!(payload_of(&sim, Operation::SetClientId), Some(json!({"clientID": "app1"})));
    assert_eq!(payload_of(&sim, Operation::Login), Some(json!({"account": "", "password": ""})));
}

#[tokio::test(start_paused = true)]
async fn configured_credentials_are_sent() {
    let sim = handshake_backend();
    let config = SessionConfig::new("app1").with_login_data(LoginData::new("user", "secret"));
    let manager = new_manager(&sim, config);

    let _session = manager.connect();
    sim.open();
    settle().await;

    assert_eq!(
        payload_of(&sim, Operation::Login),
        Some(json!({"account": "user", "password": "secret"}))
    );
}

#[tokio::test(start_paused = true)]
async fn failed_login_is_reported_and_retried() {
    let sim = handshake_backend();
    sim.fail_once(Operation::Login, "backend busy");
    let manager = new_manager(&sim, SessionConfig::new("app1"));
    let mut errors = manager.on_error();

    let _session = manager.connect();
    sim.open();
    settle().await;

    assert!(!manager.state().is_logged_in());
    assert!(manager.state().has_client_id(), "client id does not wait for login");
    assert!(matches!(
        errors.try_recv(),
        Ok(SessionError::Transport(TransportError::Request { operation: Operation::Login, .. }))
    ));

    tokio::time::sleep(RETRY).await;

    assert!(manager.state().is_logged_in());
    assert_eq!(sim.count(Operation::Login), 2);
}

#[tokio::test(start_paused = true)]
async fn configured_token_is_resumed() {
    let sim = handshake_backend();
    let token = TokenInfo { user_id: 7, ..TokenInfo::default() };
    let manager = new_manager(&sim, SessionConfig::new("app1").with_token(token));

    let _session = manager.connect();
    sim.open();
    settle().await;

    assert!(manager.state().is_logged_in());
    assert_eq!(sim.count(Operation::SetToken), 1);
    assert_eq!(sim.count(Operation::Login), 0);
    assert_eq!(manager.token().map(|t| t.user_id), Some(7));
}

#[tokio::test(start_paused = true)]
async fn rejected_token_falls_back_to_fresh_login() {
    let sim = handshake_backend();
    sim.fail_once(Operation::SetToken, "token expired");
    let token = TokenInfo { user_id: 7, ..TokenInfo::default() };
    let manager = new_manager(&sim, SessionConfig::new("app1").with_token(token));

    let _session = manager.connect();
    sim.open();
    settle().await;

    assert!(!manager.state().is_logged_in());
    assert_eq!(manager.token(), None);

    tokio::time::sleep(RETRY).await;

    assert!(manager.state().is_logged_in());
    assert_eq!(sim.count(Operation::Login), 1);
    assert_eq!(manager.token().map(|t| t.user_id), Some(42));
}

#[tokio::test(start_paused = true)]
async fn close_clears_flags_and_token() {
    let sim = handshake_backend();
    let manager = new_manager(&sim, SessionConfig::new("app1"));
    let _session = manager.connect();
    sim.open();
    settle().await;

    sim.close();
    settle().await;

    let state = manager.state();
    assert!(!state.is_connected());
    assert!(!state.is_logged_in());
    assert!(!state.has_client_id());
    assert_eq!(manager.token(), None);
    assert_eq!(manager.generation(), 1);
}

#[tokio::test(start_paused = true)]
async fn transport_error_counts_as_disconnect() {
    let sim = handshake_backend();
    let manager = new_manager(&sim, SessionConfig::new("app1"));
    let _session = manager.connect();
    sim.open();
    settle().await;

    sim.fail_connection("socket reset");
    settle().await;

    assert!(!manager.state().is_connected());
    assert_eq!(manager.token(), None);
}

#[tokio::test(start_paused = true)]
async fn reconnect_runs_the_handshake_again() {
    let sim = handshake_backend();
    let manager = new_manager(&sim, SessionConfig::new("app1"));
    let _session = manager.connect();
    sim.open();
    settle().await;

    sim.close();
    settle().await;
    sim.open();
    settle().await;

    assert_eq!(manager.generation(), 2);
    assert!(manager.state().is_logged_in());
    assert!(manager.state().has_client_id());
    assert_eq!(sim.count(Operation::SetClientId), 2);
    // The token was dropped with the old connection
    assert_eq!(sim.count(Operation::Login), 2);
}

#[tokio::test(start_paused = true)]
async fn stale_login_response_is_dropped() {
    let sim = handshake_backend();
    let held = sim.hold(Operation::Login);
    let manager = new_manager(&sim, SessionConfig::new("app1"));
    let _session = manager.connect();

    sim.open();
    settle().await;
    assert_eq!(sim.count(Operation::Login), 1);

    sim.close();
    settle().await;
    sim.open();
    settle().await;
    assert!(manager.state().is_logged_in());

    held.resolve(token_json(7));
    settle().await;

    assert_eq!(manager.generation(), 2);
    assert_eq!(manager.token().map(|t| t.user_id), Some(42));
}

#[tokio::test(start_paused = true)]
async fn stale_client_id_response_does_not_mark_new_connection() {
    let sim = handshake_backend();
    let held = sim.hold(Operation::SetClientId);
    let second = sim.hold(Operation::SetClientId);
    let manager = new_manager(&sim, SessionConfig::new("app1"));
    let _session = manager.connect();

    sim.open();
    settle().await;
    sim.close();
    settle().await;
    sim.open();
    settle().await;

    held.resolve(Value::Null);
    settle().await;
    assert!(!manager.state().has_client_id());

    second.resolve(Value::Null);
    settle().await;
    assert!(manager.state().has_client_id());
}

#[tokio::test(start_paused = true)]
async fn closing_the_session_tears_everything_down() {
    let sim = handshake_backend();
    let manager = new_manager(&sim, SessionConfig::new("app1"));
    let session = manager.connect();
    sim.open();
    settle().await;
    manager.get_danmaku_repeatedly(1000).unwrap();

    session.close();
    settle().await;

    assert_eq!(sim.disconnects(), 1);
    assert!(!manager.state().is_connected());
    assert!(!manager.is_getting_danmaku_repeatedly(1000));
    assert_eq!(manager.token(), None);
}

#[tokio::test(start_paused = true)]
async fn state_signal_notifies_on_progress() {
    let sim = handshake_backend();
    let manager = new_manager(&sim, SessionConfig::new("app1"));
    let mut state = manager.state_signal();
    let _session = manager.connect();

    sim.open();
    let first = state.changed().await.unwrap();

    assert!(first.is_connected());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_generation_counts_opens(events in prop::collection::vec(any::<bool>(), 0..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        runtime.block_on(async move {
            let sim = handshake_backend();
            let manager = new_manager(&sim, SessionConfig::new("app1"));
            let _session = manager.connect();
            let mut opens = 0;
            let mut previous: Option<SessionSnapshot> = None;

            for open in events {
                if open {
                    sim.open();
                    opens += 1;
                } else {
                    sim.close();
                }
                settle().await;

                let snapshot = SessionSnapshot::capture(&manager);
                let violations = snapshot.check(previous.as_ref());
                assert!(violations.is_empty(), "violations: {violations:?}");
                assert_eq!(snapshot.generation, opens);
                assert_eq!(snapshot.state.is_logged_in(), open);
                previous = Some(snapshot);
            }
        });
    }
}
