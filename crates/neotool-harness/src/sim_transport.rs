//! Scriptable in-process backend.
//!
//! Replies are chosen per operation: queued one-shot replies first (data,
//! failure, or a held reply the test resolves later), then the operation's
//! persistent responder. A request with neither fails like a backend error.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use neotool_core::UserId;
use neotool_session::{Operation, Transport, TransportError, TransportEvent};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{Notify, broadcast, oneshot};

/// Upper bound for [`SimTransport::wait_for`] on the (usually paused) clock.
const WAIT_LIMIT: Duration = Duration::from_secs(3600);

const EVENT_CAPACITY: usize = 1024;

type Responder = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

enum Reply {
    Data(Value),
    Fail(String),
    Held(oneshot::Receiver<Result<Value, String>>),
}

enum Next {
    Scripted(Reply),
    Respond(Responder),
    Missing,
}

/// A request as the backend received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// Operation name
    pub operation: Operation,
    /// Request payload
    pub payload: Value,
}

impl RecordedRequest {
    /// The liver or user the request is about, if any.
    pub fn subject(&self) -> Option<UserId> {
        self.payload.get("liverUID").or_else(|| self.payload.get("userID")).and_then(Value::as_i64)
    }
}

/// Reply withheld until the test decides how the backend answers.
#[derive(Debug)]
pub struct HeldReply {
    tx: oneshot::Sender<Result<Value, String>>,
}

impl HeldReply {
    /// Answer with `data`.
    pub fn resolve(self, data: Value) {
        let _ = self.tx.send(Ok(data));
    }

    /// Answer with a backend error.
    pub fn fail(self, message: impl Into<String>) {
        let _ = self.tx.send(Err(message.into()));
    }
}

#[derive(Default)]
struct SimState {
    requests: Vec<RecordedRequest>,
    scripted: HashMap<Operation, VecDeque<Reply>>,
    responders: HashMap<Operation, Responder>,
    connects: usize,
    disconnects: usize,
    auto_open: bool,
}

struct Shared {
    connected: AtomicBool,
    events: broadcast::Sender<TransportEvent>,
    state: Mutex<SimState>,
    activity: Notify,
}

/// Simulated backend connection.
///
/// Clones share the same backend, so a test keeps one clone for scripting
/// while the session owns another.
#[derive(Clone)]
pub struct SimTransport {
    shared: Arc<Shared>,
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTransport {
    /// A backend with no replies scripted. Nothing opens until [`Self::open`].
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Shared {
            connected: AtomicBool::new(false),
            events,
            state: Mutex::new(SimState::default()),
            activity: Notify::new(),
        };
        Self { shared: Arc::new(shared) }
    }

    /// A backend that opens as soon as it is asked to connect and answers
    /// every operation like a healthy server with every liver broadcasting.
    ///
    /// Stopping a stream pushes `danmakuStop`; forwarded messages are looped
    /// back as `receiveForward`.
    pub fn live_backend() -> Self {
        let sim = Self::new();
        sim.shared.state.lock().auto_open = true;

        sim.reply(Operation::SetClientId, Value::Null);
        sim.reply(Operation::SetToken, Value::Null);
        sim.reply(
            Operation::Login,
            json!({"userID": 10_001, "securityKey": "sim", "serviceToken": "sim", "deviceID": "sim"}),
        );
        sim.respond(Operation::GetUserInfo, |payload| {
            let uid = subject(payload, "userID")?;
            Ok(json!({
                "userID": uid,
                "nickname": format!("liver{uid}"),
                "avatar": "",
                "liveID": format!("live{uid}"),
            }))
        });
        sim.respond(Operation::GetDanmaku, |payload| {
            let uid = subject(payload, "liverUID")?;
            Ok(json!({
                "streamInfo": {
                    "liveID": format!("live{uid}"),
                    "title": format!("broadcast of liver{uid}"),
                    "streamName": format!("stream{uid}"),
                },
            }))
        });

        let events = sim.shared.events.clone();
        sim.respond(Operation::StopDanmaku, move |payload| {
            let liver_uid = subject(payload, "liverUID")?;
            let _ = events.send(TransportEvent::DanmakuStop { liver_uid });
            Ok(Value::Null)
        });

        let events = sim.shared.events.clone();
        sim.respond(Operation::RequestForward, move |payload| {
            let field = |name: &str| payload.get(name).and_then(Value::as_str).map(str::to_string);
            let (Some(client_id), Some(message)) = (field("clientID"), field("message")) else {
                return Err("malformed requestForward payload".to_string());
            };
            let _ = events.send(TransportEvent::ReceiveForward { client_id, message });
            Ok(Value::Null)
        });
        sim
    }

    /// Answer every `operation` request with `responder(payload)`.
    pub fn respond<F>(&self, operation: Operation, responder: F)
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.shared.state.lock().responders.insert(operation, Arc::new(responder));
    }

    /// Answer every `operation` request with `data`.
    pub fn reply(&self, operation: Operation, data: Value) {
        self.respond(operation, move |_| Ok(data.clone()));
    }

    /// Answer the next `operation` request with `data`.
    pub fn reply_once(&self, operation: Operation, data: Value) {
        self.enqueue(operation, Reply::Data(data));
    }

    /// Fail the next `operation` request.
    pub fn fail_once(&self, operation: Operation, message: impl Into<String>) {
        self.enqueue(operation, Reply::Fail(message.into()));
    }

    /// Withhold the reply to the next `operation` request.
    pub fn hold(&self, operation: Operation) -> HeldReply {
        let (tx, rx) = oneshot::channel();
        self.enqueue(operation, Reply::Held(rx));
        HeldReply { tx }
    }

    fn enqueue(&self, operation: Operation, reply: Reply) {
        self.shared.state.lock().scripted.entry(operation).or_default().push_back(reply);
    }

    /// Open the connection.
    pub fn open(&self) {
        self.shared.connected.store(true, Ordering::SeqCst);
        self.emit(TransportEvent::Open);
    }

    /// Close the connection.
    pub fn close(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        self.emit(TransportEvent::Close);
    }

    /// Fail the connection.
    pub fn fail_connection(&self, message: impl Into<String>) {
        self.shared.connected.store(false, Ordering::SeqCst);
        self.emit(TransportEvent::Error { message: message.into() });
    }

    /// Push an event to subscribers.
    pub fn emit(&self, event: TransportEvent) {
        tracing::debug!(event = event.name(), "sim emit");
        let _ = self.shared.events.send(event);
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.state.lock().requests.clone()
    }

    /// Number of `operation` requests received.
    pub fn count(&self, operation: Operation) -> usize {
        self.shared.state.lock().requests.iter().filter(|r| r.operation == operation).count()
    }

    /// Number of `operation` requests about `uid`.
    pub fn count_for(&self, operation: Operation, uid: UserId) -> usize {
        self.shared
            .state
            .lock()
            .requests
            .iter()
            .filter(|r| r.operation == operation && r.subject() == Some(uid))
            .count()
    }

    /// Times [`Transport::connect`] was called.
    pub fn connects(&self) -> usize {
        self.shared.state.lock().connects
    }

    /// Times [`Transport::disconnect`] was called.
    pub fn disconnects(&self) -> usize {
        self.shared.state.lock().disconnects
    }

    /// Wait until at least `n` `operation` requests were received.
    ///
    /// Returns false if that does not happen within an hour of (virtual)
    /// time.
    pub async fn wait_for(&self, operation: Operation, n: usize) -> bool {
        let reached = async {
            loop {
                let activity = self.shared.activity.notified();
                tokio::pin!(activity);
                activity.as_mut().enable();
                if self.count(operation) >= n {
                    return;
                }
                activity.await;
            }
        };
        tokio::time::timeout(WAIT_LIMIT, reached).await.is_ok()
    }
}

fn subject(payload: &Value, field: &str) -> Result<UserId, String> {
    payload.get(field).and_then(Value::as_i64).ok_or_else(|| format!("missing {field}"))
}

#[async_trait]
impl Transport for SimTransport {
    fn connect(&self) {
        let auto_open = {
            let mut state = self.shared.state.lock();
            state.connects += 1;
            state.auto_open
        };
        if auto_open {
            self.open();
        }
    }

    fn disconnect(&self) {
        self.shared.state.lock().disconnects += 1;
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            self.emit(TransportEvent::Close);
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }

    async fn request(&self, operation: Operation, payload: Value) -> Result<Value, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let next = {
            let mut state = self.shared.state.lock();
            state.requests.push(RecordedRequest { operation, payload: payload.clone() });
            if let Some(reply) = state.scripted.get_mut(&operation).and_then(VecDeque::pop_front) {
                Next::Scripted(reply)
            } else if let Some(responder) = state.responders.get(&operation) {
                Next::Respond(Arc::clone(responder))
            } else {
                Next::Missing
            }
        };
        self.shared.activity.notify_waiters();

        let result = match next {
            Next::Scripted(Reply::Data(data)) => Ok(data),
            Next::Scripted(Reply::Fail(message)) => Err(message),
            Next::Scripted(Reply::Held(rx)) => match rx.await {
                Ok(result) => result,
                Err(_) => return Err(TransportError::Closed(operation)),
            },
            Next::Respond(responder) => responder(&payload),
            Next::Missing => Err(format!("no reply scripted for {operation}")),
        };
        result.map_err(|message| TransportError::Request { operation, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requests_fail_while_closed() {
        let sim = SimTransport::new();
        sim.reply(Operation::SetClientId, Value::Null);

        let result = sim.request(Operation::SetClientId, Value::Null).await;

        assert_eq!(result, Err(TransportError::NotConnected));
        assert!(sim.requests().is_empty());
    }

    #[tokio::test]
    async fn scripted_replies_take_precedence_over_responder() {
        let sim = SimTransport::new();
        sim.open();
        sim.reply(Operation::Login, json!("persistent"));
        sim.reply_once(Operation::Login, json!("once"));

        assert_eq!(sim.request(Operation::Login, Value::Null).await, Ok(json!("once")));
        assert_eq!(sim.request(Operation::Login, Value::Null).await, Ok(json!("persistent")));
        assert_eq!(sim.count(Operation::Login), 2);
    }

    #[tokio::test]
    async fn unscripted_operation_fails() {
        let sim = SimTransport::new();
        sim.open();

        let result = sim.request(Operation::GetDanmaku, json!({"liverUID": 1})).await;

        assert!(matches!(result, Err(TransportError::Request { operation: Operation::GetDanmaku, .. })));
        assert_eq!(sim.count_for(Operation::GetDanmaku, 1), 1);
    }

    #[tokio::test]
    async fn held_reply_resolves_later() {
        let sim = SimTransport::new();
        sim.open();
        let held = sim.hold(Operation::GetUserInfo);

        let pending = tokio::spawn({
            let sim = sim.clone();
            async move { sim.request(Operation::GetUserInfo, json!({"userID": 5})).await }
        });
        assert!(sim.wait_for(Operation::GetUserInfo, 1).await);
        held.resolve(json!({"userID": 5}));

        assert_eq!(pending.await.unwrap(), Ok(json!({"userID": 5})));
    }

    #[tokio::test]
    async fn live_backend_opens_on_connect_and_loops_back_forwards() {
        let sim = SimTransport::live_backend();
        let mut events = sim.subscribe();

        sim.connect();
        assert_eq!(events.recv().await.unwrap(), TransportEvent::Open);

        sim.request(Operation::RequestForward, json!({"clientID": "a", "message": "{}"}))
            .await
            .unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            TransportEvent::ReceiveForward { client_id: "a".into(), message: "{}".into() }
        );
    }
}
