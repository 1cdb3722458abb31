//! In-process broadcast bus.
//!
//! Two broadcast channels: named [`Event`]s flowing out to mini-apps and
//! [`Request`]s flowing back in. Every event kind that can be asked for has a
//! paired `<name>-request` wire name.
//!
//! Listeners filter on the event kind and optionally on a [`Key`] (the app id
//! or the user id the event concerns). A lagging listener skips the missed
//! events and keeps going.

use std::{fmt, time::Duration};

use neotool_core::{
    SessionState, UserId,
    types::{Comment, Danmaku, Gift, UserInfo},
};
use neotool_session::Envelope;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::broadcast::{self, error::RecvError, error::TryRecvError},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::app::{AppConfig, AppData};

/// Default number of buffered events per channel.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Bus sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// Events buffered per channel before slow listeners start lagging
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { capacity: DEFAULT_BUS_CAPACITY }
    }
}

/// Names of the events carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// App config answer
    AppConfig,
    /// App data answer or change
    AppData,
    /// Something failed
    Error,
    /// Backend connection opened
    ConnectBackend,
    /// Backend connection closed
    DisconnectBackend,
    /// Session flags
    BackendState,
    /// Current liver focus
    LiverUid,
    /// User profile
    UserInfo,
    /// Stream attached
    GetDanmaku,
    /// Stream ended
    StopDanmaku,
    /// Viewer comment
    Danmaku,
    /// Viewer gift
    Gift,
    /// Forwarded peer message
    ReceiveMessage,
}

impl EventKind {
    /// Wire name of the event.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AppConfig => "appConfig",
            Self::AppData => "appData",
            Self::Error => "error",
            Self::ConnectBackend => "connectBackend",
            Self::DisconnectBackend => "disconnectBackend",
            Self::BackendState => "backendState",
            Self::LiverUid => "liverUID",
            Self::UserInfo => "userInfo",
            Self::GetDanmaku => "getDanmaku",
            Self::StopDanmaku => "stopDanmaku",
            Self::Danmaku => "danmaku",
            Self::Gift => "gift",
            Self::ReceiveMessage => "receiveMessage",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter key an event can be matched on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// A liver or viewer
    User(UserId),
    /// A mini-app id, or a message target
    App(String),
}

/// Event broadcast to mini-apps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum Event {
    /// Config of one app
    AppConfig(AppConfig),
    /// Data of one app
    AppData(AppData),
    /// Human-readable failure description
    Error(String),
    /// Backend connection opened
    ConnectBackend,
    /// Backend connection closed
    DisconnectBackend,
    /// Session flags, on every change and on request
    BackendState(SessionState),
    /// Liver focus, on every change and on request
    #[serde(rename = "liverUID")]
    LiverUid(Option<UserId>),
    /// User profile
    UserInfo(UserInfo),
    /// The stream of this liver was attached
    GetDanmaku(UserId),
    /// The stream of this liver ended
    StopDanmaku(UserId),
    /// Viewer comment
    Danmaku(Danmaku<Comment>),
    /// Viewer gift
    Gift(Danmaku<Gift>),
    /// Message forwarded by another client
    ReceiveMessage(Envelope),
}

impl Event {
    /// Kind of this event.
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::AppConfig(_) => EventKind::AppConfig,
            Self::AppData(_) => EventKind::AppData,
            Self::Error(_) => EventKind::Error,
            Self::ConnectBackend => EventKind::ConnectBackend,
            Self::DisconnectBackend => EventKind::DisconnectBackend,
            Self::BackendState(_) => EventKind::BackendState,
            Self::LiverUid(_) => EventKind::LiverUid,
            Self::UserInfo(_) => EventKind::UserInfo,
            Self::GetDanmaku(_) => EventKind::GetDanmaku,
            Self::StopDanmaku(_) => EventKind::StopDanmaku,
            Self::Danmaku(_) => EventKind::Danmaku,
            Self::Gift(_) => EventKind::Gift,
            Self::ReceiveMessage(_) => EventKind::ReceiveMessage,
        }
    }

    /// Filter key, if this kind of event has one.
    pub fn key(&self) -> Option<Key> {
        match self {
            Self::AppConfig(config) => Some(Key::App(config.id.clone())),
            Self::AppData(data) => Some(Key::App(data.id.clone())),
            Self::UserInfo(info) => Some(Key::User(info.user_id)),
            Self::GetDanmaku(uid) | Self::StopDanmaku(uid) => Some(Key::User(*uid)),
            Self::Danmaku(danmaku) => Some(Key::User(danmaku.liver_uid)),
            Self::Gift(danmaku) => Some(Key::User(danmaku.liver_uid)),
            Self::ReceiveMessage(envelope) => Some(Key::App(envelope.target.clone())),
            Self::Error(_)
            | Self::ConnectBackend
            | Self::DisconnectBackend
            | Self::BackendState(_)
            | Self::LiverUid(_) => None,
        }
    }
}

/// Request broadcast by mini-apps for the event handler to act on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", content = "payload", rename_all = "camelCase")]
pub enum Request {
    /// Answer with the config of this app
    AppConfig(String),
    /// Answer with the data of this app
    AppData(String),
    /// Answer with the session flags
    BackendState,
    /// Answer with the liver focus
    #[serde(rename = "liverUID")]
    LiverUid,
    /// Fetch and answer with this user's profile
    UserInfo(UserId),
    /// Keep the stream of this liver attached
    GetDanmaku(UserId),
    /// Stop keeping the stream of this liver attached
    StopDanmaku(UserId),
    /// Forward a message to another client
    SendMessage {
        /// Receiving client
        #[serde(rename = "clientID")]
        client_id: String,
        /// Message to deliver
        message: Envelope,
    },
}

impl Request {
    /// Wire name of the request.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AppConfig(_) => "appConfig-request",
            Self::AppData(_) => "appData-request",
            Self::BackendState => "backendState-request",
            Self::LiverUid => "liverUID-request",
            Self::UserInfo(_) => "userInfo-request",
            Self::GetDanmaku(_) => "getDanmaku-request",
            Self::StopDanmaku(_) => "stopDanmaku-request",
            Self::SendMessage { .. } => "sendMessage-request",
        }
    }
}

/// Broadcast bus shared by the event handler and mini-apps.
#[derive(Debug, Clone)]
pub struct Bus {
    events: broadcast::Sender<Event>,
    requests: broadcast::Sender<Request>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl Bus {
    /// Create a bus.
    pub fn new(config: BusConfig) -> Self {
        let capacity = config.capacity.max(1);
        let (events, _) = broadcast::channel(capacity);
        let (requests, _) = broadcast::channel(capacity);
        Self { events, requests }
    }

    /// Broadcast an event. Returns how many listeners will see it.
    pub fn emit(&self, event: Event) -> usize {
        tracing::trace!(event = %event.kind(), "emit");
        self.events.send(event).unwrap_or(0)
    }

    /// Listen to every event of `kind`.
    pub fn listen(&self, kind: EventKind) -> Listener {
        Listener { rx: self.events.subscribe(), kind, key: None }
    }

    /// Listen to events of `kind` concerning `key` only.
    pub fn listen_for(&self, kind: EventKind, key: Key) -> Listener {
        Listener { rx: self.events.subscribe(), kind, key: Some(key) }
    }

    /// Broadcast a request. Returns how many handlers will see it.
    pub fn request(&self, request: Request) -> usize {
        tracing::trace!(request = request.name(), "request");
        self.requests.send(request).unwrap_or(0)
    }

    /// Receive every request.
    pub fn requests(&self) -> broadcast::Receiver<Request> {
        self.requests.subscribe()
    }

    /// Send `request` now and then every `interval` until the returned handle
    /// is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn request_repeatedly(&self, request: Request, interval: Duration) -> RepeatHandle {
        let bus = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                bus.request(request.clone());
            }
        });
        RepeatHandle { task }
    }
}

/// Filtered receiver of bus events.
#[derive(Debug)]
pub struct Listener {
    rx: broadcast::Receiver<Event>,
    kind: EventKind,
    key: Option<Key>,
}

impl Listener {
    /// Kind this listener accepts.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    fn accepts(&self, event: &Event) -> bool {
        event.kind() == self.kind
            && self.key.as_ref().is_none_or(|key| event.key().as_ref() == Some(key))
    }

    /// Next matching event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => {},
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(event = %self.kind, skipped, "bus listener lagged");
                },
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already buffered, if any.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) | Err(TryRecvError::Lagged(_)) => {},
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

/// Periodic request started by [`Bus::request_repeatedly`]. Stops on drop.
#[derive(Debug)]
pub struct RepeatHandle {
    task: JoinHandle<()>,
}

impl RepeatHandle {
    /// Stop repeating.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for RepeatHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn comment(liver_uid: UserId, content: &str) -> Event {
        Event::Danmaku(Danmaku {
            liver_uid,
            data: Comment { content: content.to_string(), ..Comment::default() },
        })
    }

    #[test]
    fn listener_filters_by_kind_and_key() {
        let bus = Bus::default();
        let mut all = bus.listen(EventKind::Danmaku);
        let mut only_2 = bus.listen_for(EventKind::Danmaku, Key::User(2));

        bus.emit(Event::ConnectBackend);
        bus.emit(comment(1, "first"));
        bus.emit(comment(2, "second"));

        assert_eq!(all.try_recv(), Some(comment(1, "first")));
        assert_eq!(all.try_recv(), Some(comment(2, "second")));
        assert_eq!(all.try_recv(), None);
        assert_eq!(only_2.try_recv(), Some(comment(2, "second")));
        assert_eq!(only_2.try_recv(), None);
    }

    #[test]
    fn emit_without_listeners_is_not_an_error() {
        let bus = Bus::default();

        assert_eq!(bus.emit(Event::DisconnectBackend), 0);
        assert_eq!(bus.request(Request::BackendState), 0);
    }

    #[test]
    fn lagging_listener_skips_ahead() {
        let bus = Bus::new(BusConfig { capacity: 2 });
        let mut listener = bus.listen(EventKind::StopDanmaku);

        for uid in 1..=5 {
            bus.emit(Event::StopDanmaku(uid));
        }

        assert_eq!(listener.try_recv(), Some(Event::StopDanmaku(4)));
        assert_eq!(listener.try_recv(), Some(Event::StopDanmaku(5)));
    }

    #[test]
    fn request_names_pair_with_event_names() {
        assert_eq!(Request::LiverUid.name(), format!("{}-request", EventKind::LiverUid));
        assert_eq!(Request::GetDanmaku(1).name(), format!("{}-request", EventKind::GetDanmaku));
        let send = Request::SendMessage {
            client_id: "c".into(),
            message: Envelope::new("t", "k", json!(null)),
        };
        assert_eq!(send.name(), "sendMessage-request");
    }

    #[test]
    fn events_serialize_with_wire_names() {
        let json = serde_json::to_value(Event::LiverUid(Some(7))).unwrap();
        assert_eq!(json, json!({"event": "liverUID", "payload": 7}));

        let json = serde_json::to_value(Request::SendMessage {
            client_id: "overlay".into(),
            message: Envelope::new("sticker", "clear", json!(null)),
        })
        .unwrap();
        assert_eq!(
            json,
            json!({
                "request": "sendMessage",
                "payload": {
                    "clientID": "overlay",
                    "message": {"target": "sticker", "type": "clear", "data": null},
                },
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn request_repeatedly_fires_until_dropped() {
        let bus = Bus::default();
        let mut requests = bus.requests();

        let handle = bus.request_repeatedly(Request::UserInfo(3), Duration::from_secs(10));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(requests.try_recv().ok(), Some(Request::UserInfo(3)));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(requests.try_recv().ok(), Some(Request::UserInfo(3)));

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(requests.try_recv().is_err());
    }
}
