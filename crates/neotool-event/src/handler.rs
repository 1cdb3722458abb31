//! Session-to-bus adapter.
//!
//! ```text
//!   ConnectionManager ──signals / transport events / errors──▶ Bus events
//!   ConnectionManager ◀──────────── dispatcher ◀────────────── Bus requests
//! ```
//!
//! Nothing is spawned until [`EventHandler::init`]; [`EventHandler::cleanup`]
//! (also run on drop) stops every forwarder.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use neotool_core::{Environment, Store, Subscription, UserId};
use neotool_session::{ConnectionManager, Envelope, SessionError, Transport, TransportEvent};
use parking_lot::Mutex;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};

use crate::{
    app::{self, AppConfig, AppData, AppRegistry},
    bus::{Bus, Event, Request},
    error::EventError,
};

/// Everything the forwarders and the dispatcher need, cheap to clone.
struct Context<T: Transport, E: Environment> {
    manager: ConnectionManager<T, E>,
    bus: Bus,
    apps: Arc<Mutex<AppRegistry>>,
    store: Option<Arc<dyn Store>>,
}

impl<T: Transport, E: Environment> Clone for Context<T, E> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            bus: self.bus.clone(),
            apps: Arc::clone(&self.apps),
            store: self.store.clone(),
        }
    }
}

impl<T: Transport, E: Environment> Context<T, E> {
    fn emit_error(&self, err: &impl std::fmt::Display) {
        self.bus.emit(Event::Error(err.to_string()));
    }

    fn set_app_enabled(&self, id: &str, enable: bool) -> Result<AppData, EventError> {
        let (data, list) = {
            let mut apps = self.apps.lock();
            let data = apps.set_enabled(id, enable)?;
            (data, apps.data_list())
        };
        if let Some(store) = &self.store {
            app::save_app_data(store.as_ref(), &list)?;
        }
        tracing::info!(app = id, enable, "app switched");
        self.bus.emit(Event::AppData(data.clone()));
        Ok(data)
    }

    fn dispatch(&self, request: Request) {
        tracing::debug!(request = request.name(), "dispatching");
        match request {
            Request::AppConfig(id) => {
                let config = self.apps.lock().config(&id).cloned();
                match config {
                    Some(config) => self.emit(Event::AppConfig(config)),
                    None => self.emit_error(&EventError::UnknownApp(id)),
                }
            },
            Request::AppData(id) => {
                let data = self.apps.lock().data(&id);
                match data {
                    Some(data) => self.emit(Event::AppData(data)),
                    None => self.emit_error(&EventError::UnknownApp(id)),
                }
            },
            Request::BackendState => self.emit(Event::BackendState(self.manager.state())),
            Request::LiverUid => self.emit(Event::LiverUid(self.manager.liver_uid())),
            Request::UserInfo(uid) => {
                let ctx = self.clone();
                tokio::spawn(async move {
                    match ctx.manager.fetch_user_info(uid).await {
                        Ok(info) => ctx.emit(Event::UserInfo(info)),
                        Err(err) => ctx.emit_error(&err),
                    }
                });
            },
            Request::GetDanmaku(uid) => self.report(self.manager.get_danmaku_repeatedly(uid)),
            Request::StopDanmaku(uid) => self.report(self.manager.stop_danmaku_repeatedly(uid)),
            Request::SendMessage { client_id, message } => {
                self.report(self.manager.send_message_repeatedly(client_id, &message));
            },
        }
    }

    fn emit(&self, event: Event) {
        self.bus.emit(event);
    }

    fn report(&self, result: Result<(), SessionError>) {
        if let Err(err) = result {
            self.emit_error(&err);
        }
    }

    fn forward(&self, event: TransportEvent) {
        let event = match event {
            TransportEvent::Open => Event::ConnectBackend,
            TransportEvent::Close => Event::DisconnectBackend,
            TransportEvent::UserInfo(info) => Event::UserInfo(info),
            TransportEvent::DanmakuStop { liver_uid }
            | TransportEvent::DanmakuStopError { liver_uid, .. } => Event::StopDanmaku(liver_uid),
            TransportEvent::Comment(danmaku) => Event::Danmaku(danmaku),
            TransportEvent::Gift(danmaku) => Event::Gift(danmaku),
            TransportEvent::ReceiveForward { message, .. } => {
                match serde_json::from_str::<Envelope>(&message) {
                    Ok(envelope) => Event::ReceiveMessage(envelope),
                    Err(err) => Event::Error(format!("undecodable forwarded message: {err}")),
                }
            },
            TransportEvent::Error { .. } | TransportEvent::Login | TransportEvent::SetToken => {
                return;
            },
        };
        self.emit(event);
    }
}

/// Receive from `rx` until it closes, skipping over lag.
async fn drain<V: Clone>(mut rx: broadcast::Receiver<V>, name: &'static str, mut f: impl FnMut(V)) {
    loop {
        match rx.recv().await {
            Ok(value) => f(value),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(channel = name, skipped, "event handler lagged");
            },
            Err(RecvError::Closed) => return,
        }
    }
}

/// Bridges a [`ConnectionManager`] and a [`Bus`].
///
/// Republishes session state and backend pushes as bus events and serves bus
/// requests by calling the manager.
pub struct EventHandler<T: Transport, E: Environment> {
    ctx: Context<T, E>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    initialized: AtomicBool,
}

impl<T: Transport, E: Environment> EventHandler<T, E> {
    /// Create a handler for the installed apps `configs` with their stored
    /// `data`.
    pub fn new(
        manager: ConnectionManager<T, E>,
        bus: Bus,
        configs: Vec<AppConfig>,
        data: Vec<AppData>,
    ) -> Self {
        let apps = Arc::new(Mutex::new(AppRegistry::new(configs, data)));
        Self {
            ctx: Context { manager, bus, apps, store: None },
            tasks: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Persist app switches to `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.ctx.store = Some(store);
        self
    }

    /// App data previously persisted by [`Self::set_app_enabled`].
    pub fn load_app_data(store: &dyn Store) -> Result<Vec<AppData>, EventError> {
        app::load_app_data(store)
    }

    /// Bus this handler publishes on.
    pub fn bus(&self) -> &Bus {
        &self.ctx.bus
    }

    /// Start forwarding and serving requests. Calling it again is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn init(&self) {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return;
        }
        let manager = &self.ctx.manager;

        let ctx = self.ctx.clone();
        let state =
            manager.state_signal().subscribe(move |state| ctx.emit(Event::BackendState(state)));

        let ctx = self.ctx.clone();
        let liver = manager.liver_uid_signal().subscribe(move |uid| ctx.emit(Event::LiverUid(uid)));

        let ctx = self.ctx.clone();
        let mut attached = HashSet::<UserId>::new();
        let streams = manager.stream_info_signal().subscribe(move |streams| {
            for &uid in streams.keys() {
                if !attached.contains(&uid) {
                    ctx.emit(Event::GetDanmaku(uid));
                }
            }
            attached = streams.keys().copied().collect();
        });
        self.subscriptions.lock().extend([state, liver, streams]);

        let ctx = self.ctx.clone();
        let errors =
            tokio::spawn(drain(manager.on_error(), "errors", move |err| ctx.emit_error(&err)));

        let ctx = self.ctx.clone();
        let pushes =
            tokio::spawn(drain(manager.transport_events(), "transport", move |e| ctx.forward(e)));

        let ctx = self.ctx.clone();
        let requests =
            tokio::spawn(drain(self.ctx.bus.requests(), "requests", move |r| ctx.dispatch(r)));

        self.tasks.lock().extend([errors, pushes, requests]);
        tracing::debug!("event handler initialized");
    }

    /// Whether [`Self::init`] ran and [`Self::cleanup`] has not since.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Current data of app `id`.
    pub fn app_data(&self, id: &str) -> Option<AppData> {
        self.ctx.apps.lock().data(id)
    }

    /// Enable or disable app `id`, persist the switch and broadcast the new
    /// data.
    ///
    /// A failed save leaves the in-memory switch flipped.
    pub fn set_app_enabled(&self, id: &str, enable: bool) -> Result<AppData, EventError> {
        self.ctx.set_app_enabled(id, enable)
    }

    /// Stop every forwarder and the request dispatcher.
    pub fn cleanup(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.subscriptions.lock().clear();
        self.initialized.store(false, Ordering::Release);
    }
}

impl<T: Transport, E: Environment> Drop for EventHandler<T, E> {
    fn drop(&mut self) {
        self.cleanup();
    }
}
