//! The connection manager.
//!
//! One [`ConnectionManager`] owns one logical backend connection. Transport
//! lifecycle events are consumed by a single event-loop task in emission
//! order; everything else (handshake steps, stream acquisition, message
//! delivery) runs as detached retry loops that re-validate their
//! preconditions against the shared state around every await.
//!
//! ```text
//!  Transport ──events──> event loop ──open──> set client id loop
//!                            │         └───> login loop ──commit──> reconcile
//!                            │                                          │
//!                            ├──close/error──> retire generation        ↓
//!                            └──danmakuStop──> drop stream ──> acquisition loops
//! ```

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use neotool_core::{
    Environment, Readable, SessionState, UserId,
    types::{LoginData, StreamInfo, TokenInfo, UserInfo, is_valid_user_id},
};
use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    sync::{
        Notify,
        broadcast::{self, error::RecvError},
    },
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::SessionConfig,
    error::SessionError,
    generation::Generation,
    message::{Envelope, MessageStream},
    request::{ForwardRequest, UserInfoRequest},
    state::{Core, Published},
    transport::{Operation, Transport, TransportEvent},
};

const ERROR_CHANNEL_CAPACITY: usize = 64;

/// Shared state behind every clone of a [`ConnectionManager`] and every task
/// it spawns.
pub(crate) struct Inner<T: Transport, E: Environment> {
    pub transport: T,
    pub env: E,
    pub client_id: String,
    retry_interval: Duration,
    core: Mutex<Core<E::Instant>>,
    published: Published,
    errors: broadcast::Sender<SessionError>,
}

impl<T: Transport, E: Environment> Inner<T, E> {
    /// Mutate the state atomically, then publish the result.
    pub(crate) fn commit<R>(&self, f: impl FnOnce(&mut Core<E::Instant>) -> R) -> R {
        let mut core = self.core.lock();
        let result = f(&mut core);
        self.published.publish(&core);
        result
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&Core<E::Instant>) -> R) -> R {
        f(&self.core.lock())
    }

    /// Whether `generation` is the current, open connection lifetime.
    pub(crate) fn is_live(&self, core: &Core<E::Instant>, generation: &Generation) -> bool {
        self.transport.is_connected()
            && core.generation.is(generation)
            && core.session.is_connected()
    }

    pub(crate) fn notify_error(&self, err: SessionError) {
        tracing::warn!(error = %err, "session operation failed");
        let _ = self.errors.send(err);
    }

    pub(crate) async fn request<Q, R>(
        &self,
        operation: Operation,
        payload: &Q,
    ) -> Result<R, SessionError>
    where
        Q: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let context = operation.as_str();
        let payload =
            serde_json::to_value(payload).map_err(|e| SessionError::payload(context, &e))?;
        tracing::debug!(%operation, "backend request");
        let response = self.transport.request(operation, payload).await?;
        serde_json::from_value(response).map_err(|e| SessionError::payload(context, &e))
    }

    /// Wait one retry interval.
    ///
    /// Returns early with `true` when woken, or with `false` once `cancel`
    /// fires, in which case the loop must exit.
    pub(crate) async fn pause(&self, cancel: &CancellationToken, wake: Option<&Notify>) -> bool {
        let woken = async {
            match wake {
                Some(notify) => notify.notified().await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            () = cancel.cancelled() => false,
            () = self.env.sleep(self.retry_interval) => true,
            () = woken => true,
        }
    }

    async fn run_events(self: Arc<Self>, mut events: broadcast::Receiver<TransportEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_event(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "transport event stream lagged");
                    self.resync();
                },
                Err(RecvError::Closed) => {
                    tracing::debug!("transport event stream closed");
                    return;
                },
            }
        }
    }

    fn handle_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Close => self.on_disconnect("close"),
            TransportEvent::Error { message } => self.on_disconnect(&message),
            TransportEvent::DanmakuStop { liver_uid }
            | TransportEvent::DanmakuStopError { liver_uid, .. } => self.on_danmaku_stop(liver_uid),
            TransportEvent::Login
            | TransportEvent::SetToken
            | TransportEvent::ReceiveForward { .. }
            | TransportEvent::Comment(_)
            | TransportEvent::Gift(_)
            | TransportEvent::UserInfo(_) => {},
        }
    }

    /// Lifecycle events may have been skipped; line the state up with the
    /// transport again.
    fn resync(self: &Arc<Self>) {
        let believed = self.read(|core| core.session.is_connected());
        match (self.transport.is_connected(), believed) {
            (true, false) => self.on_open(),
            (false, true) => self.on_disconnect("lagged"),
            _ => {},
        }
    }

    fn teardown(&self) {
        self.commit(|core| {
            core.disconnect();
            core.desired.clear();
            core.scope.cancel();
            core.scope = CancellationToken::new();
        });
        self.transport.disconnect();
        tracing::info!(client_id = %self.client_id, "session closed");
    }

    async fn send_repeatedly(self: Arc<Self>, request: ForwardRequest, scope: CancellationToken) {
        loop {
            let ready = self.read(|core| {
                self.is_live(core, &core.generation) && core.session.has_client_id()
            });
            if ready {
                let sent: Result<serde::de::IgnoredAny, _> =
                    self.request(Operation::RequestForward, &request).await;
                match sent {
                    Ok(_) => {
                        tracing::debug!(client_id = %request.client_id, "message forwarded");
                        return;
                    },
                    Err(err) => self.notify_error(err),
                }
            }
            if !self.pause(&scope, None).await {
                return;
            }
        }
    }
}

fn check_liver_uid(liver_uid: UserId) -> Result<(), SessionError> {
    if is_valid_user_id(liver_uid) { Ok(()) } else { Err(SessionError::InvalidLiverUid(liver_uid)) }
}

/// Owner of one logical backend connection.
///
/// Cheap to clone; all clones share the same state. Every operation may be
/// called at any time, including before [`ConnectionManager::connect`] and
/// while disconnected: intent is recorded and fulfilled once the connection
/// allows it.
pub struct ConnectionManager<T: Transport, E: Environment> {
    inner: Arc<Inner<T, E>>,
}

impl<T: Transport, E: Environment> Clone for ConnectionManager<T, E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Transport, E: Environment> ConnectionManager<T, E> {
    /// Create a manager. Nothing happens until [`Self::connect`].
    pub fn new(transport: T, env: E, config: SessionConfig) -> Self {
        let core = Core::new(&config);
        let published = Published::new(&core);
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        let inner = Inner {
            transport,
            env,
            client_id: config.client_id,
            retry_interval: config.retry_interval,
            core: Mutex::new(core),
            published,
            errors,
        };
        Self { inner: Arc::new(inner) }
    }

    /// Start the event loop and open the transport.
    ///
    /// The returned handle tears the session down when closed or dropped.
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) -> SessionHandle<T, E> {
        let events = self.inner.transport.subscribe();
        let task = tokio::spawn(Arc::clone(&self.inner).run_events(events));
        self.inner.transport.connect();
        tracing::info!(client_id = %self.inner.client_id, "session connecting");
        SessionHandle { inner: Arc::clone(&self.inner), events: Some(task) }
    }

    /// Forwarding id registered with the backend.
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// Id of the current connection lifetime; 0 before the first open.
    pub fn generation(&self) -> u64 {
        self.inner.read(|core| core.generation.id())
    }

    /// Current handshake flags.
    pub fn state(&self) -> SessionState {
        self.inner.read(|core| core.session)
    }

    /// Observable handshake flags.
    pub fn state_signal(&self) -> Readable<SessionState> {
        self.inner.published.state.readable()
    }

    /// Currently focused liver.
    pub fn liver_uid(&self) -> Option<UserId> {
        self.inner.read(|core| core.liver_uid)
    }

    /// Focus a liver.
    pub fn set_liver_uid(&self, liver_uid: UserId) -> Result<(), SessionError> {
        check_liver_uid(liver_uid)?;
        self.inner.commit(|core| core.liver_uid = Some(liver_uid));
        Ok(())
    }

    /// Observable focused liver.
    pub fn liver_uid_signal(&self) -> Readable<Option<UserId>> {
        self.inner.published.liver_uid.readable()
    }

    /// Credentials used by the next fresh login.
    pub fn login_data(&self) -> Option<LoginData> {
        self.inner.read(|core| core.login_data.clone())
    }

    /// Replace the credentials. Takes effect on the next fresh login.
    pub fn set_login_data(&self, login_data: Option<LoginData>) {
        self.inner.commit(|core| core.login_data = login_data);
    }

    /// Observable credentials.
    pub fn login_data_signal(&self) -> Readable<Option<LoginData>> {
        self.inner.published.login_data.readable()
    }

    /// Token of the current connection, if logged in.
    pub fn token(&self) -> Option<TokenInfo> {
        self.inner.read(|core| core.token.clone())
    }

    /// Observable token.
    pub fn token_signal(&self) -> Readable<Option<TokenInfo>> {
        self.inner.published.token.readable()
    }

    /// Cached profile of `uid`.
    pub fn user_info(&self, uid: UserId) -> Option<UserInfo> {
        self.inner.read(|core| core.user_info.get(&uid).cloned())
    }

    /// Observable profile cache.
    pub fn user_info_signal(&self) -> Readable<HashMap<UserId, UserInfo>> {
        self.inner.published.user_info.readable()
    }

    /// Active stream of `liver_uid`.
    pub fn stream_info(&self, liver_uid: UserId) -> Option<StreamInfo> {
        self.inner.read(|core| core.streams.get(&liver_uid).cloned())
    }

    /// Observable active-stream map.
    pub fn stream_info_signal(&self) -> Readable<HashMap<UserId, StreamInfo>> {
        self.inner.published.streams.readable()
    }

    /// Whether danmaku of `liver_uid` is flowing on this connection.
    pub fn is_getting_danmaku(&self, liver_uid: UserId) -> bool {
        self.inner.read(|core| core.streams.contains_key(&liver_uid))
    }

    /// Whether `liver_uid` is in the desired-stream set.
    pub fn is_getting_danmaku_repeatedly(&self, liver_uid: UserId) -> bool {
        self.inner.read(|core| core.desired.contains(&liver_uid))
    }

    /// Whether an acquisition loop is currently registered for `liver_uid`.
    pub fn is_acquiring(&self, liver_uid: UserId) -> bool {
        self.inner.read(|core| core.has_acquisition(liver_uid))
    }

    /// Observable desired-stream set.
    pub fn desired_streams_signal(&self) -> Readable<BTreeSet<UserId>> {
        self.inner.published.desired.readable()
    }

    /// Subscribe to failures from inside retry loops.
    pub fn on_error(&self) -> broadcast::Receiver<SessionError> {
        self.inner.errors.subscribe()
    }

    /// Subscribe to raw transport events.
    pub fn transport_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.transport.subscribe()
    }

    /// Forwarded messages addressed to `target`.
    pub fn messages(&self, target: impl Into<String>) -> MessageStream {
        let events = self.inner.transport.subscribe();
        MessageStream::new(target.into(), events, self.inner.errors.clone())
    }

    /// Fetch a profile once, updating the cache if it changed.
    pub async fn fetch_user_info(&self, uid: UserId) -> Result<UserInfo, SessionError> {
        check_liver_uid(uid)?;
        self.inner.read(|core| core.session.check_logged_in())?;
        let info: UserInfo =
            self.inner.request(Operation::GetUserInfo, &UserInfoRequest { user_id: uid }).await?;
        self.inner.commit(|core| core.cache_user_info(uid, &info));
        Ok(info)
    }

    /// Keep the danmaku stream of `liver_uid` alive, across reconnects,
    /// until [`Self::stop_danmaku_repeatedly`].
    ///
    /// Idempotent: a call for a liver that is already desired does nothing,
    /// so it neither starts a second acquisition loop nor hurries the
    /// running one. Without a live connection only the intent is recorded;
    /// the loop starts after the next login.
    pub fn get_danmaku_repeatedly(&self, liver_uid: UserId) -> Result<(), SessionError> {
        check_liver_uid(liver_uid)?;
        let launch = self.inner.commit(|core| {
            if !core.desired.insert(liver_uid) || core.streams.contains_key(&liver_uid) {
                return None;
            }
            core.claim_acquisition(liver_uid)
        });
        if let Some(acquisition) = launch {
            self.inner.launch_acquisition(liver_uid, acquisition);
        }
        Ok(())
    }

    /// Withdraw the intent recorded by [`Self::get_danmaku_repeatedly`] and
    /// release the stream if it is active.
    pub fn stop_danmaku_repeatedly(&self, liver_uid: UserId) -> Result<(), SessionError> {
        check_liver_uid(liver_uid)?;
        self.inner.withdraw(liver_uid);
        Ok(())
    }

    /// Deliver `envelope` to the client `client_id`, retrying until the
    /// backend accepts it.
    ///
    /// Only a registered client id is required, not a login.
    pub fn send_message_repeatedly(
        &self,
        client_id: impl Into<String>,
        envelope: &Envelope,
    ) -> Result<(), SessionError> {
        let client_id = client_id.into();
        if client_id.is_empty() {
            return Err(SessionError::InvalidTarget(client_id));
        }
        envelope.validate()?;
        let request = ForwardRequest { client_id, message: envelope.encode()? };
        let scope = self.inner.read(|core| core.scope.clone());
        tokio::spawn(Arc::clone(&self.inner).send_repeatedly(request, scope));
        Ok(())
    }
}

/// Live session returned by [`ConnectionManager::connect`].
///
/// Closing (or dropping) it disconnects the transport, clears the token,
/// the stream map and the desired-stream set, and stops every loop.
pub struct SessionHandle<T: Transport, E: Environment> {
    inner: Arc<Inner<T, E>>,
    events: Option<JoinHandle<()>>,
}

impl<T: Transport, E: Environment> SessionHandle<T, E> {
    /// Tear the session down.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(events) = self.events.take() {
            events.abort();
            self.inner.teardown();
        }
    }
}

impl<T: Transport, E: Environment> Drop for SessionHandle<T, E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
