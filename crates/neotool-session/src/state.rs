//! Mutable session state and its published mirrors.
//!
//! [`Core`] is the single source of truth, guarded by one mutex so that every
//! "check precondition, then commit" step is atomic. After each commit the
//! observable [`Published`] signals are brought up to date; a signal only
//! notifies when its value actually changed.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use neotool_core::{
    SessionState, Signal, UserId,
    types::{LoginData, StreamInfo, TokenInfo, UserInfo},
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::{config::SessionConfig, generation::Generation};

/// Registration of the single acquisition loop allowed per liver.
#[derive(Debug, Clone)]
pub(crate) struct Acquisition {
    id: u64,
    generation: u64,
    cancel: CancellationToken,
    wake: Arc<Notify>,
}

impl Acquisition {
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// False once released, withdrawn or its generation retired.
    pub(crate) fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn wake(&self) -> &Notify {
        &self.wake
    }
}

pub(crate) struct Core<I> {
    pub generation: Generation,
    pub connected_at: Option<I>,
    pub session: SessionState,
    /// Cancelled by teardown; scopes loops that are not generation bound.
    pub scope: CancellationToken,
    pub liver_uid: Option<UserId>,
    pub login_data: Option<LoginData>,
    pub token: Option<TokenInfo>,
    pub user_info: HashMap<UserId, UserInfo>,
    pub streams: HashMap<UserId, StreamInfo>,
    pub desired: BTreeSet<UserId>,
    acquisitions: HashMap<UserId, Acquisition>,
    next_acquisition: u64,
}

impl<I> Core<I> {
    pub(crate) fn new(config: &SessionConfig) -> Self {
        Self {
            generation: Generation::initial(),
            connected_at: None,
            session: SessionState::new(),
            scope: CancellationToken::new(),
            liver_uid: config.liver_uid,
            login_data: config.login_data.clone(),
            token: config.token.clone(),
            user_info: HashMap::new(),
            streams: HashMap::new(),
            desired: BTreeSet::new(),
            acquisitions: HashMap::new(),
            next_acquisition: 0,
        }
    }

    /// Register a new acquisition loop for `uid`, or wake the one already
    /// running for the current generation.
    ///
    /// Only reconciliation reaches the wake path: a repeated
    /// `get_danmaku_repeatedly` for a desired liver returns before claiming.
    ///
    /// Returns `None` when no loop should be spawned: either one exists, or
    /// there is no live connection to bind a new one to.
    pub(crate) fn claim_acquisition(&mut self, uid: UserId) -> Option<Acquisition> {
        if let Some(existing) = self.acquisitions.get(&uid) {
            if existing.generation == self.generation.id() && existing.is_active() {
                existing.wake.notify_one();
                return None;
            }
        }
        if self.generation.is_retired() {
            return None;
        }

        self.next_acquisition += 1;
        let acquisition = Acquisition {
            id: self.next_acquisition,
            generation: self.generation.id(),
            cancel: self.generation.child_token(),
            wake: Arc::new(Notify::new()),
        };
        self.acquisitions.insert(uid, acquisition.clone());
        Some(acquisition)
    }

    /// Deregister `acquisition` if it is still the registered loop for `uid`.
    pub(crate) fn release_acquisition(&mut self, uid: UserId, acquisition: &Acquisition) {
        if self.acquisitions.get(&uid).is_some_and(|current| current.id == acquisition.id) {
            self.acquisitions.remove(&uid);
        }
        acquisition.cancel.cancel();
    }

    /// End `acquisition` along with whatever loop is registered for `uid`.
    ///
    /// Used once a reply settles the liver's stream, so a loop registered
    /// after a withdraw-and-redeclare does not ask again.
    pub(crate) fn settle_acquisition(&mut self, uid: UserId, acquisition: &Acquisition) {
        if let Some(registered) = self.acquisitions.remove(&uid) {
            registered.cancel.cancel();
        }
        acquisition.cancel.cancel();
    }

    /// Withdraw intent for `uid`, cancelling its acquisition loop.
    ///
    /// Returns false if the liver was not desired.
    pub(crate) fn withdraw(&mut self, uid: UserId) -> bool {
        if let Some(acquisition) = self.acquisitions.remove(&uid) {
            acquisition.cancel.cancel();
        }
        self.desired.remove(&uid)
    }

    /// Cache `info`, reporting whether anything changed.
    pub(crate) fn cache_user_info(&mut self, uid: UserId, info: &UserInfo) -> bool {
        if self.user_info.get(&uid) == Some(info) {
            return false;
        }
        self.user_info.insert(uid, info.clone());
        true
    }

    pub(crate) fn has_acquisition(&self, uid: UserId) -> bool {
        self.acquisitions.get(&uid).is_some_and(Acquisition::is_active)
    }

    /// Drop everything tied to the current connection lifetime. The desired
    /// set survives.
    pub(crate) fn disconnect(&mut self) {
        self.generation.retire();
        self.session = self.session.disconnect();
        self.connected_at = None;
        self.token = None;
        self.streams.clear();
        self.acquisitions.clear();
    }
}

/// Read-only mirrors of [`Core`] handed out to observers.
pub(crate) struct Published {
    pub state: Signal<SessionState>,
    pub liver_uid: Signal<Option<UserId>>,
    pub login_data: Signal<Option<LoginData>>,
    pub token: Signal<Option<TokenInfo>>,
    pub user_info: Signal<HashMap<UserId, UserInfo>>,
    pub streams: Signal<HashMap<UserId, StreamInfo>>,
    pub desired: Signal<BTreeSet<UserId>>,
}

impl Published {
    pub(crate) fn new<I>(core: &Core<I>) -> Self {
        Self {
            state: Signal::new(core.session),
            liver_uid: Signal::new(core.liver_uid),
            login_data: Signal::new(core.login_data.clone()),
            token: Signal::new(core.token.clone()),
            user_info: Signal::new(core.user_info.clone()),
            streams: Signal::new(core.streams.clone()),
            desired: Signal::new(core.desired.clone()),
        }
    }

    pub(crate) fn publish<I>(&self, core: &Core<I>) {
        mirror(&self.state, &core.session);
        mirror(&self.liver_uid, &core.liver_uid);
        mirror(&self.login_data, &core.login_data);
        mirror(&self.token, &core.token);
        mirror(&self.user_info, &core.user_info);
        mirror(&self.streams, &core.streams);
        mirror(&self.desired, &core.desired);
    }
}

fn mirror<T: Clone + PartialEq>(signal: &Signal<T>, value: &T) {
    signal.update_if(|current| {
        if current == value {
            return false;
        }
        current.clone_from(value);
        true
    });
}
