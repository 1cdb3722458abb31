//! Per-liver danmaku streams.
//!
//! The desired-stream set records which livers callers want; the active map
//! records which streams this connection actually has. Whenever a login
//! commits or the backend ends a stream, every desired liver missing from the
//! active map gets an acquisition loop. At most one loop per liver is
//! registered at a time, and every loop is bound to the generation it was
//! launched under.

use std::sync::Arc;

use neotool_core::{Environment, UserId, types::UserInfo};
use serde::de::IgnoredAny;

use crate::{
    error::SessionError,
    generation::Generation,
    manager::Inner,
    request::{DanmakuRequest, GetDanmakuResponse, UserInfoRequest},
    state::{Acquisition, Core},
    transport::{Operation, Transport},
};

/// What a `getDanmaku` reply did to the session.
enum Attach {
    /// Attach settled; `recorded` is false for an "already attached" reply
    /// without stream info.
    Done { recorded: bool },
    /// Recorded, but nobody wants the liver any more.
    Unwanted(Generation),
    /// Reply belongs to a retired connection.
    Stale,
}

impl<T: Transport, E: Environment> Inner<T, E> {
    /// Launch or wake an acquisition loop for every desired liver without
    /// an active stream.
    pub(crate) fn reconcile(self: &Arc<Self>) {
        let launches: Vec<(UserId, Acquisition)> = self.commit(|core| {
            let missing: Vec<UserId> = core
                .desired
                .iter()
                .copied()
                .filter(|uid| !core.streams.contains_key(uid))
                .collect();
            missing
                .into_iter()
                .filter_map(|uid| core.claim_acquisition(uid).map(|acquisition| (uid, acquisition)))
                .collect()
        });
        for (uid, acquisition) in launches {
            self.launch_acquisition(uid, acquisition);
        }
    }

    pub(crate) fn launch_acquisition(self: &Arc<Self>, uid: UserId, acquisition: Acquisition) {
        tracing::debug!(
            liver_uid = uid,
            generation = acquisition.generation(),
            "launching stream acquisition"
        );
        tokio::spawn(Arc::clone(self).acquire_repeatedly(uid, acquisition));
    }

    pub(crate) fn on_danmaku_stop(self: &Arc<Self>, uid: UserId) {
        if !self.transport.is_connected() {
            return;
        }
        let removed = self.commit(|core| core.streams.remove(&uid).is_some());
        tracing::info!(liver_uid = uid, removed, "danmaku stream stopped");
        self.reconcile();
    }

    /// Remove `uid` from the desired set and release its stream if active.
    pub(crate) fn withdraw(self: &Arc<Self>, uid: UserId) {
        let release = self.commit(|core| {
            if !core.withdraw(uid) {
                return None;
            }
            let active = core.streams.contains_key(&uid) && !core.generation.is_retired();
            active.then(|| core.generation.clone())
        });
        if let Some(generation) = release {
            tokio::spawn(Arc::clone(self).stop_repeatedly(uid, generation));
        }
    }

    async fn acquire_repeatedly(self: Arc<Self>, uid: UserId, acquisition: Acquisition) {
        loop {
            let wanted = self.read(|core| core.desired.contains(&uid));
            if !wanted || !acquisition.is_active() {
                break;
            }
            match self.get_danmaku(uid, &acquisition).await {
                Ok(true) => return,
                Ok(false) => {},
                Err(err) => self.notify_error(err),
            }
            if !self.pause(acquisition.cancel_token(), Some(acquisition.wake())).await {
                break;
            }
        }
        self.commit(|core| core.release_acquisition(uid, &acquisition));
    }

    async fn stop_repeatedly(self: Arc<Self>, uid: UserId, generation: Generation) {
        loop {
            if self.read(|core| core.desired.contains(&uid)) {
                tracing::debug!(liver_uid = uid, "stream wanted again, not stopping");
                return;
            }
            match self.stop_danmaku(uid, &generation).await {
                Ok(_) => return,
                Err(err) => self.notify_error(err),
            }
            if !self.pause(generation.token(), None).await {
                return;
            }
        }
    }

    /// One acquisition attempt.
    ///
    /// `Ok(true)` means the loop is done: the backend attached the stream
    /// (or reported it already attached) and the registration was released
    /// in the same commit. `Ok(false)` means try again later (not ready,
    /// offline liver, or stale response).
    ///
    /// A reply that lands after the liver was withdrawn is still recorded
    /// while its connection lives, and the stream is released again.
    async fn get_danmaku(
        self: &Arc<Self>,
        uid: UserId,
        acquisition: &Acquisition,
    ) -> Result<bool, SessionError> {
        let live = |core: &Core<E::Instant>| {
            self.transport.is_connected()
                && core.generation.id() == acquisition.generation()
                && !core.generation.is_retired()
                && core.session.is_logged_in()
                && core.token.is_some()
        };
        let ready = |core: &Core<E::Instant>| acquisition.is_active() && live(core);
        if !self.read(&ready) {
            return Ok(false);
        }

        let info: UserInfo =
            self.request(Operation::GetUserInfo, &UserInfoRequest { user_id: uid }).await?;
        let online = info.is_live();
        self.commit(|core| core.cache_user_info(uid, &info));

        if !self.read(&ready) {
            return Ok(false);
        }
        if !online {
            tracing::debug!(liver_uid = uid, "liver is offline");
            return Ok(false);
        }

        let response: GetDanmakuResponse =
            self.request(Operation::GetDanmaku, &DanmakuRequest { liver_uid: uid }).await?;

        let outcome = self.commit(|core| {
            if !live(&*core) {
                return Attach::Stale;
            }
            let recorded = response.stream_info.is_some();
            if let Some(stream) = response.stream_info {
                core.streams.insert(uid, stream);
            }
            core.settle_acquisition(uid, acquisition);
            if recorded && !core.desired.contains(&uid) {
                Attach::Unwanted(core.generation.clone())
            } else {
                Attach::Done { recorded }
            }
        });
        match outcome {
            Attach::Done { recorded } => {
                tracing::info!(
                    liver_uid = uid,
                    generation = acquisition.generation(),
                    recorded,
                    "danmaku stream attached"
                );
                Ok(true)
            },
            Attach::Unwanted(generation) => {
                tracing::debug!(liver_uid = uid, "stream attached after withdrawal, releasing");
                tokio::spawn(Arc::clone(self).stop_repeatedly(uid, generation));
                Ok(true)
            },
            Attach::Stale => {
                tracing::debug!(liver_uid = uid, "dropping stale getDanmaku response");
                Ok(false)
            },
        }
    }

    /// One release attempt. The map entry is normally dropped by the
    /// backend's `danmakuStop` push; a successful stop drops it too.
    async fn stop_danmaku(
        &self,
        uid: UserId,
        generation: &Generation,
    ) -> Result<bool, SessionError> {
        let ready = |core: &Core<E::Instant>| {
            self.is_live(core, generation)
                && core.token.is_some()
                && core.streams.contains_key(&uid)
        };
        if !self.read(&ready) {
            return Ok(false);
        }

        let _: IgnoredAny =
            self.request(Operation::StopDanmaku, &DanmakuRequest { liver_uid: uid }).await?;

        Ok(self.commit(|core| {
            let release = ready(&*core) && !core.desired.contains(&uid);
            if release {
                core.streams.remove(&uid);
                tracing::info!(liver_uid = uid, "danmaku stream released");
            }
            release
        }))
    }
}
