//! Handshake run on every transport open.
//!
//! Registering the client id and logging in are independent loops; neither
//! waits for the other. Each checks `connected && same generation && flag not
//! yet set` before its request and again before committing, so a response
//! that arrives after a reconnect is dropped instead of marking the new
//! connection.

use std::sync::Arc;

use neotool_core::{Environment, types::TokenInfo};
use serde::de::IgnoredAny;

use crate::{
    error::SessionError,
    generation::Generation,
    manager::Inner,
    request::SetClientIdRequest,
    state::Core,
    transport::{Operation, Transport},
};

/// How a login attempt authenticates.
enum Credentials {
    Resume(TokenInfo),
    Fresh,
}

impl<T: Transport, E: Environment> Inner<T, E> {
    pub(crate) fn on_open(self: &Arc<Self>) {
        let now = self.env.now();
        let generation = self.commit(|core| {
            if core.session.is_connected() {
                // Reopened without a close in between
                core.disconnect();
            }
            core.generation.retire();
            core.generation = core.generation.next();
            core.session = core.session.connect();
            core.connected_at = Some(now);
            core.generation.clone()
        });
        tracing::info!(generation = generation.id(), "backend connected");

        tokio::spawn(Arc::clone(self).set_client_id_repeatedly(generation.clone()));
        tokio::spawn(Arc::clone(self).login_repeatedly(generation));
    }

    pub(crate) fn on_disconnect(&self, reason: &str) {
        let generation = self.commit(|core| {
            core.disconnect();
            core.generation.id()
        });
        tracing::warn!(generation, reason, "backend disconnected");
    }

    async fn set_client_id_repeatedly(self: Arc<Self>, generation: Generation) {
        loop {
            match self.set_client_id(&generation).await {
                Ok(_) => return,
                Err(err) => self.notify_error(err),
            }
            if !self.pause(generation.token(), None).await {
                return;
            }
        }
    }

    async fn login_repeatedly(self: Arc<Self>, generation: Generation) {
        loop {
            match self.login(&generation).await {
                Ok(_) => return,
                Err(err) => self.notify_error(err),
            }
            if !self.pause(generation.token(), None).await {
                return;
            }
        }
    }

    /// One attempt at registering the client id.
    ///
    /// `Ok(false)` means the attempt was stale or redundant and nothing was
    /// committed.
    async fn set_client_id(&self, generation: &Generation) -> Result<bool, SessionError> {
        let pending = |core: &Core<E::Instant>| {
            self.is_live(core, generation) && !core.session.has_client_id()
        };
        if !self.read(&pending) {
            return Ok(false);
        }

        let request = SetClientIdRequest { client_id: &self.client_id };
        let _: IgnoredAny = self.request(Operation::SetClientId, &request).await?;

        let committed = self.commit(|core| {
            if !pending(&*core) {
                return Ok(false);
            }
            core.session = core.session.with_client_id()?;
            Ok::<_, SessionError>(true)
        })?;
        if committed {
            tracing::info!(
                generation = generation.id(),
                client_id = %self.client_id,
                "client id set"
            );
        } else {
            tracing::debug!(generation = generation.id(), "dropping stale setClientID response");
        }
        Ok(committed)
    }

    /// One login attempt: resume with the cached token if there is one,
    /// otherwise log in afresh and cache the returned token.
    async fn login(self: &Arc<Self>, generation: &Generation) -> Result<bool, SessionError> {
        let pending = |core: &Core<E::Instant>| {
            self.is_live(core, generation) && !core.session.is_logged_in()
        };
        let credentials = self.read(|core| {
            pending(core).then(|| match &core.token {
                Some(token) => Credentials::Resume(token.clone()),
                None => Credentials::Fresh,
            })
        });
        let Some(credentials) = credentials else {
            return Ok(false);
        };

        let token = match credentials {
            Credentials::Resume(token) => {
                let resumed: Result<IgnoredAny, _> =
                    self.request(Operation::SetToken, &token).await;
                if let Err(err) = resumed {
                    // Forget the rejected token so the next attempt logs in afresh
                    self.commit(|core| {
                        if core.token.as_ref() == Some(&token) {
                            core.token = None;
                        }
                    });
                    return Err(err);
                }
                token
            },
            Credentials::Fresh => {
                let login_data = self.read(|core| core.login_data.clone()).unwrap_or_default();
                self.request(Operation::Login, &login_data).await?
            },
        };

        let now = self.env.now();
        let committed = self.commit(|core| {
            if !pending(&*core) {
                return Ok(None);
            }
            core.token = Some(token);
            core.session = core.session.login()?;
            Ok::<_, SessionError>(Some(core.connected_at.map(|at| now - at)))
        })?;
        let Some(elapsed) = committed else {
            tracing::debug!(generation = generation.id(), "dropping stale login response");
            return Ok(false);
        };

        tracing::info!(generation = generation.id(), ?elapsed, "logged in");
        self.reconcile();
        Ok(true)
    }
}
