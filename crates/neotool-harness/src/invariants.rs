//! Session invariants checked against observable snapshots.
//!
//! Invariants state WHAT must hold after any sequence of lifecycle events and
//! caller operations, so tests can assert them after every step instead of
//! hand-writing expectations per scenario.

use std::collections::BTreeSet;

use neotool_core::{Environment, SessionState, UserId};
use neotool_session::{ConnectionManager, Transport};

/// Observable state of a session at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Connection lifetime id
    pub generation: u64,
    /// Handshake flags
    pub state: SessionState,
    /// Livers with an active stream
    pub streams: BTreeSet<UserId>,
    /// Livers callers want streamed
    pub desired: BTreeSet<UserId>,
    /// Whether a token is cached
    pub has_token: bool,
}

impl SessionSnapshot {
    /// Capture the current state of `manager`.
    pub fn capture<T: Transport, E: Environment>(manager: &ConnectionManager<T, E>) -> Self {
        Self {
            generation: manager.generation(),
            state: manager.state(),
            streams: manager.stream_info_signal().get().into_keys().collect(),
            desired: manager.desired_streams_signal().get(),
            has_token: manager.token().is_some(),
        }
    }

    /// Check every invariant, comparing against `previous` for the ones that
    /// constrain how state evolves.
    pub fn check(&self, previous: Option<&Self>) -> Vec<Violation> {
        let mut violations = Vec::new();

        if (self.state.is_logged_in() || self.state.has_client_id()) && !self.state.is_connected() {
            violations.push(Violation::new("flags-need-connection", format!("{:?}", self.state)));
        }
        if !self.streams.is_empty() && !self.state.is_logged_in() {
            violations.push(Violation::new(
                "streams-need-login",
                format!("streams {:?} while {:?}", self.streams, self.state),
            ));
        }
        // Generation 0 may still hold a configured token
        if self.generation > 0 && !self.state.is_connected() && self.has_token {
            violations.push(Violation::new("token-cleared-on-disconnect", String::new()));
        }
        if let Some(previous) = previous {
            if self.generation < previous.generation {
                violations.push(Violation::new(
                    "generation-monotonic",
                    format!("{} -> {}", previous.generation, self.generation),
                ));
            }
        }
        violations
    }
}

/// A broken invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Invariant name
    pub invariant: &'static str,
    /// What was observed
    pub message: String,
}

impl Violation {
    fn new(invariant: &'static str, message: String) -> Self {
        Self { invariant, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(state: SessionState) -> SessionSnapshot {
        SessionSnapshot {
            generation: 1,
            state,
            streams: BTreeSet::new(),
            desired: BTreeSet::new(),
            has_token: false,
        }
    }

    #[test]
    fn fresh_state_is_valid() {
        assert!(snapshot(SessionState::new()).check(None).is_empty());
    }

    #[test]
    fn streams_without_login_are_flagged() {
        let mut current = snapshot(SessionState::new().connect());
        current.streams.insert(3);

        let violations = current.check(None);

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].invariant, "streams-need-login");
    }

    #[test]
    fn generation_going_backwards_is_flagged() {
        let previous = SessionSnapshot { generation: 4, ..snapshot(SessionState::new()) };
        let current = snapshot(SessionState::new());

        let violations = current.check(Some(&previous));

        assert_eq!(violations[0].invariant, "generation-monotonic");
    }
}
