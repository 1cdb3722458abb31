//! Session error taxonomy.
//!
//! Caller misuse is reported synchronously and never retried. Transport and
//! payload failures happen inside retry loops and are published on the error
//! channel while the loop carries on.

use neotool_core::{PreconditionError, UserId};
use thiserror::Error;

use crate::transport::TransportError;

/// Errors produced by [`crate::ConnectionManager`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Liver ids must be positive.
    ///
    /// Caller misuse, reported synchronously and never retried.
    #[error("invalid liver uid: {0}")]
    InvalidLiverUid(UserId),

    /// Forwarding target or destination client id is empty.
    #[error("invalid message target: {0:?}")]
    InvalidTarget(String),

    /// Backend request failed.
    ///
    /// See [`TransportError::is_transient`] for the connectivity cases.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A payload could not be encoded or decoded.
    ///
    /// Usually a backend reply whose shape does not match the expected
    /// response, or a forwarded message from a peer speaking another format.
    #[error("malformed {context} payload: {message}")]
    Payload {
        /// Operation or event the payload belongs to.
        context: &'static str,
        /// Decoder message.
        message: String,
    },

    /// State transition refused.
    ///
    /// Raised when a handshake step or request needs a flag the session does
    /// not have, e.g. fetching a profile before login. Inside retry loops it
    /// means the connection dropped between the check and the commit; the
    /// loop waits for the next generation.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
}

impl SessionError {
    pub(crate) fn payload(context: &'static str, err: &serde_json::Error) -> Self {
        Self::Payload { context, message: err.to_string() }
    }

    /// Returns true if a later attempt of the same operation may succeed.
    ///
    /// Misuse errors are deterministic and retrying them is pointless.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Payload { .. } | Self::Precondition(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Operation;

    #[test]
    fn misuse_is_not_retryable() {
        assert!(!SessionError::InvalidLiverUid(0).is_retryable());
        assert!(!SessionError::InvalidTarget(String::new()).is_retryable());
    }

    #[test]
    fn backend_failures_are_retryable() {
        let err: SessionError = TransportError::Closed(Operation::GetDanmaku).into();
        assert!(err.is_retryable());

        let decode = serde_json::from_str::<u8>("x").unwrap_err();
        assert!(SessionError::payload("getUserInfo", &decode).is_retryable());
    }

    #[test]
    fn transport_errors_display_transparently() {
        let err: SessionError = TransportError::NotConnected.into();
        assert_eq!(err.to_string(), "transport is not connected");
    }
}
