//! Error types for the session core.
//!
//! Precondition failures are expected under concurrent reconnection and are
//! usually swallowed by the caller; store failures come from the persistence
//! collaborator and are surfaced as-is.

use thiserror::Error;

/// A [`crate::SessionState`] transition was attempted from a state that does
/// not allow it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionError {
    /// The transition requires an open connection
    #[error("session is not connected")]
    NotConnected,

    /// The operation requires a completed login
    #[error("session is not logged in")]
    NotLoggedIn,

    /// Decoded flag bits describe an unreachable state
    #[error("invalid session flags: {0:#04x}")]
    InvalidFlags(u8),
}

/// Errors reported by a [`crate::Store`] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The value could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The storage backend rejected the operation
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
