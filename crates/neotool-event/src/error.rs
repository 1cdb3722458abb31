//! Error types for the event layer.

use neotool_core::StoreError;
use neotool_session::SessionError;
use thiserror::Error;

/// Errors raised while handling bus requests or app bookkeeping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// No app is registered under this id
    #[error("unknown app: {0}")]
    UnknownApp(String),

    /// Persisting app data failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The session rejected the request
    #[error(transparent)]
    Session(#[from] SessionError),
}
