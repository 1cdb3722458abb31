//! Backend transport seam.
//!
//! The socket implementation lives outside this crate. A [`Transport`] opens
//! and closes the connection, broadcasts lifecycle and push events, and
//! performs named request/response calls whose payloads are opaque JSON.

use std::fmt;

use async_trait::async_trait;
use neotool_core::{
    UserId,
    types::{Comment, Danmaku, Gift, UserInfo},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

/// Named backend operations issued by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    /// Register this client's forwarding id.
    #[serde(rename = "setClientID")]
    SetClientId,
    /// Fresh login with credentials.
    Login,
    /// Resume with a cached token.
    SetToken,
    /// Fetch a user's profile.
    GetUserInfo,
    /// Open the danmaku stream of a liver.
    GetDanmaku,
    /// Close the danmaku stream of a liver.
    StopDanmaku,
    /// Forward a message to another client.
    RequestForward,
}

impl Operation {
    /// Wire name of the operation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SetClientId => "setClientID",
            Self::Login => "login",
            Self::SetToken => "setToken",
            Self::GetUserInfo => "getUserInfo",
            Self::GetDanmaku => "getDanmaku",
            Self::StopDanmaku => "stopDanmaku",
            Self::RequestForward => "requestForward",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle and push events emitted by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Connection opened (also after an autonomous reconnect).
    Open,
    /// Connection closed.
    Close,
    /// Connection failed.
    Error {
        /// Transport-provided description.
        message: String,
    },
    /// Backend confirmed a login.
    Login,
    /// Backend confirmed a token resume.
    SetToken,
    /// Backend ended the danmaku stream of a liver.
    DanmakuStop {
        /// Liver whose stream ended.
        liver_uid: UserId,
    },
    /// Backend's danmaku stream for a liver failed.
    DanmakuStopError {
        /// Liver whose stream failed.
        liver_uid: UserId,
        /// Backend-provided description.
        message: String,
    },
    /// Message forwarded to us by another client.
    ReceiveForward {
        /// Sender's client id.
        client_id: String,
        /// JSON-encoded [`crate::Envelope`].
        message: String,
    },
    /// Viewer comment on a streamed liver.
    Comment(Danmaku<Comment>),
    /// Gift on a streamed liver.
    Gift(Danmaku<Gift>),
    /// Pushed user profile.
    UserInfo(UserInfo),
}

impl TransportEvent {
    /// Wire name of the event.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Open => "websocketOpen",
            Self::Close => "websocketClose",
            Self::Error { .. } => "websocketError",
            Self::Login => "login",
            Self::SetToken => "setToken",
            Self::DanmakuStop { .. } => "danmakuStop",
            Self::DanmakuStopError { .. } => "danmakuStopError",
            Self::ReceiveForward { .. } => "receiveForward",
            Self::Comment(_) => "comment",
            Self::Gift(_) => "gift",
            Self::UserInfo(_) => "getUserInfo",
        }
    }
}

/// Transport-level request failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No open connection to send the request on.
    ///
    /// Transient. Retry loops pause and try again once the next handshake
    /// has completed.
    #[error("transport is not connected")]
    NotConnected,

    /// The backend answered with an error.
    ///
    /// The connection is still usable. Whether a retry can succeed depends on
    /// the operation, e.g. an offline liver versus a rejected token.
    #[error("{operation} failed: {message}")]
    Request {
        /// Operation that failed.
        operation: Operation,
        /// Backend-provided description.
        message: String,
    },

    /// The connection went away before the response arrived.
    ///
    /// Transient, but the request may or may not have reached the backend.
    /// Callers must not assume the operation took effect; the next
    /// connection reruns the handshake and reconciles streams from scratch.
    #[error("transport closed before {0} completed")]
    Closed(Operation),
}

impl TransportError {
    /// Returns true if the failure is caused by connectivity rather than by
    /// the backend rejecting the request.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Closed(_))
    }
}

/// Connection to the backend.
///
/// Implementations are shared between the session's event loop and every
/// retry task, so all methods take `&self`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start connecting. Completion is signalled by [`TransportEvent::Open`].
    fn connect(&self);

    /// Close the connection.
    fn disconnect(&self);

    /// Whether the connection is currently open.
    fn is_connected(&self) -> bool;

    /// Subscribe to lifecycle and push events, in emission order.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Perform a request and return the response's `data` field.
    async fn request(&self, operation: Operation, payload: Value) -> Result<Value, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_serializes_to_wire_name() {
        for operation in [
            Operation::SetClientId,
            Operation::Login,
            Operation::SetToken,
            Operation::GetUserInfo,
            Operation::GetDanmaku,
            Operation::StopDanmaku,
            Operation::RequestForward,
        ] {
            let json = serde_json::to_value(operation).unwrap();
            assert_eq!(json, Value::String(operation.as_str().to_string()));
        }
    }

    #[test]
    fn lifecycle_events_use_websocket_names() {
        assert_eq!(TransportEvent::Open.name(), "websocketOpen");
        assert_eq!(TransportEvent::Close.name(), "websocketClose");
        assert_eq!(TransportEvent::Error { message: String::new() }.name(), "websocketError");
    }

    #[test]
    fn connectivity_failures_are_transient() {
        assert!(TransportError::NotConnected.is_transient());
        assert!(TransportError::Closed(Operation::Login).is_transient());
        assert!(
            !TransportError::Request { operation: Operation::Login, message: "denied".into() }
                .is_transient()
        );
    }
}
