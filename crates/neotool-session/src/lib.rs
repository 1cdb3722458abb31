//! Backend session management for neotool.
//!
//! Owns the single logical connection to the live-streaming backend. The
//! transport may drop and reconnect underneath at any time; the
//! [`ConnectionManager`] re-runs the handshake on every open, discards the
//! results of requests that straddle a reconnect, and keeps every declared
//! danmaku stream alive without callers re-issuing anything.
//!
//! # Components
//!
//! - [`ConnectionManager`]: handshake sequencing, generation guard, retry
//!   wrappers and desired-stream reconciliation
//! - [`Transport`]: black-box backend connection (lifecycle events + RPC)
//! - [`Envelope`] / [`Message`]: peer-to-peer forwarding payloads
//! - [`SessionConfig`]: client identity, credentials and retry interval
//! - [`SystemEnv`]: production [`neotool_core::Environment`]

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
mod error;
mod generation;
mod handshake;
mod manager;
mod message;
mod request;
mod state;
mod streams;
mod system_env;
mod transport;

pub use config::{DEFAULT_RETRY_INTERVAL, SessionConfig};
pub use error::SessionError;
pub use manager::{ConnectionManager, SessionHandle};
pub use message::{Envelope, Message, MessageStream};
pub use system_env::SystemEnv;
pub use transport::{Operation, Transport, TransportError, TransportEvent};
