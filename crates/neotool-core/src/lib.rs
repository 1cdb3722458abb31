//! Core building blocks for the neotool backend session.
//!
//! Everything in this crate is free of network I/O so it can be exercised
//! directly in unit and property tests.
//!
//! # Components
//!
//! - [`SessionState`]: handshake progress flags (connected, client id, login)
//! - [`Environment`]: time source and sleep primitive injected into drivers
//! - [`Signal`] / [`Readable`]: observable cells used for published state
//! - [`Store`]: persistence collaborator contract plus [`MemoryStore`]
//! - [`types`]: backend domain payloads (users, streams, danmaku)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod env;
mod error;
mod signal;
mod state;
mod store;
pub mod types;

pub use env::Environment;
pub use error::{PreconditionError, StoreError};
pub use signal::{Readable, Signal, Subscription};
pub use state::SessionState;
pub use store::{MemoryStore, Store, store_key};
pub use types::UserId;
