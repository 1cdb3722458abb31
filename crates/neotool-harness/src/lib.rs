//! Deterministic simulation harness for neotool session testing.
//!
//! [`SimTransport`] stands in for the backend connection: tests script
//! replies per operation, hold replies to resolve them out of order, inject
//! lifecycle and push events, and inspect every request the session made.
//! Combined with tokio's paused clock this makes retry timing exact.
//!
//! # Invariant Testing
//!
//! The [`invariants`] module checks properties that must hold for every
//! observable session snapshot, independent of the scenario that produced it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_transport;

pub use invariants::{SessionSnapshot, Violation};
pub use sim_transport::{HeldReply, RecordedRequest, SimTransport};
