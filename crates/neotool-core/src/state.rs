//! Handshake progress of one backend connection.
//!
//! The state is a set of independent flags layered on top of `connected`.
//! Client id and login are not ordered relative to each other, but neither
//! can be set without a connection, and a disconnect wipes all of them.
//!
//! ```text
//!                ┌──────────────────────── disconnect ───────────────────────┐
//!                ↓                                                           │
//! ┌──────────────┐  connect  ┌───────────┐  with_client_id  ┌─────────────┐  │
//! │ Disconnected │──────────>│ Connected │─────────────────>│ +CLIENT_ID  │──┤
//! └──────────────┘           └───────────┘                  └─────────────┘  │
//!                                  │           login        ┌─────────────┐  │
//!                                  └───────────────────────>│ +LOGGED_IN  │──┘
//!                                                           └─────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::PreconditionError;

const CONNECTED: u8 = 1;
const LOGGED_IN: u8 = 1 << 1;
const CLIENT_ID: u8 = 1 << 2;
const ALL: u8 = CONNECTED | LOGGED_IN | CLIENT_ID;

/// Handshake flags of a backend session.
///
/// Transitions consume the value and return the next one, so a stale copy
/// held by a task can never be mutated behind the owner's back.
///
/// Serialized as the raw flag byte; decoding rejects unreachable
/// combinations such as "logged in but not connected".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SessionState {
    bits: u8,
}

impl SessionState {
    /// Fresh state with every flag cleared.
    pub const fn new() -> Self {
        Self { bits: 0 }
    }

    /// Whether the transport connection is open.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        self.bits & CONNECTED != 0
    }

    /// Whether authentication completed on the current connection.
    #[must_use]
    pub const fn is_logged_in(self) -> bool {
        self.bits & LOGGED_IN != 0
    }

    /// Whether the backend accepted our client id on the current connection.
    #[must_use]
    pub const fn has_client_id(self) -> bool {
        self.bits & CLIENT_ID != 0
    }

    /// Resets to exactly the connected flag.
    ///
    /// Flags left over from a previous connection are dropped.
    #[must_use]
    pub const fn connect(self) -> Self {
        Self { bits: CONNECTED }
    }

    /// Clears every flag.
    #[must_use]
    pub const fn disconnect(self) -> Self {
        Self { bits: 0 }
    }

    /// Marks authentication as complete.
    ///
    /// # Errors
    ///
    /// [`PreconditionError::NotConnected`] if the connection is not open.
    pub fn login(self) -> Result<Self, PreconditionError> {
        self.check_connected()?;
        Ok(Self { bits: self.bits | LOGGED_IN })
    }

    /// Marks the client id as assigned.
    ///
    /// # Errors
    ///
    /// [`PreconditionError::NotConnected`] if the connection is not open.
    pub fn with_client_id(self) -> Result<Self, PreconditionError> {
        self.check_connected()?;
        Ok(Self { bits: self.bits | CLIENT_ID })
    }

    /// Fails unless the connection is open.
    pub fn check_connected(self) -> Result<(), PreconditionError> {
        if self.is_connected() { Ok(()) } else { Err(PreconditionError::NotConnected) }
    }

    /// Fails unless the connection is open and authenticated.
    pub fn check_logged_in(self) -> Result<(), PreconditionError> {
        self.check_connected()?;
        if self.is_logged_in() { Ok(()) } else { Err(PreconditionError::NotLoggedIn) }
    }
}

impl From<SessionState> for u8 {
    fn from(state: SessionState) -> Self {
        state.bits
    }
}

impl TryFrom<u8> for SessionState {
    type Error = PreconditionError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        let dangling = bits & (LOGGED_IN | CLIENT_ID) != 0 && bits & CONNECTED == 0;
        if bits & !ALL != 0 || dangling {
            return Err(PreconditionError::InvalidFlags(bits));
        }
        Ok(Self { bits })
    }
}
