//! Fuzz target for the SessionState flag machine
//!
//! # Strategy
//!
//! - Arbitrary transition sequences, including out-of-order login and
//!   client id registration
//! - Arbitrary raw bit patterns decoded through `TryFrom<u8>`
//!
//! # Invariants
//!
//! - Logged in or client id set implies connected
//! - Rejected transitions leave the state untouched
//! - Every accepted bit pattern re-encodes to itself

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use neotool_core::SessionState;

#[derive(Debug, Clone, Arbitrary)]
enum StateOp {
    Connect,
    Disconnect,
    Login,
    SetClientId,
    Decode(u8),
}

fn assert_consistent(state: SessionState) {
    if state.is_logged_in() || state.has_client_id() {
        assert!(state.is_connected(), "flags set while disconnected: {state:?}");
    }
}

fuzz_target!(|ops: Vec<StateOp>| {
    let mut state = SessionState::new();

    for op in ops {
        match op {
            StateOp::Connect => state = state.connect(),
            StateOp::Disconnect => {
                state = state.disconnect();
                assert_eq!(state, SessionState::new());
            },
            StateOp::Login => match state.login() {
                Ok(next) => state = next,
                Err(_) => assert!(!state.is_connected()),
            },
            StateOp::SetClientId => match state.with_client_id() {
                Ok(next) => state = next,
                Err(_) => assert!(!state.is_connected()),
            },
            StateOp::Decode(bits) => {
                if let Ok(decoded) = SessionState::try_from(bits) {
                    assert_consistent(decoded);
                    assert_eq!(u8::from(decoded), bits);
                }
            },
        }
        assert_consistent(state);
    }
});
