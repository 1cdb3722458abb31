//! Fuzz target for forwarded message envelopes
//!
//! Forwarded messages arrive as JSON text from other clients. Parsing them and
//! decoding into a typed message family must never panic, whatever the input.

#![no_main]

use libfuzzer_sys::fuzz_target;
use neotool_session::{Envelope, Message};
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
enum OverlayMessage {
    Show { id: u32, text: String },
    Hide(u32),
    Clear,
}

impl Message for OverlayMessage {
    const TARGET: &'static str = "overlay";
}

fuzz_target!(|data: &[u8]| {
    let Ok(envelope) = serde_json::from_slice::<Envelope>(data) else {
        return;
    };
    if let Ok(message) = envelope.decode::<OverlayMessage>() {
        let rewrapped = Envelope::from_message(&message).expect("decoded message re-encodes");
        assert_eq!(rewrapped.target, "overlay");
        assert_eq!(rewrapped.kind, envelope.kind);
    }
});
