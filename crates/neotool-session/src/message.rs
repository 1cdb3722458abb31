//! Peer-to-peer forwarding envelopes.
//!
//! Mini-apps talk to each other through the backend's forwarding primitive.
//! Every message travels as `{ target, type, data }`; receivers keep only the
//! envelopes whose `target` they own and decode them into their own message
//! enum.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{error::SessionError, transport::TransportEvent};

const CONTEXT: &str = "forwarded message";

/// Typed message family owned by one target.
///
/// Implement on an enum annotated with
/// `#[serde(tag = "type", content = "data")]` so each variant maps to one
/// envelope `type`.
pub trait Message: Serialize + DeserializeOwned {
    /// Target name receivers filter on.
    const TARGET: &'static str;
}

/// Forwarded message as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Logical receiver
    pub target: String,
    /// Message kind within the target
    #[serde(rename = "type")]
    pub kind: String,
    /// Message payload
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Build an envelope from raw parts.
    pub fn new(target: impl Into<String>, kind: impl Into<String>, data: Value) -> Self {
        Self { target: target.into(), kind: kind.into(), data }
    }

    /// Wrap a typed message.
    pub fn from_message<M: Message>(message: &M) -> Result<Self, SessionError> {
        let value = serde_json::to_value(message).map_err(|e| SessionError::payload(CONTEXT, &e))?;
        let Value::Object(mut fields) = value else {
            return Err(malformed("expected an adjacently tagged object"));
        };
        let Some(Value::String(kind)) = fields.remove("type") else {
            return Err(malformed("missing string `type`"));
        };
        let data = fields.remove("data").unwrap_or(Value::Null);
        Ok(Self { target: M::TARGET.to_string(), kind, data })
    }

    /// Decode into the typed message family owning this envelope's target.
    pub fn decode<M: Message>(&self) -> Result<M, SessionError> {
        if self.target != M::TARGET {
            return Err(SessionError::InvalidTarget(self.target.clone()));
        }
        let mut fields = Map::new();
        fields.insert("type".to_string(), Value::String(self.kind.clone()));
        fields.insert("data".to_string(), self.data.clone());
        serde_json::from_value(Value::Object(fields)).map_err(|e| SessionError::payload(CONTEXT, &e))
    }

    pub(crate) fn validate(&self) -> Result<(), SessionError> {
        if self.target.is_empty() {
            return Err(SessionError::InvalidTarget(self.target.clone()));
        }
        Ok(())
    }

    pub(crate) fn encode(&self) -> Result<String, SessionError> {
        serde_json::to_string(self).map_err(|e| SessionError::payload(CONTEXT, &e))
    }

    pub(crate) fn parse(raw: &str) -> Result<Self, SessionError> {
        serde_json::from_str(raw).map_err(|e| SessionError::payload(CONTEXT, &e))
    }
}

fn malformed(message: &str) -> SessionError {
    SessionError::Payload { context: CONTEXT, message: message.to_string() }
}

/// Forwarded messages addressed to one target.
///
/// Created by [`crate::ConnectionManager::messages`]. Undecodable forwarded
/// payloads are reported on the session's error channel and skipped.
#[derive(Debug)]
pub struct MessageStream {
    target: String,
    events: broadcast::Receiver<TransportEvent>,
    errors: broadcast::Sender<SessionError>,
}

impl MessageStream {
    pub(crate) fn new(
        target: String,
        events: broadcast::Receiver<TransportEvent>,
        errors: broadcast::Sender<SessionError>,
    ) -> Self {
        Self { target, events, errors }
    }

    /// Target this stream filters on.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Next envelope for this target, or `None` once the transport is gone.
    pub async fn next(&mut self) -> Option<Envelope> {
        loop {
            let event = match self.events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(target = %self.target, skipped, "message stream lagged");
                    continue;
                },
                Err(RecvError::Closed) => return None,
            };
            let TransportEvent::ReceiveForward { message, .. } = event else {
                continue;
            };
            match Envelope::parse(&message) {
                Ok(envelope) if envelope.target == self.target => return Some(envelope),
                Ok(_) => {},
                Err(err) => {
                    tracing::warn!(error = %err, "dropping undecodable forwarded message");
                    let _ = self.errors.send(err);
                },
            }
        }
    }

    /// Next envelope decoded as `M`.
    pub async fn next_message<M: Message>(&mut self) -> Option<Result<M, SessionError>> {
        self.next().await.map(|envelope| envelope.decode())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "type", content = "data", rename_all = "camelCase")]
    enum StickerMessage {
        Show { id: u32 },
        Clear,
    }

    impl Message for StickerMessage {
        const TARGET: &'static str = "sticker";
    }

    #[test]
    fn wire_shape_is_target_type_data() {
        let envelope = Envelope::from_message(&StickerMessage::Show { id: 3 }).unwrap();

        insta::assert_json_snapshot!(envelope, @r#"
        {
          "target": "sticker",
          "type": "show",
          "data": {
            "id": 3
          }
        }
        "#);
    }

    #[test]
    fn typed_messages_survive_the_envelope() {
        for message in [StickerMessage::Show { id: 7 }, StickerMessage::Clear] {
            let raw = Envelope::from_message(&message).unwrap().encode().unwrap();
            let decoded: StickerMessage = Envelope::parse(&raw).unwrap().decode().unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn decode_rejects_foreign_target() {
        let envelope = Envelope::new("keyboard", "press", json!("a"));

        assert_eq!(
            envelope.decode::<StickerMessage>(),
            Err(SessionError::InvalidTarget("keyboard".to_string()))
        );
    }

    #[test]
    fn empty_target_is_invalid() {
        assert!(Envelope::new("", "x", Value::Null).validate().is_err());
        assert!(Envelope::new("sticker", "x", Value::Null).validate().is_ok());
    }

    #[test]
    fn missing_data_defaults_to_null() {
        let envelope = Envelope::parse(r#"{"target":"sticker","type":"clear"}"#).unwrap();

        assert_eq!(envelope.data, Value::Null);
        assert_eq!(envelope.decode::<StickerMessage>(), Ok(StickerMessage::Clear));
    }
}
