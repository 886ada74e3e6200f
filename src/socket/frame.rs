use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::SocketError;

/// Reply event name used for acknowledgment frames. An ack echoes the `ack`
/// id of the request it answers and carries the response in `data`.
pub const ACK_EVENT: &str = "ack";

/// A single protocol exchange on the persistent connection: a named event
/// with a JSON payload, optionally tagged with an ack id when the sender
/// expects a reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<String>,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data: Some(data),
            ack: None,
        }
    }

    pub fn with_ack(mut self, id: impl Into<String>) -> Self {
        self.ack = Some(id.into());
        self
    }

    pub fn is_ack(&self) -> bool {
        self.event == ACK_EVENT
    }

    pub fn encode(&self) -> Result<String, SocketError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, SocketError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Deserialize the payload into a typed value. Frames with no payload
    /// deserialize from `null`, so handlers with optional payloads work
    /// without special-casing.
    pub fn parse_data<T: serde::de::DeserializeOwned>(&self) -> Result<T, SocketError> {
        let value = self.data.clone().unwrap_or(Value::Null);
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_round_trip() {
        let frame = Frame::new("typing", json!({"conversationId": "c1", "typing": true}))
            .with_ack("1.2-7");
        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded.event, "typing");
        assert_eq!(decoded.ack.as_deref(), Some("1.2-7"));
        assert_eq!(decoded.data.unwrap()["conversationId"], "c1");
    }

    #[test]
    fn test_decode_without_optional_fields() {
        let frame = Frame::decode(r#"{"event":"auth_ok"}"#).unwrap();
        assert_eq!(frame.event, "auth_ok");
        assert!(frame.data.is_none());
        assert!(frame.ack.is_none());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Frame::decode("not json").is_err());
    }
}
