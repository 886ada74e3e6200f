//! Wire payloads for call signaling.
//!
//! The signaling channel is room-scoped, not peer-addressed: every
//! participant receives its own emissions echoed back, so each payload
//! carries the sender id for self-filtering.

use serde::{Deserialize, Serialize};

/// Inbound `incoming_call` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCallPayload {
    pub conversation_id: String,
    pub caller_id: String,
    #[serde(default)]
    pub caller_name: Option<String>,
}

/// Outbound `initiate_call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCallPayload {
    pub conversation_id: String,
}

/// An SDP offer or answer (`webrtc_offer` / `webrtc_answer`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptionPayload {
    pub conversation_id: String,
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_name: Option<String>,
}

/// A `webrtc_ice_candidate` exchange. The candidate body is opaque to the
/// signaling layer and handed to the peer connection verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidatePayload {
    pub conversation_id: String,
    pub candidate: serde_json::Value,
    #[serde(default)]
    pub sender_id: Option<String>,
}

/// `call_rejected` / `end_call` control messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallControlPayload {
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_description_wire_shape() {
        let payload = SessionDescriptionPayload {
            conversation_id: "c1".into(),
            sdp: "v=0".into(),
            kind: "offer".into(),
            sender_id: Some("u1".into()),
            caller_name: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["conversationId"], "c1");
        assert_eq!(json["type"], "offer");
        assert_eq!(json["senderId"], "u1");
        assert!(json.get("callerName").is_none());
    }

    #[test]
    fn test_ice_candidate_round_trip() {
        let raw = r#"{"conversationId":"c1","candidate":{"sdpMid":"0","candidate":"candidate:1"},"senderId":"u2"}"#;
        let payload: IceCandidatePayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.conversation_id, "c1");
        assert_eq!(payload.candidate["sdpMid"], "0");
    }
}
