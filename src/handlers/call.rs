//! Inbound call signaling. Each handler parses its payload, feeds the
//! engine, and executes whatever effects the transition produced. Races
//! (signaling for a conversation with no matching call, or our own echoed
//! emissions) are resolved inside the engine by ignoring the frame.

use super::traits::FrameHandler;
use crate::calls::execute_effects;
use crate::client::Client;
use crate::socket::Frame;
use async_trait::async_trait;
use log::warn;
use std::sync::Arc;

macro_rules! parse_or_drop {
    ($frame:expr, $target:expr) => {
        match $frame.parse_data() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(target: $target, "Dropping malformed payload: {e}");
                return;
            }
        }
    };
}

/// `incoming_call`: someone is calling; ring without touching media.
pub struct IncomingCallHandler;

#[async_trait]
impl FrameHandler for IncomingCallHandler {
    fn event(&self) -> &'static str {
        "incoming_call"
    }

    async fn handle(&self, client: Arc<Client>, frame: &Frame) {
        let payload = parse_or_drop!(frame, "Calls");
        let effects = client.call_engine.handle_incoming_call(payload).await;
        execute_effects(&client, effects).await;
    }
}

/// `webrtc_offer`: the caller's session description.
pub struct OfferHandler;

#[async_trait]
impl FrameHandler for OfferHandler {
    fn event(&self) -> &'static str {
        "webrtc_offer"
    }

    async fn handle(&self, client: Arc<Client>, frame: &Frame) {
        let payload = parse_or_drop!(frame, "Calls");
        let effects = client.call_engine.handle_offer(payload).await;
        execute_effects(&client, effects).await;
    }
}

/// `webrtc_answer`: the callee's session description.
pub struct AnswerHandler;

#[async_trait]
impl FrameHandler for AnswerHandler {
    fn event(&self) -> &'static str {
        "webrtc_answer"
    }

    async fn handle(&self, client: Arc<Client>, frame: &Frame) {
        let payload = parse_or_drop!(frame, "Calls");
        let effects = client.call_engine.handle_answer(payload).await;
        execute_effects(&client, effects).await;
    }
}

/// `webrtc_ice_candidate`: network path candidates, applied or queued.
pub struct IceCandidateHandler;

#[async_trait]
impl FrameHandler for IceCandidateHandler {
    fn event(&self) -> &'static str {
        "webrtc_ice_candidate"
    }

    async fn handle(&self, client: Arc<Client>, frame: &Frame) {
        let payload = parse_or_drop!(frame, "Calls");
        let effects = client.call_engine.handle_candidate(payload).await;
        execute_effects(&client, effects).await;
    }
}

/// `call_rejected`: the remote side declined.
pub struct CallRejectedHandler;

#[async_trait]
impl FrameHandler for CallRejectedHandler {
    fn event(&self) -> &'static str {
        "call_rejected"
    }

    async fn handle(&self, client: Arc<Client>, frame: &Frame) {
        let payload = parse_or_drop!(frame, "Calls");
        let effects = client.call_engine.handle_remote_reject(payload).await;
        execute_effects(&client, effects).await;
    }
}

/// `end_call`: the remote side hung up.
pub struct EndCallHandler;

#[async_trait]
impl FrameHandler for EndCallHandler {
    fn event(&self) -> &'static str {
        "end_call"
    }

    async fn handle(&self, client: Arc<Client>, frame: &Frame) {
        let payload = parse_or_drop!(frame, "Calls");
        let effects = client.call_engine.handle_remote_end(payload).await;
        execute_effects(&client, effects).await;
    }
}
