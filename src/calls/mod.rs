//! Two-party call signaling over the session connection.

pub mod engine;
pub mod error;
pub mod media;
pub mod state;


pub use engine::{CallEngine, CallSnapshot};
pub use error::CallError;
pub use state::{CallEndReason, CallPhase, CallRole};

use crate::client::Client;
use crate::types::call::{CallControlPayload, IceCandidatePayload};
use crate::types::events::Event;
use engine::CallEffect;
use log::warn;
use std::sync::Arc;

pub(crate) const EVT_INITIATE_CALL: &str = "initiate_call";
pub(crate) const EVT_WEBRTC_OFFER: &str = "webrtc_offer";
pub(crate) const EVT_WEBRTC_ANSWER: &str = "webrtc_answer";
pub(crate) const EVT_WEBRTC_ICE_CANDIDATE: &str = "webrtc_ice_candidate";
pub(crate) const EVT_CALL_REJECTED: &str = "call_rejected";
pub(crate) const EVT_END_CALL: &str = "end_call";

/// User-facing call operations, bound to the live session connection.
pub struct Calls {
    client: Arc<Client>,
}

impl Client {
    pub fn calls(self: &Arc<Self>) -> Calls {
        Calls {
            client: self.clone(),
        }
    }
}

impl Calls {
    /// Start an outgoing call in the given conversation.
    pub async fn start(&self, conversation_id: &str, video: bool) -> Result<(), CallError> {
        let effects = self
            .client
            .call_engine
            .start_call(conversation_id, video)
            .await?;
        execute_effects(&self.client, effects).await;
        Ok(())
    }

    /// Accept the ringing incoming call. On a media failure the remote side
    /// is told the call is over before the error is surfaced, so it does
    /// not ring forever.
    pub async fn accept(&self) -> Result<(), CallError> {
        let conversation_id = self.client.call_engine.active_conversation().await;
        match self.client.call_engine.accept().await {
            Ok(effects) => {
                execute_effects(&self.client, effects).await;
                Ok(())
            }
            Err(CallError::Media(e)) => {
                if let Some(conversation_id) = conversation_id {
                    let payload = CallControlPayload {
                        conversation_id: conversation_id.clone(),
                        sender_id: None,
                    };
                    if let Ok(data) = serde_json::to_value(&payload) {
                        if let Err(err) = self.client.publish(EVT_END_CALL, data).await {
                            warn!(target: "Calls", "Failed to notify remote of aborted accept: {err}");
                        }
                    }
                    self.client.event_bus.dispatch(&Event::CallEnded {
                        conversation_id,
                        reason: CallEndReason::Failed,
                    });
                }
                Err(CallError::Media(e))
            }
            Err(e) => Err(e),
        }
    }

    /// Decline the ringing incoming call without touching media.
    pub async fn decline(&self) -> Result<(), CallError> {
        let effects = self.client.call_engine.decline().await?;
        execute_effects(&self.client, effects).await;
        Ok(())
    }

    /// End the active call from any non-terminal state.
    pub async fn hang_up(&self) -> Result<(), CallError> {
        let effects = self.client.call_engine.hang_up().await?;
        execute_effects(&self.client, effects).await;
        Ok(())
    }

    pub async fn set_audio_enabled(&self, enabled: bool) -> Result<(), CallError> {
        self.client.call_engine.set_audio_enabled(enabled).await
    }

    pub async fn set_video_enabled(&self, enabled: bool) -> Result<(), CallError> {
        self.client.call_engine.set_video_enabled(enabled).await
    }

    pub async fn phase(&self) -> CallPhase {
        self.client.call_engine.phase().await
    }

    pub async fn snapshot(&self) -> Option<CallSnapshot> {
        self.client.call_engine.snapshot().await
    }
}

/// Run the side effects a state transition asked for, in order.
pub(crate) async fn execute_effects(client: &Arc<Client>, effects: Vec<CallEffect>) {
    for effect in effects {
        match effect {
            CallEffect::Publish { event, data } => {
                if let Err(e) = client.publish(event, data).await {
                    warn!(target: "Calls", "Failed to publish {event}: {e}");
                }
            }
            CallEffect::Emit(event) => client.event_bus.dispatch(&event),
            CallEffect::ForwardCandidates {
                conversation_id,
                mut candidates,
            } => {
                let client = client.clone();
                tokio::spawn(async move {
                    while let Some(candidate) = candidates.recv().await {
                        let payload = IceCandidatePayload {
                            conversation_id: conversation_id.clone(),
                            candidate: candidate.0,
                            sender_id: Some(client.identity().id.clone()),
                        };
                        let data = match serde_json::to_value(&payload) {
                            Ok(data) => data,
                            Err(e) => {
                                warn!(target: "Calls", "Unserializable candidate: {e}");
                                continue;
                            }
                        };
                        if client
                            .publish(EVT_WEBRTC_ICE_CANDIDATE, data)
                            .await
                            .is_err()
                        {
                            // Connection went away; the call teardown path
                            // handles the rest.
                            break;
                        }
                    }
                });
            }
        }
    }
}
