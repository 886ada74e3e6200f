//! Call signaling engine.
//!
//! Holds at most one [`CallSession`] at a time and brokers the
//! offer/answer/ICE exchange for it. Every entry point is a message into the
//! state machine: it produces a phase transition plus a list of
//! [`CallEffect`]s (frames to publish, events to emit) that the owner
//! executes against the live session connection, so the machine itself is
//! testable without a transport.

use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};

use crate::types::call::{
    CallControlPayload, IceCandidatePayload, IncomingCallPayload, InitiateCallPayload,
    SessionDescriptionPayload,
};
use crate::types::events::Event;
use crate::types::user::UserIdentity;

use super::error::CallError;
use super::media::{
    IceCandidate, IceConfig, LocalMedia, MediaConstraints, MediaProvider, PeerConnection,
    SessionDescription,
};
use super::state::{CallEndReason, CallPhase, CallRole, CallSession};
use super::{
    EVT_CALL_REJECTED, EVT_END_CALL, EVT_INITIATE_CALL, EVT_WEBRTC_ANSWER, EVT_WEBRTC_OFFER,
};

use std::sync::Arc;

/// A side effect requested by a state transition. Executed by the caller
/// after the engine returns.
#[derive(Debug)]
pub(crate) enum CallEffect {
    /// Send a frame over the session connection.
    Publish { event: &'static str, data: Value },
    /// Dispatch an event on the consumer bus.
    Emit(Event),
    /// Pump locally gathered ICE candidates out over signaling until the
    /// peer connection closes the stream.
    ForwardCandidates {
        conversation_id: String,
        candidates: mpsc::UnboundedReceiver<IceCandidate>,
    },
}

/// Read-only view of the active call for display purposes.
#[derive(Debug, Clone, Serialize)]
pub struct CallSnapshot {
    pub conversation_id: String,
    pub role: CallRole,
    pub phase: CallPhase,
    pub peer_name: Option<String>,
    pub duration_secs: Option<i64>,
}

pub struct CallEngine {
    identity: UserIdentity,
    provider: Arc<dyn MediaProvider>,
    ice_config: IceConfig,
    session: Mutex<Option<CallSession>>,
    generation: AtomicU64,
}

impl CallEngine {
    pub(crate) fn new(
        identity: UserIdentity,
        provider: Arc<dyn MediaProvider>,
        ice_config: IceConfig,
    ) -> Self {
        Self {
            identity,
            provider,
            ice_config,
            session: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn phase(&self) -> CallPhase {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.phase)
            .unwrap_or(CallPhase::Idle)
    }

    pub async fn active_conversation(&self) -> Option<String> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.conversation_id.clone())
    }

    pub async fn snapshot(&self) -> Option<CallSnapshot> {
        self.session.lock().await.as_ref().map(|s| CallSnapshot {
            conversation_id: s.conversation_id.clone(),
            role: s.role,
            phase: s.phase,
            peer_name: s.peer_name.clone(),
            duration_secs: s.duration_secs(),
        })
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn sender_id(&self) -> Option<String> {
        Some(self.identity.id.clone())
    }

    fn is_own_echo(&self, sender_id: &Option<String>) -> bool {
        sender_id.as_deref() == Some(self.identity.id.as_str())
    }

    /// Start an outgoing call: acquire media, build the peer connection,
    /// attach local tracks, and produce the offer. The session slot is
    /// reserved up front so a second start is rejected immediately; media
    /// acquisition happens outside the lock so inbound signaling (a remote
    /// hang-up, most importantly) is never blocked behind a permission
    /// prompt.
    pub(crate) async fn start_call(
        &self,
        conversation_id: &str,
        video: bool,
    ) -> Result<Vec<CallEffect>, CallError> {
        let generation = {
            let mut slot = self.session.lock().await;
            if slot.is_some() {
                return Err(CallError::CallInProgress);
            }
            let generation = self.next_generation();
            *slot = Some(CallSession::new_outgoing(conversation_id, generation));
            generation
        };

        let mut effects = vec![CallEffect::Emit(Event::CallPhaseChanged {
            conversation_id: conversation_id.to_string(),
            phase: CallPhase::Originating,
        })];

        let constraints = if video {
            MediaConstraints::audio_video()
        } else {
            MediaConstraints::audio_only()
        };
        let media = match self.provider.acquire_media(constraints).await {
            Ok(media) => media,
            Err(e) => {
                self.fail_attempt(generation).await;
                return Err(CallError::Media(e));
            }
        };
        let peer = match self.provider.create_peer_connection(&self.ice_config).await {
            Ok(peer) => peer,
            Err(e) => {
                media.stop();
                self.fail_attempt(generation).await;
                return Err(CallError::Media(e));
            }
        };

        let offer = match async {
            peer.attach_local_media(media.as_ref()).await?;
            let offer = peer.create_offer().await?;
            peer.set_local_description(offer.clone()).await?;
            Ok::<_, super::media::MediaError>(offer)
        }
        .await
        {
            Ok(offer) => offer,
            Err(e) => {
                media.stop();
                peer.close();
                self.fail_attempt(generation).await;
                return Err(CallError::Media(e));
            }
        };
        let local_candidates = peer.take_local_candidates();

        // Commit: the session must still be the one this attempt was issued
        // against. A remote end/reject during acquisition clears the slot,
        // in which case the acquired resources are released, not leaked.
        let mut slot = self.session.lock().await;
        match slot.as_mut() {
            Some(s) if s.generation == generation && s.phase == CallPhase::Originating => {
                s.media = Some(media);
                s.peer = Some(peer);
                s.transition(CallPhase::Negotiating)
                    .expect("Originating -> Negotiating is always valid");

                effects.push(CallEffect::Publish {
                    event: EVT_INITIATE_CALL,
                    data: to_value(&InitiateCallPayload {
                        conversation_id: conversation_id.to_string(),
                    }),
                });
                effects.push(CallEffect::Publish {
                    event: EVT_WEBRTC_OFFER,
                    data: to_value(&SessionDescriptionPayload {
                        conversation_id: conversation_id.to_string(),
                        sdp: offer.sdp,
                        kind: offer.kind,
                        sender_id: self.sender_id(),
                        caller_name: self.identity.username.clone(),
                    }),
                });
                effects.push(CallEffect::Emit(Event::CallPhaseChanged {
                    conversation_id: conversation_id.to_string(),
                    phase: CallPhase::Negotiating,
                }));
                if let Some(candidates) = local_candidates {
                    effects.push(CallEffect::ForwardCandidates {
                        conversation_id: conversation_id.to_string(),
                        candidates,
                    });
                }
                Ok(effects)
            }
            _ => {
                media.stop();
                peer.close();
                Err(CallError::Cancelled)
            }
        }
    }

    /// Accept the ringing incoming call: acquire media, apply the held
    /// offer, produce and send the answer. The queued remote candidates are
    /// flushed in arrival order once the remote description is set.
    pub(crate) async fn accept(&self) -> Result<Vec<CallEffect>, CallError> {
        let (generation, conversation_id, offer) = {
            let mut slot = self.session.lock().await;
            let session = slot.as_mut().ok_or(CallError::NoActiveCall)?;
            if !session.can_accept() {
                return Err(CallError::InvalidState);
            }
            let offer = session
                .pending_offer
                .clone()
                .ok_or(CallError::NoPendingOffer)?;
            session
                .transition(CallPhase::Negotiating)
                .expect("Ringing -> Negotiating is always valid");
            (session.generation, session.conversation_id.clone(), offer)
        };

        let mut effects = vec![CallEffect::Emit(Event::CallPhaseChanged {
            conversation_id: conversation_id.clone(),
            phase: CallPhase::Negotiating,
        })];

        // Accepting always captures both; the video track starts enabled
        // and is toggled, not renegotiated.
        let media = match self
            .provider
            .acquire_media(MediaConstraints::audio_video())
            .await
        {
            Ok(media) => media,
            Err(e) => {
                self.fail_attempt(generation).await;
                return Err(CallError::Media(e));
            }
        };
        let peer = match self.provider.create_peer_connection(&self.ice_config).await {
            Ok(peer) => peer,
            Err(e) => {
                media.stop();
                self.fail_attempt(generation).await;
                return Err(CallError::Media(e));
            }
        };

        // The SDP work happens with the session locked so candidates that
        // race in are either in the queue drained here or applied by their
        // handler strictly afterwards, never out of order.
        let mut slot = self.session.lock().await;
        let session = match slot.as_mut() {
            Some(s) if s.generation == generation && s.phase == CallPhase::Negotiating => s,
            _ => {
                media.stop();
                peer.close();
                return Err(CallError::Cancelled);
            }
        };

        let answer = match async {
            peer.attach_local_media(media.as_ref()).await?;
            peer.set_remote_description(offer).await?;
            let answer = peer.create_answer().await?;
            peer.set_local_description(answer.clone()).await?;
            Ok::<_, super::media::MediaError>(answer)
        }
        .await
        {
            Ok(answer) => answer,
            Err(e) => {
                media.stop();
                peer.close();
                *slot = None;
                return Err(CallError::Media(e));
            }
        };

        for candidate in session.pending_candidates.drain(..) {
            if let Err(e) = peer.add_ice_candidate(candidate).await {
                warn!(target: "Calls", "Failed to apply queued candidate: {e}");
            }
        }
        session.remote_description_set = true;
        let local_candidates = peer.take_local_candidates();
        session.media = Some(media);
        session.peer = Some(peer);

        effects.push(CallEffect::Publish {
            event: EVT_WEBRTC_ANSWER,
            data: to_value(&SessionDescriptionPayload {
                conversation_id: conversation_id.clone(),
                sdp: answer.sdp,
                kind: answer.kind,
                sender_id: self.sender_id(),
                caller_name: None,
            }),
        });
        if let Some(candidates) = local_candidates {
            effects.push(CallEffect::ForwardCandidates {
                conversation_id,
                candidates,
            });
        }
        Ok(effects)
    }

    /// Decline the ringing call without ever touching media.
    pub(crate) async fn decline(&self) -> Result<Vec<CallEffect>, CallError> {
        let mut slot = self.session.lock().await;
        let session = slot.as_mut().ok_or(CallError::NoActiveCall)?;
        if !session.can_decline() {
            return Err(CallError::InvalidState);
        }
        let conversation_id = session.conversation_id.clone();
        session
            .transition(CallPhase::Declined)
            .expect("Ringing -> Declined is always valid");
        session.release_resources();
        *slot = None;

        Ok(vec![
            CallEffect::Publish {
                event: EVT_CALL_REJECTED,
                data: to_value(&CallControlPayload {
                    conversation_id: conversation_id.clone(),
                    sender_id: self.sender_id(),
                }),
            },
            CallEffect::Emit(Event::CallEnded {
                conversation_id,
                reason: CallEndReason::Declined,
            }),
        ])
    }

    /// End the call from any non-terminal state, notifying the remote side.
    pub(crate) async fn hang_up(&self) -> Result<Vec<CallEffect>, CallError> {
        let mut slot = self.session.lock().await;
        let mut session = slot.take().ok_or(CallError::NoActiveCall)?;
        let conversation_id = session.conversation_id.clone();
        session.release_resources();

        Ok(vec![
            CallEffect::Publish {
                event: EVT_END_CALL,
                data: to_value(&CallControlPayload {
                    conversation_id: conversation_id.clone(),
                    sender_id: None,
                }),
            },
            CallEffect::Emit(Event::CallEnded {
                conversation_id,
                reason: CallEndReason::Ended,
            }),
        ])
    }

    /// Toggle already-captured tracks. Only meaningful while negotiating or
    /// active; never renegotiates the connection.
    pub(crate) async fn set_audio_enabled(&self, enabled: bool) -> Result<(), CallError> {
        let slot = self.session.lock().await;
        let session = slot.as_ref().ok_or(CallError::NoActiveCall)?;
        if session.phase.media_toggles_allowed()
            && let Some(media) = session.media.as_ref()
        {
            media.set_audio_enabled(enabled);
        }
        Ok(())
    }

    pub(crate) async fn set_video_enabled(&self, enabled: bool) -> Result<(), CallError> {
        let slot = self.session.lock().await;
        let session = slot.as_ref().ok_or(CallError::NoActiveCall)?;
        if session.phase.media_toggles_allowed()
            && let Some(media) = session.media.as_ref()
        {
            media.set_video_enabled(enabled);
        }
        Ok(())
    }

    /// Inbound `incoming_call`: ring locally without touching media.
    pub(crate) async fn handle_incoming_call(
        &self,
        payload: IncomingCallPayload,
    ) -> Vec<CallEffect> {
        if payload.caller_id == self.identity.id {
            return Vec::new();
        }
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            debug!(target: "Calls", "Ignoring incoming_call while a call is active");
            return Vec::new();
        }
        let generation = self.next_generation();
        *slot = Some(CallSession::new_incoming(
            payload.conversation_id.clone(),
            payload.caller_name.clone(),
            generation,
        ));

        vec![
            CallEffect::Emit(Event::IncomingCall {
                conversation_id: payload.conversation_id.clone(),
                caller_id: payload.caller_id,
                caller_name: payload.caller_name,
            }),
            CallEffect::Emit(Event::CallPhaseChanged {
                conversation_id: payload.conversation_id,
                phase: CallPhase::Ringing,
            }),
        ]
    }

    /// Inbound offer. While idle this rings (the offer can beat the
    /// `incoming_call` notification); while ringing it is held on the
    /// session for `accept` to apply. Anything else is a race and ignored.
    pub(crate) async fn handle_offer(&self, payload: SessionDescriptionPayload) -> Vec<CallEffect> {
        if self.is_own_echo(&payload.sender_id) {
            return Vec::new();
        }
        let offer = SessionDescription {
            kind: if payload.kind.is_empty() {
                "offer".to_string()
            } else {
                payload.kind.clone()
            },
            sdp: payload.sdp.clone(),
        };

        let mut slot = self.session.lock().await;
        match slot.as_mut() {
            None => {
                let generation = self.next_generation();
                let mut session = CallSession::new_incoming(
                    payload.conversation_id.clone(),
                    payload.caller_name.clone(),
                    generation,
                );
                session.pending_offer = Some(offer);
                *slot = Some(session);
                vec![
                    CallEffect::Emit(Event::IncomingCall {
                        conversation_id: payload.conversation_id.clone(),
                        caller_id: payload.sender_id.unwrap_or_default(),
                        caller_name: payload.caller_name,
                    }),
                    CallEffect::Emit(Event::CallPhaseChanged {
                        conversation_id: payload.conversation_id,
                        phase: CallPhase::Ringing,
                    }),
                ]
            }
            Some(session)
                if session.conversation_id == payload.conversation_id
                    && session.phase == CallPhase::Ringing =>
            {
                if session.pending_offer.is_none() {
                    session.pending_offer = Some(offer);
                }
                Vec::new()
            }
            Some(_) => {
                debug!(target: "Calls", "Ignoring offer that matches no ringing call");
                Vec::new()
            }
        }
    }

    /// Inbound answer (caller side). Applied only while negotiating with no
    /// remote description yet; a duplicate answer after the call went
    /// active must not overwrite the remote description.
    pub(crate) async fn handle_answer(
        &self,
        payload: SessionDescriptionPayload,
    ) -> Vec<CallEffect> {
        if self.is_own_echo(&payload.sender_id) {
            return Vec::new();
        }
        let mut slot = self.session.lock().await;
        let Some(session) = slot.as_mut() else {
            debug!(target: "Calls", "Ignoring answer with no active call");
            return Vec::new();
        };
        if session.conversation_id != payload.conversation_id
            || session.phase != CallPhase::Negotiating
            || session.remote_description_set
        {
            debug!(target: "Calls", "Ignoring answer in phase {:?}", session.phase);
            return Vec::new();
        }
        let Some(peer) = session.peer.as_ref() else {
            debug!(target: "Calls", "Ignoring answer before the peer connection exists");
            return Vec::new();
        };

        let answer = SessionDescription {
            kind: if payload.kind.is_empty() {
                "answer".to_string()
            } else {
                payload.kind
            },
            sdp: payload.sdp,
        };
        if let Err(e) = peer.set_remote_description(answer).await {
            warn!(target: "Calls", "Failed to apply answer: {e}");
            let conversation_id = session.conversation_id.clone();
            session.release_resources();
            *slot = None;
            return vec![CallEffect::Emit(Event::CallEnded {
                conversation_id,
                reason: CallEndReason::Failed,
            })];
        }
        session.remote_description_set = true;

        let mut flush_errors = 0usize;
        for candidate in session.pending_candidates.drain(..).collect::<Vec<_>>() {
            if let Some(peer) = session.peer.as_ref()
                && let Err(e) = peer.add_ice_candidate(candidate).await
            {
                warn!(target: "Calls", "Failed to apply queued candidate: {e}");
                flush_errors += 1;
            }
        }
        if flush_errors > 0 {
            debug!(target: "Calls", "{flush_errors} queued candidate(s) failed to apply");
        }

        session
            .transition(CallPhase::Active)
            .expect("Negotiating -> Active is always valid");
        vec![CallEffect::Emit(Event::CallPhaseChanged {
            conversation_id: session.conversation_id.clone(),
            phase: CallPhase::Active,
        })]
    }

    /// Inbound ICE candidate. Own echoes are discarded; candidates ahead of
    /// the remote description are queued in arrival order and flushed when
    /// it is set. A candidate applied directly while still negotiating is
    /// the callee's evidence that the peer is establishing the media path,
    /// which completes its side of the handshake.
    pub(crate) async fn handle_candidate(&self, payload: IceCandidatePayload) -> Vec<CallEffect> {
        if self.is_own_echo(&payload.sender_id) {
            return Vec::new();
        }
        let mut slot = self.session.lock().await;
        let Some(session) = slot.as_mut() else {
            debug!(target: "Calls", "Ignoring candidate with no active call");
            return Vec::new();
        };
        if session.conversation_id != payload.conversation_id {
            debug!(target: "Calls", "Ignoring candidate for another conversation");
            return Vec::new();
        }

        let candidate = IceCandidate(payload.candidate);
        if session.remote_description_set && session.peer.is_some() {
            if let Some(peer) = session.peer.as_ref()
                && let Err(e) = peer.add_ice_candidate(candidate).await
            {
                warn!(target: "Calls", "Failed to apply candidate: {e}");
                return Vec::new();
            }
            if session.phase == CallPhase::Negotiating {
                session
                    .transition(CallPhase::Active)
                    .expect("Negotiating -> Active is always valid");
                return vec![CallEffect::Emit(Event::CallPhaseChanged {
                    conversation_id: session.conversation_id.clone(),
                    phase: CallPhase::Active,
                })];
            }
        } else {
            session.pending_candidates.push(candidate);
        }
        Vec::new()
    }

    /// Inbound `call_rejected`: the remote side declined.
    pub(crate) async fn handle_remote_reject(&self, payload: CallControlPayload) -> Vec<CallEffect> {
        if self.is_own_echo(&payload.sender_id) {
            return Vec::new();
        }
        self.terminate_matching(&payload.conversation_id, CallEndReason::Declined)
            .await
    }

    /// Inbound `end_call`: the remote side hung up. The sender's own echo
    /// finds no session (it was already torn down locally) and is ignored.
    pub(crate) async fn handle_remote_end(&self, payload: CallControlPayload) -> Vec<CallEffect> {
        self.terminate_matching(&payload.conversation_id, CallEndReason::Ended)
            .await
    }

    /// The transport dropped: the active call cannot survive it.
    pub(crate) async fn on_disconnected(&self) -> Vec<CallEffect> {
        let mut slot = self.session.lock().await;
        match slot.take() {
            Some(mut session) => {
                session.release_resources();
                vec![CallEffect::Emit(Event::CallEnded {
                    conversation_id: session.conversation_id.clone(),
                    reason: CallEndReason::ConnectionLost,
                })]
            }
            None => Vec::new(),
        }
    }

    async fn terminate_matching(
        &self,
        conversation_id: &str,
        reason: CallEndReason,
    ) -> Vec<CallEffect> {
        let mut slot = self.session.lock().await;
        match slot.as_mut() {
            Some(session) if session.conversation_id == conversation_id => {
                session.release_resources();
                *slot = None;
                vec![CallEffect::Emit(Event::CallEnded {
                    conversation_id: conversation_id.to_string(),
                    reason,
                })]
            }
            _ => {
                debug!(target: "Calls", "Ignoring call teardown for inactive conversation");
                Vec::new()
            }
        }
    }

    /// Drop the session a failed start/accept attempt was issued against,
    /// unless something newer already owns the slot.
    async fn fail_attempt(&self, generation: u64) {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_mut()
            && session.generation == generation
        {
            session.release_resources();
            *slot = None;
        }
    }
}

fn to_value<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).expect("wire payloads serialize infallibly")
}
