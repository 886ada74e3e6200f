//! Call session state machine.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::media::{IceCandidate, LocalMedia, PeerConnection, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallRole {
    Caller,
    Callee,
}

/// Lifecycle phase of a call. `Idle` is reported when no session exists;
/// sessions themselves only ever hold the other phases, and terminal phases
/// are equivalent to `Idle` for the purpose of starting a new call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallPhase {
    Idle,
    /// Outgoing call: acquiring media and preparing the offer.
    Originating,
    /// Incoming call: ringing locally, no media touched yet.
    Ringing,
    /// Offer/answer exchange in progress.
    Negotiating,
    /// Media path established.
    Active,
    Ended,
    Declined,
    Failed,
}

impl CallPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Declined | Self::Failed)
    }

    pub fn media_toggles_allowed(&self) -> bool {
        matches!(self, Self::Negotiating | Self::Active)
    }
}

/// Why a call reached a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallEndReason {
    /// Hung up by either party.
    Ended,
    /// Declined while ringing.
    Declined,
    /// Media or negotiation failure.
    Failed,
    /// The session connection dropped out from under the call.
    ConnectionLost,
}

impl CallEndReason {
    pub fn terminal_phase(&self) -> CallPhase {
        match self {
            Self::Ended | Self::ConnectionLost => CallPhase::Ended,
            Self::Declined => CallPhase::Declined,
            Self::Failed => CallPhase::Failed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current: CallPhase,
    pub attempted: CallPhase,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {:?} -> {:?}",
            self.current, self.attempted
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// The one mutable call owned by the engine.
///
/// Media and peer handles are attached once acquisition succeeds and
/// released on every terminal transition. ICE candidates that arrive before
/// the remote description is set are queued in arrival order, never dropped:
/// caller-side gathering routinely outruns the offer/answer exchange, and
/// dropping them causes nondeterministic connection failures under ordinary
/// network jitter.
pub struct CallSession {
    pub conversation_id: String,
    pub role: CallRole,
    pub phase: CallPhase,
    pub peer_name: Option<String>,
    /// Distinguishes this session from any later one, so async
    /// continuations started against it can detect they are stale.
    pub generation: u64,
    pub connected_at: Option<DateTime<Utc>>,
    pub(crate) media: Option<Box<dyn LocalMedia>>,
    pub(crate) peer: Option<Box<dyn PeerConnection>>,
    pub(crate) pending_offer: Option<SessionDescription>,
    pub(crate) pending_candidates: Vec<IceCandidate>,
    pub(crate) remote_description_set: bool,
}

impl CallSession {
    pub fn new_outgoing(conversation_id: impl Into<String>, generation: u64) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            role: CallRole::Caller,
            phase: CallPhase::Originating,
            peer_name: None,
            generation,
            connected_at: None,
            media: None,
            peer: None,
            pending_offer: None,
            pending_candidates: Vec::new(),
            remote_description_set: false,
        }
    }

    pub fn new_incoming(
        conversation_id: impl Into<String>,
        peer_name: Option<String>,
        generation: u64,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            role: CallRole::Callee,
            phase: CallPhase::Ringing,
            peer_name,
            generation,
            connected_at: None,
            media: None,
            peer: None,
            pending_offer: None,
            pending_candidates: Vec::new(),
            remote_description_set: false,
        }
    }

    pub fn can_accept(&self) -> bool {
        self.role == CallRole::Callee && self.phase == CallPhase::Ringing
    }

    pub fn can_decline(&self) -> bool {
        self.can_accept()
    }

    /// Seconds since the media path came up, for duration display.
    pub fn duration_secs(&self) -> Option<i64> {
        self.connected_at
            .map(|t| Utc::now().signed_duration_since(t).num_seconds())
    }

    /// Apply a phase transition. Entering `Active` stamps `connected_at`.
    pub fn transition(&mut self, next: CallPhase) -> Result<(), InvalidTransition> {
        let allowed = match (self.phase, next) {
            (CallPhase::Originating, CallPhase::Negotiating) => true,
            (CallPhase::Ringing, CallPhase::Negotiating) => true,
            (CallPhase::Negotiating, CallPhase::Active) => true,
            (from, to) if !from.is_terminal() && to.is_terminal() => true,
            _ => false,
        };
        if !allowed {
            return Err(InvalidTransition {
                current: self.phase,
                attempted: next,
            });
        }
        if next == CallPhase::Active && self.connected_at.is_none() {
            self.connected_at = Some(Utc::now());
        }
        self.phase = next;
        Ok(())
    }

    /// Stop local media, close the peer connection, and drop everything
    /// queued. Safe to call more than once.
    pub(crate) fn release_resources(&mut self) {
        if let Some(media) = self.media.take() {
            media.stop();
        }
        if let Some(peer) = self.peer.take() {
            peer.close();
        }
        self.pending_offer = None;
        self.pending_candidates.clear();
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("conversation_id", &self.conversation_id)
            .field("role", &self.role)
            .field("phase", &self.phase)
            .field("generation", &self.generation)
            .field("has_media", &self.media.is_some())
            .field("has_peer", &self.peer.is_some())
            .field("pending_candidates", &self.pending_candidates.len())
            .field("remote_description_set", &self.remote_description_set)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flow: Originating → Negotiating → Active → Ended.
    #[test]
    fn test_outgoing_call_flow() {
        let mut session = CallSession::new_outgoing("c1", 1);
        assert_eq!(session.phase, CallPhase::Originating);

        session.transition(CallPhase::Negotiating).unwrap();
        session.transition(CallPhase::Active).unwrap();
        assert!(session.connected_at.is_some());

        session.transition(CallPhase::Ended).unwrap();
        assert!(session.phase.is_terminal());
    }

    /// Flow: Ringing → Negotiating → Active.
    #[test]
    fn test_incoming_call_flow() {
        let mut session = CallSession::new_incoming("c1", Some("Ada".into()), 1);
        assert!(session.can_accept());

        session.transition(CallPhase::Negotiating).unwrap();
        assert!(!session.can_accept());
        session.transition(CallPhase::Active).unwrap();
        assert_eq!(session.phase, CallPhase::Active);
    }

    #[test]
    fn test_decline_from_ringing() {
        let mut session = CallSession::new_incoming("c1", None, 1);
        assert!(session.can_decline());
        session.transition(CallPhase::Declined).unwrap();
        assert!(session.phase.is_terminal());
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut session = CallSession::new_outgoing("c1", 1);
        // Can't go Active straight from Originating.
        assert!(session.transition(CallPhase::Active).is_err());
        // Can't ring an outgoing call.
        assert!(session.transition(CallPhase::Ringing).is_err());
    }

    #[test]
    fn test_terminal_phase_rejects_further_transitions() {
        let mut session = CallSession::new_outgoing("c1", 1);
        session.transition(CallPhase::Failed).unwrap();
        assert!(session.transition(CallPhase::Negotiating).is_err());
        assert!(session.transition(CallPhase::Ended).is_err());
    }

    #[test]
    fn test_end_reason_maps_to_phase() {
        assert_eq!(CallEndReason::Ended.terminal_phase(), CallPhase::Ended);
        assert_eq!(
            CallEndReason::ConnectionLost.terminal_phase(),
            CallPhase::Ended
        );
        assert_eq!(
            CallEndReason::Declined.terminal_phase(),
            CallPhase::Declined
        );
        assert_eq!(CallEndReason::Failed.terminal_phase(), CallPhase::Failed);
    }
}
