//! Opaque media and peer-connection handles.
//!
//! The signaling engine never touches a real capture device or RTC stack;
//! it drives these traits and owns the returned handles exclusively for the
//! lifetime of one call, releasing them on every terminal transition. The
//! embedder supplies the real implementation; headless builds fall back to
//! [`UnsupportedMediaProvider`], which degrades every call attempt to the
//! media-unavailable error path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media capture permission was denied")]
    PermissionDenied,
    #[error("media devices are unavailable")]
    Unavailable,
    #[error("media backend error: {0}")]
    Backend(String),
}

/// What to capture for a call. Audio is always requested; video only for
/// video calls.
#[derive(Debug, Clone, Copy)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }

    pub fn audio_video() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
}

/// STUN/TURN configuration handed to the peer connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceConfig {
    pub ice_servers: Vec<IceServer>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                IceServer {
                    urls: vec!["stun:stun.l.google.com:19302".into()],
                },
                IceServer {
                    urls: vec!["stun:stun1.l.google.com:19302".into()],
                },
                IceServer {
                    urls: vec!["stun:stun2.l.google.com:19302".into()],
                },
                IceServer {
                    urls: vec!["stun:stun3.l.google.com:19302".into()],
                },
            ],
        }
    }
}

/// An SDP session description produced or consumed by a peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// `"offer"` or `"answer"`.
    pub kind: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "offer".into(),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "answer".into(),
            sdp: sdp.into(),
        }
    }
}

/// An ICE candidate as exchanged over signaling. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate(pub serde_json::Value);

/// Entry point the embedder implements to supply capture devices and peer
/// connections.
#[async_trait]
pub trait MediaProvider: Send + Sync {
    async fn acquire_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Box<dyn LocalMedia>, MediaError>;

    async fn create_peer_connection(
        &self,
        config: &IceConfig,
    ) -> Result<Box<dyn PeerConnection>, MediaError>;
}

/// A captured local media stream. Track toggles flip already-captured
/// tracks; they never renegotiate the connection.
pub trait LocalMedia: Send + Sync {
    fn set_audio_enabled(&self, enabled: bool);
    fn set_video_enabled(&self, enabled: bool);
    /// Stops all tracks and releases the capture device.
    fn stop(&self);
}

/// A peer connection under negotiation.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn attach_local_media(&self, media: &dyn LocalMedia) -> Result<(), MediaError>;
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;
    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;

    /// Stream of locally gathered candidates, for forwarding over
    /// signaling. Yields `None` once; the implementation closes the channel
    /// when gathering finishes or the connection is closed.
    fn take_local_candidates(&self) -> Option<mpsc::UnboundedReceiver<IceCandidate>>;

    fn close(&self);
}

/// Provider for builds with no media stack. Every call attempt fails with
/// [`MediaError::Unavailable`], which the engine turns into a clean abort.
#[derive(Debug, Default)]
pub struct UnsupportedMediaProvider;

#[async_trait]
impl MediaProvider for UnsupportedMediaProvider {
    async fn acquire_media(
        &self,
        _constraints: MediaConstraints,
    ) -> Result<Box<dyn LocalMedia>, MediaError> {
        Err(MediaError::Unavailable)
    }

    async fn create_peer_connection(
        &self,
        _config: &IceConfig,
    ) -> Result<Box<dyn PeerConnection>, MediaError> {
        Err(MediaError::Unavailable)
    }
}
