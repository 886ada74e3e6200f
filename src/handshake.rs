use crate::socket::Frame;
use crate::transport::{Transport, TransportEvent};
use log::debug;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const AUTH_EVENT: &str = "auth";
const AUTH_OK_EVENT: &str = "auth_ok";
const AUTH_ERROR_EVENT: &str = "auth_error";

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake send failed: {0}")]
    Send(String),
    #[error("connection closed during handshake")]
    ConnectionClosed,
    #[error("handshake timed out")]
    Timeout,
    #[error("credential rejected: {0}")]
    Rejected(String),
}

/// Presents the bearer credential and waits for the server to admit the
/// session. Runs on every (re)connect, before the frame pump starts, so it
/// consumes the transport event stream directly.
pub(crate) async fn do_handshake(
    transport: &Arc<dyn Transport>,
    transport_events: &mut mpsc::Receiver<TransportEvent>,
    token: &str,
) -> Result<(), HandshakeError> {
    let auth = Frame::new(AUTH_EVENT, json!({ "token": token }))
        .encode()
        .map_err(|e| HandshakeError::Send(e.to_string()))?;
    transport
        .send_text(&auth)
        .await
        .map_err(|e| HandshakeError::Send(e.to_string()))?;

    let wait = async {
        loop {
            match transport_events.recv().await {
                Some(TransportEvent::FrameReceived(text)) => {
                    let frame = match Frame::decode(&text) {
                        Ok(f) => f,
                        Err(e) => {
                            debug!(target: "Handshake", "Ignoring malformed frame: {e}");
                            continue;
                        }
                    };
                    match frame.event.as_str() {
                        AUTH_OK_EVENT => return Ok(()),
                        AUTH_ERROR_EVENT => {
                            let reason = frame
                                .data
                                .as_ref()
                                .and_then(|d| d.get("message"))
                                .and_then(|m| m.as_str())
                                .unwrap_or("unauthorized")
                                .to_string();
                            return Err(HandshakeError::Rejected(reason));
                        }
                        other => {
                            // The server should not push anything before
                            // admitting the session; drop and keep waiting.
                            debug!(target: "Handshake", "Unexpected pre-auth frame: {other}");
                        }
                    }
                }
                Some(TransportEvent::Connected) => continue,
                Some(TransportEvent::Disconnected) | None => {
                    return Err(HandshakeError::ConnectionClosed);
                }
            }
        }
    };

    match tokio::time::timeout(HANDSHAKE_TIMEOUT, wait).await {
        Ok(result) => result,
        Err(_) => Err(HandshakeError::Timeout),
    }
}
