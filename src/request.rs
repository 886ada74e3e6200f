//! Acknowledgment-based requests over the frame channel.
//!
//! A request is a frame tagged with a generated ack id; the matching reply
//! comes back as an `ack` frame carrying the same id. Waiters pending at
//! disconnect are dropped wholesale; their futures resolve to
//! [`RequestError::ConnectionLost`] and the consumer is expected to re-issue
//! state-establishing requests after the reconnect.

use crate::client::{Client, ClientError};
use crate::socket::Frame;
use log::warn;
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request timed out")]
    Timeout,
    #[error("client is not connected")]
    NotConnected,
    #[error("socket error: {0}")]
    Socket(String),
    #[error("connection lost before the response arrived")]
    ConnectionLost,
    #[error("server error: {0}")]
    Server(String),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl Client {
    /// Generates a new unique request id string.
    pub fn generate_request_id(&self) -> String {
        let count = self.id_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.unique_id, count)
    }

    /// Sends a frame with an ack id and waits for the server's reply.
    pub async fn request(&self, event: &str, data: Value) -> Result<Value, RequestError> {
        let req_id = self.generate_request_id();

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.response_waiters
            .lock()
            .await
            .insert(req_id.clone(), tx);

        let frame = Frame::new(event, data).with_ack(&req_id);
        if let Err(e) = self.send_frame(&frame).await {
            self.response_waiters.lock().await.remove(&req_id);
            return Err(match e {
                ClientError::NotConnected => RequestError::NotConnected,
                other => RequestError::Socket(other.to_string()),
            });
        }

        match timeout(DEFAULT_REQUEST_TIMEOUT, rx).await {
            Ok(Ok(value)) => {
                // Minimal failure convention on top of raw acks: an object
                // with an "error" string is a request failure.
                if let Some(message) = value
                    .as_object()
                    .and_then(|o| o.get("error"))
                    .and_then(|e| e.as_str())
                {
                    return Err(RequestError::Server(message.to_string()));
                }
                Ok(value)
            }
            Ok(Err(_)) => Err(RequestError::ConnectionLost),
            Err(_) => {
                self.response_waiters.lock().await.remove(&req_id);
                Err(RequestError::Timeout)
            }
        }
    }

    /// Handles an inbound ack by forwarding it to the waiting task.
    pub(crate) async fn handle_ack_response(&self, frame: &Frame) -> bool {
        let Some(id) = frame.ack.clone() else {
            return false;
        };
        if let Some(waiter) = self.response_waiters.lock().await.remove(&id) {
            let data = frame.data.clone().unwrap_or(Value::Null);
            if waiter.send(data).is_err() {
                warn!(target: "Client/Ack", "Waiter for ack {id} was dropped before the reply arrived");
            }
            return true;
        }
        false
    }
}
