use thiserror::Error;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket is closed")]
    SocketClosed,
    #[error("malformed frame: {0}")]
    Frame(#[from] serde_json::Error),
    #[error("send failed: {0}")]
    Send(String),
}
