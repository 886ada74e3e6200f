//! Transport seam for the persistent session.
//!
//! The client never touches a socket directly: it consumes a
//! [`TransportEvent`] stream and writes through the [`Transport`] trait, so
//! tests can drive it with an in-memory channel instead of a network.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A text frame has been received from the server.
    FrameReceived(String),
    /// The connection was lost.
    Disconnected,
}

/// Represents an active network connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one text frame to the server.
    async fn send_text(&self, frame: &str) -> Result<(), anyhow::Error>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances, one per
/// (re)connection attempt.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// WebSocket transport backed by tokio-tungstenite.
pub struct WebSocketTransport {
    ws_sink: Mutex<Option<WsSink>>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_text(&self, frame: &str) -> Result<(), anyhow::Error> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("socket is closed"))?;

        trace!("--> {frame}");
        sink.send(Message::text(frame.to_string()))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket send error: {e}"))?;
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(mut sink) = self.ws_sink.lock().await.take() {
            let _ = sink.close().await;
        }
    }
}

/// Factory dialing a fixed URL with the bearer credential attached to the
/// WebSocket upgrade request.
pub struct WebSocketTransportFactory {
    url: String,
    bearer: Option<String>,
}

impl WebSocketTransportFactory {
    pub fn new(url: impl Into<String>, bearer: Option<String>) -> Self {
        Self {
            url: url.into(),
            bearer,
        }
    }
}

#[async_trait]
impl TransportFactory for WebSocketTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        info!("Dialing {}", self.url);
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| anyhow::anyhow!("invalid WebSocket URL: {e}"))?;
        if let Some(token) = &self.bearer {
            request.headers_mut().insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|e| anyhow::anyhow!("invalid bearer credential: {e}"))?,
            );
        }

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket connect failed: {e}"))?;
        let (sink, stream) = ws.split();

        let (event_tx, event_rx) = mpsc::channel(100);
        let transport = Arc::new(WebSocketTransport {
            ws_sink: Mutex::new(Some(sink)),
        });

        tokio::spawn(read_pump(stream, event_tx.clone()));
        let _ = event_tx.send(TransportEvent::Connected).await;

        Ok((transport, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    loop {
        match stream.next().await {
            Some(Ok(msg)) => {
                if msg.is_text() {
                    let text = match msg.to_text() {
                        Ok(t) => t.to_string(),
                        Err(e) => {
                            warn!("Dropping non-UTF8 text frame: {e}");
                            continue;
                        }
                    };
                    debug!("<-- {text}");
                    if event_tx
                        .send(TransportEvent::FrameReceived(text))
                        .await
                        .is_err()
                    {
                        warn!("Event receiver dropped, closing read pump");
                        break;
                    }
                } else if msg.is_close() {
                    trace!("Received close frame");
                    break;
                }
            }
            Some(Err(e)) => {
                error!("Error reading from websocket: {e}");
                break;
            }
            None => {
                trace!("Websocket stream ended");
                break;
            }
        }
    }

    let _ = event_tx.send(TransportEvent::Disconnected).await;
}
