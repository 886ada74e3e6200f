//! The session connection: one long-lived authenticated transport with
//! auto-reconnect, a typed publish surface, and inbound dispatch to the
//! conversation registry, message caches, typing coordinator, and call
//! engine.

use crate::calls::engine::CallEngine;
use crate::calls::media::{IceConfig, MediaProvider};
use crate::chatstate::ChatStateCoordinator;
use crate::config::ClientConfig;
use crate::conversations::ConversationRegistry;
use crate::handlers::router::FrameRouter;
use crate::handshake::do_handshake;
use crate::messages::MessageCache;
use crate::socket::{Frame, SocketError};
use crate::transport::{Transport, TransportEvent, TransportFactory};
use crate::types::events::{Connected, Disconnected, Event, EventBus};
use crate::types::user::UserIdentity;

use dashmap::DashMap;
use log::{debug, error, info, warn};
use rand::RngCore;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, Notify, mpsc, oneshot};
use tokio::time::{Duration, sleep};

/// Fixed delay between reconnection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is not connected")]
    NotConnected,
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),
    #[error("client is already connected")]
    AlreadyConnected,
}

pub struct Client {
    config: ClientConfig,
    pub(crate) event_bus: EventBus,

    transport: Mutex<Option<Arc<dyn Transport>>>,
    transport_events: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    transport_factory: Arc<dyn TransportFactory>,

    is_connected: AtomicBool,
    is_connecting: AtomicBool,
    is_running: AtomicBool,
    pub enable_auto_reconnect: AtomicBool,
    shutdown_notifier: Notify,

    pub(crate) response_waiters: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    pub(crate) unique_id: String,
    pub(crate) id_counter: AtomicU64,

    pub(crate) conversation_registry: ConversationRegistry,
    pub(crate) message_caches: DashMap<String, Arc<Mutex<MessageCache>>>,
    pub(crate) chatstate: ChatStateCoordinator,
    pub(crate) call_engine: CallEngine,

    router: FrameRouter,
}

impl Client {
    pub fn new(
        config: ClientConfig,
        transport_factory: Arc<dyn TransportFactory>,
        media_provider: Arc<dyn MediaProvider>,
    ) -> Arc<Self> {
        let mut unique_id_bytes = [0u8; 2];
        rand::rng().fill_bytes(&mut unique_id_bytes);

        let identity = config.user.clone();
        Arc::new(Self {
            event_bus: EventBus::new(),
            transport: Mutex::new(None),
            transport_events: Mutex::new(None),
            transport_factory,
            is_connected: AtomicBool::new(false),
            is_connecting: AtomicBool::new(false),
            is_running: AtomicBool::new(false),
            enable_auto_reconnect: AtomicBool::new(true),
            shutdown_notifier: Notify::new(),
            response_waiters: Mutex::new(HashMap::new()),
            unique_id: format!("{}.{}", unique_id_bytes[0], unique_id_bytes[1]),
            id_counter: AtomicU64::new(0),
            conversation_registry: ConversationRegistry::new(identity.id.clone()),
            message_caches: DashMap::new(),
            chatstate: ChatStateCoordinator::new(),
            call_engine: CallEngine::new(identity, media_provider, IceConfig::default()),
            router: FrameRouter::with_default_handlers(),
            config,
        })
    }

    pub fn identity(&self) -> &UserIdentity {
        &self.config.user
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn registry(&self) -> &ConversationRegistry {
        &self.conversation_registry
    }

    pub fn typing(&self) -> &ChatStateCoordinator {
        &self.chatstate
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::Relaxed)
    }

    /// Connect and keep the session alive until [`Client::disconnect`] is
    /// called. Every drop is followed by a fixed-delay reconnect with a
    /// fresh handshake; transport failures never escape this loop.
    pub async fn run(self: &Arc<Self>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!("Client `run` method called while already running.");
            return;
        }
        while self.is_running.load(Ordering::Relaxed) {
            match self.connect().await {
                Err(e) => error!("Failed to connect: {e:#}"),
                Ok(()) => {
                    self.read_frames_loop().await;
                    self.cleanup_connection_state().await;
                }
            }

            if !self.enable_auto_reconnect.load(Ordering::Relaxed)
                || !self.is_running.load(Ordering::Relaxed)
            {
                self.is_running.store(false, Ordering::Relaxed);
                break;
            }

            info!("Will attempt to reconnect in {RECONNECT_DELAY:?}");
            tokio::select! {
                _ = sleep(RECONNECT_DELAY) => {}
                _ = self.shutdown_notifier.notified() => break,
            }
        }
        info!("Client run loop has shut down.");
    }

    /// Establish the transport and run the credential handshake. Emits
    /// `Event::Connected` on success; the consumer re-requests the
    /// conversation list in response (the session does not do it for them).
    pub async fn connect(self: &Arc<Self>) -> Result<(), anyhow::Error> {
        if self.is_connecting.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyConnected.into());
        }
        let _guard = scopeguard::guard((), |_| {
            self.is_connecting.store(false, Ordering::Relaxed);
        });
        if self.is_connected() {
            return Err(ClientError::AlreadyConnected.into());
        }

        let (transport, mut transport_events) =
            self.transport_factory.create_transport().await?;
        do_handshake(&transport, &mut transport_events, &self.config.token).await?;

        *self.transport.lock().await = Some(transport);
        *self.transport_events.lock().await = Some(transport_events);
        self.is_connected.store(true, Ordering::SeqCst);
        info!("Session established.");
        self.event_bus.dispatch(&Event::Connected(Connected));
        Ok(())
    }

    /// Pump inbound frames until the connection drops or shutdown is
    /// signaled. Each frame's handler runs to completion before the next
    /// frame is dispatched.
    async fn read_frames_loop(self: &Arc<Self>) {
        let Some(mut events) = self.transport_events.lock().await.take() else {
            return;
        };
        loop {
            tokio::select! {
                maybe_event = events.recv() => match maybe_event {
                    Some(TransportEvent::FrameReceived(text)) => {
                        self.handle_inbound_frame(&text).await;
                    }
                    Some(TransportEvent::Connected) => {}
                    Some(TransportEvent::Disconnected) | None => {
                        info!("Connection lost.");
                        break;
                    }
                },
                _ = self.shutdown_notifier.notified() => {
                    debug!("Shutdown signaled, leaving frame loop.");
                    break;
                }
            }
        }
    }

    async fn handle_inbound_frame(self: &Arc<Self>, text: &str) {
        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(target: "Client/Recv", "Dropping malformed frame: {e}");
                return;
            }
        };
        if frame.is_ack() {
            if !self.handle_ack_response(&frame).await {
                debug!(target: "Client/Recv", "Ack with no waiter (abandoned request?)");
            }
            return;
        }
        if !self.router.dispatch(self.clone(), &frame).await {
            debug!(target: "Client/Recv", "No handler for event '{}'", frame.event);
        }
    }

    /// Intentional shutdown: stops the run loop and tears the connection
    /// down.
    pub async fn disconnect(self: &Arc<Self>) {
        info!("Disconnecting client intentionally.");
        self.is_running.store(false, Ordering::Relaxed);
        self.shutdown_notifier.notify_waiters();
        if let Some(transport) = self.transport.lock().await.as_ref() {
            transport.disconnect().await;
        }
        self.cleanup_connection_state().await;
    }

    /// Reset per-connection state. Idempotent; runs after every loop exit
    /// and on explicit disconnect. Pending ack waiters are abandoned (their
    /// requests resolve to `ConnectionLost`), typing state is dropped, and
    /// the active call, if any, cannot survive the transport.
    pub(crate) async fn cleanup_connection_state(self: &Arc<Self>) {
        let was_connected = self.is_connected.swap(false, Ordering::SeqCst);
        *self.transport.lock().await = None;
        *self.transport_events.lock().await = None;
        self.response_waiters.lock().await.clear();
        self.chatstate.clear_all();

        let effects = self.call_engine.on_disconnected().await;
        crate::calls::execute_effects(self, effects).await;

        if was_connected {
            self.event_bus.dispatch(&Event::Disconnected(Disconnected));
        }
    }

    /// Fire-and-forget frame publish.
    pub async fn publish(&self, event: &str, data: Value) -> Result<(), ClientError> {
        self.send_frame(&Frame::new(event, data)).await
    }

    pub(crate) async fn send_frame(&self, frame: &Frame) -> Result<(), ClientError> {
        let transport = { self.transport.lock().await.clone() };
        let Some(transport) = transport else {
            return Err(ClientError::NotConnected);
        };
        let text = frame.encode()?;
        transport
            .send_text(&text)
            .await
            .map_err(|e| ClientError::Socket(SocketError::Send(e.to_string())))
    }
}
