//! Test harness: a channel-backed transport that stands in for the
//! WebSocket, plus a scripted media provider, so the whole client can be
//! driven end-to-end without a network or a capture device.

#![allow(dead_code)]

use async_trait::async_trait;
use chatflow::calls::media::{
    IceCandidate, IceConfig, LocalMedia, MediaConstraints, MediaError, MediaProvider,
    PeerConnection, SessionDescription,
};
use chatflow::client::Client;
use chatflow::config::ClientConfig;
use chatflow::socket::Frame;
use chatflow::transport::{Transport, TransportEvent, TransportFactory};
use chatflow::types::events::Event;
use chatflow::types::user::UserIdentity;
use chrono::DateTime;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One simulated connection: inject server frames in, observe client
/// frames out.
pub struct TestConnection {
    pub inject: mpsc::Sender<TransportEvent>,
    pub sent: mpsc::UnboundedReceiver<Frame>,
}

impl TestConnection {
    /// Push a server-sent frame at the client.
    pub async fn inject_frame(&self, event: &str, data: Value) {
        let text = Frame::new(event, data).encode().unwrap();
        self.inject
            .send(TransportEvent::FrameReceived(text))
            .await
            .unwrap();
    }

    /// Answer a pending request by ack id.
    pub async fn inject_ack(&self, ack_id: &str, data: Value) {
        let text = Frame::new("ack", data).with_ack(ack_id).encode().unwrap();
        self.inject
            .send(TransportEvent::FrameReceived(text))
            .await
            .unwrap();
    }

    /// Simulate the connection dropping out from under the client.
    pub async fn drop_connection(&self) {
        let _ = self.inject.send(TransportEvent::Disconnected).await;
    }

    /// Next frame the client sent; panics if none arrives.
    pub async fn next_sent(&mut self) -> Frame {
        self.sent.recv().await.expect("client sent no frame")
    }

    /// Next frame with the given event name, asserting nothing unexpected
    /// was sent before it.
    pub async fn expect_sent(&mut self, event: &str) -> Frame {
        let frame = self.next_sent().await;
        assert_eq!(frame.event, event, "unexpected outbound frame");
        frame
    }

    /// Assert the client has sent nothing (after letting tasks settle).
    pub async fn assert_quiet(&mut self) {
        settle().await;
        assert!(
            self.sent.try_recv().is_err(),
            "client sent an unexpected frame"
        );
    }
}

struct ChannelTransport {
    outbound: mpsc::UnboundedSender<Frame>,
    events: mpsc::Sender<TransportEvent>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_text(&self, frame: &str) -> Result<(), anyhow::Error> {
        let frame = Frame::decode(frame)?;
        // The auth handshake frame is auto-accepted by the factory; keep it
        // out of the observable stream so tests start at the first app frame.
        if frame.event != "auth" {
            let _ = self.outbound.send(frame);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        // A real socket closing surfaces as a Disconnected event from the
        // read pump; mirror that so shutdown never hangs on a parked
        // frame loop.
        let _ = self.events.send(TransportEvent::Disconnected).await;
    }
}

/// Factory producing one [`TestConnection`] per (re)connect. The auth
/// handshake is auto-accepted by pre-queueing `auth_ok`.
pub struct ChannelTransportFactory {
    connections: StdMutex<mpsc::UnboundedSender<TestConnection>>,
}

impl ChannelTransportFactory {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TestConnection>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                connections: StdMutex::new(tx),
            },
            rx,
        )
    }
}

#[async_trait]
impl TransportFactory for ChannelTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        let (event_tx, event_rx) = mpsc::channel(100);
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        event_tx.send(TransportEvent::Connected).await.unwrap();
        event_tx
            .send(TransportEvent::FrameReceived(
                Frame::new("auth_ok", Value::Null).encode().unwrap(),
            ))
            .await
            .unwrap();

        self.connections
            .lock()
            .unwrap()
            .send(TestConnection {
                inject: event_tx.clone(),
                sent: out_rx,
            })
            .unwrap();

        Ok((
            Arc::new(ChannelTransport {
                outbound: out_tx,
                events: event_tx,
            }),
            event_rx,
        ))
    }
}

#[derive(Default)]
struct TestMedia {
    stopped: AtomicBool,
}

impl LocalMedia for TestMedia {
    fn set_audio_enabled(&self, _enabled: bool) {}
    fn set_video_enabled(&self, _enabled: bool) {}
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

struct TestPeer;

#[async_trait]
impl PeerConnection for TestPeer {
    async fn attach_local_media(&self, _media: &dyn LocalMedia) -> Result<(), MediaError> {
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        Ok(SessionDescription::offer("sdp-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        Ok(SessionDescription::answer("sdp-answer"))
    }

    async fn set_local_description(&self, _desc: SessionDescription) -> Result<(), MediaError> {
        Ok(())
    }

    async fn set_remote_description(&self, _desc: SessionDescription) -> Result<(), MediaError> {
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<(), MediaError> {
        Ok(())
    }

    fn take_local_candidates(&self) -> Option<mpsc::UnboundedReceiver<IceCandidate>> {
        None
    }

    fn close(&self) {}
}

/// Scripted provider: counts acquisitions so tests can assert that ringing
/// and declining never touch media.
#[derive(Default)]
pub struct TestMediaProvider {
    pub acquisitions: AtomicUsize,
    pub fail_media: AtomicBool,
}

#[async_trait]
impl MediaProvider for TestMediaProvider {
    async fn acquire_media(
        &self,
        _constraints: MediaConstraints,
    ) -> Result<Box<dyn LocalMedia>, MediaError> {
        if self.fail_media.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied);
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestMedia::default()))
    }

    async fn create_peer_connection(
        &self,
        _config: &IceConfig,
    ) -> Result<Box<dyn PeerConnection>, MediaError> {
        Ok(Box::new(TestPeer))
    }
}

/// Record of everything dispatched on the event bus.
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<StdMutex<Vec<Event>>>,
}

impl EventRecorder {
    pub fn install(client: &Arc<Client>) -> Self {
        let recorder = Self::default();
        let events = recorder.events.clone();
        client.event_bus().add_fn(move |event| {
            events.lock().unwrap().push(event.clone());
        });
        recorder
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count_where(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }
}

/// A fully wired client on a channel transport, with its run loop spawned
/// and the first connection established.
pub struct TestSession {
    pub client: Arc<Client>,
    pub conn: TestConnection,
    pub connections: mpsc::UnboundedReceiver<TestConnection>,
    pub events: EventRecorder,
    run_task: JoinHandle<()>,
}

impl TestSession {
    pub async fn start(user_id: &str, username: &str, media: Arc<dyn MediaProvider>) -> Self {
        let (factory, mut connections) = ChannelTransportFactory::new();
        let config = ClientConfig::new(
            "test-token",
            UserIdentity::new(user_id).with_username(username),
        );
        let client = Client::new(config, Arc::new(factory), media);
        let events = EventRecorder::install(&client);

        let run_client = client.clone();
        let run_task = tokio::spawn(async move { run_client.run().await });

        let conn = connections.recv().await.expect("client never connected");
        wait_until(|| client.is_connected()).await;

        Self {
            client,
            conn,
            connections,
            events,
            run_task,
        }
    }

    /// Wait for the run loop to re-establish after a drop and swap in the
    /// fresh connection.
    pub async fn await_reconnect(&mut self) {
        let conn = self
            .connections
            .recv()
            .await
            .expect("client never reconnected");
        self.conn = conn;
        wait_until(|| self.client.is_connected()).await;
    }

    pub async fn shutdown(self) {
        self.client.disconnect().await;
        let _ = self.run_task.await;
    }
}

/// Let spawned tasks make progress without advancing the clock.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

pub async fn wait_until(predicate: impl Fn() -> bool) {
    for _ in 0..1024 {
        if predicate() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}

/// A server-shaped message payload with a deterministic timestamp.
pub fn message_json(conversation_id: &str, id: &str, sender_id: &str, secs: i64) -> Value {
    json!({
        "id": id,
        "conversation_id": conversation_id,
        "sender_id": sender_id,
        "senderName": "Remote",
        "content": format!("message {id}"),
        "type": "text",
        "created_at": DateTime::from_timestamp(secs, 0).unwrap().to_rfc3339(),
    })
}

/// A page of server-shaped messages covering `range` seconds.
pub fn message_page(conversation_id: &str, sender_id: &str, range: std::ops::Range<i64>) -> Value {
    Value::Array(
        range
            .map(|i| message_json(conversation_id, &format!("m{i}"), sender_id, i))
            .collect(),
    )
}
