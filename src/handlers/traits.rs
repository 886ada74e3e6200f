use crate::client::Client;
use crate::socket::Frame;
use async_trait::async_trait;
use std::sync::Arc;

/// A handler for one named inbound event.
///
/// Handlers run to completion before the next frame is dispatched, so each
/// one observes a consistent view of client state. Malformed payloads are a
/// handler-local concern: log and drop, never propagate.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    /// The event name this handler owns.
    fn event(&self) -> &'static str;

    async fn handle(&self, client: Arc<Client>, frame: &Frame);
}
