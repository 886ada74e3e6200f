use super::traits::FrameHandler;
use crate::client::Client;
use crate::socket::Frame;
use crate::types::events::Event;
use crate::types::message::Message;
use async_trait::async_trait;
use log::warn;
use std::sync::Arc;

/// `new_message`: an inbound message, including the echo of a local send.
///
/// Order matters: unread bookkeeping first, then the cache append, then the
/// public event, so a consumer reacting to `MessageReceived` observes
/// consistent counters and cache contents.
pub struct NewMessageHandler;

#[async_trait]
impl FrameHandler for NewMessageHandler {
    fn event(&self) -> &'static str {
        "new_message"
    }

    async fn handle(&self, client: Arc<Client>, frame: &Frame) {
        let message: Message = match frame.parse_data() {
            Ok(message) => message,
            Err(e) => {
                warn!(target: "Messages", "Dropping malformed message: {e}");
                return;
            }
        };

        if let Some(count) = client.conversation_registry.record_inbound_message(&message) {
            client.event_bus.dispatch(&Event::UnreadChanged {
                conversation_id: message.conversation_id.clone(),
                count,
            });
        }

        client.messages().append_inbound(&message).await;
        client.event_bus.dispatch(&Event::MessageReceived(message));
    }
}
