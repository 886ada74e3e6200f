use super::traits::FrameHandler;
use crate::client::Client;
use crate::socket::Frame;
use crate::types::conversation::Conversation;
use crate::types::events::Event;
use async_trait::async_trait;
use log::warn;
use std::sync::Arc;

/// `conversation_list`: full conversation-set push from the server.
pub struct ConversationListHandler;

#[async_trait]
impl FrameHandler for ConversationListHandler {
    fn event(&self) -> &'static str {
        "conversation_list"
    }

    async fn handle(&self, client: Arc<Client>, frame: &Frame) {
        let list: Vec<Conversation> = match frame.parse_data() {
            Ok(list) => list,
            Err(e) => {
                warn!(target: "Conversations", "Dropping malformed conversation list: {e}");
                return;
            }
        };
        let deduped = client.conversation_registry.replace_all(list);
        client.event_bus.dispatch(&Event::ConversationsUpdated {
            conversations: deduped,
        });
    }
}
