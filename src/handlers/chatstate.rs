use super::traits::FrameHandler;
use crate::chatstate::{self, TypingEvent};
use crate::client::Client;
use crate::socket::Frame;
use async_trait::async_trait;
use log::warn;
use std::sync::Arc;

/// `typing`: remote typing notifications (and our own echoes, which the
/// coordinator filters out).
pub struct TypingHandler;

#[async_trait]
impl FrameHandler for TypingHandler {
    fn event(&self) -> &'static str {
        "typing"
    }

    async fn handle(&self, client: Arc<Client>, frame: &Frame) {
        let event: TypingEvent = match frame.parse_data() {
            Ok(event) => event,
            Err(e) => {
                warn!(target: "Chatstate", "Dropping malformed typing event: {e}");
                return;
            }
        };
        chatstate::handle_remote(&client, event).await;
    }
}
