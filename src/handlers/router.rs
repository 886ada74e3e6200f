use super::traits::FrameHandler;
use crate::client::Client;
use crate::socket::Frame;
use std::collections::HashMap;
use std::sync::Arc;

/// Central router for dispatching inbound frames to their handlers.
///
/// Handlers are keyed by event name; lookup is a single map probe per
/// frame.
pub struct FrameRouter {
    handlers: HashMap<&'static str, Arc<dyn FrameHandler>>,
}

impl FrameRouter {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Router with every protocol handler installed.
    pub fn with_default_handlers() -> Self {
        let mut router = Self::new();
        router.register(Arc::new(super::conversation::ConversationListHandler));
        router.register(Arc::new(super::message::NewMessageHandler));
        router.register(Arc::new(super::chatstate::TypingHandler));
        router.register(Arc::new(super::call::IncomingCallHandler));
        router.register(Arc::new(super::call::OfferHandler));
        router.register(Arc::new(super::call::AnswerHandler));
        router.register(Arc::new(super::call::IceCandidateHandler));
        router.register(Arc::new(super::call::CallRejectedHandler));
        router.register(Arc::new(super::call::EndCallHandler));
        router
    }

    /// Register a handler for its event name.
    ///
    /// # Panics
    /// Panics if a handler is already registered for the same event to
    /// prevent accidental overwrites during initialization.
    pub fn register(&mut self, handler: Arc<dyn FrameHandler>) {
        let event = handler.event();
        if self.handlers.insert(event, handler).is_some() {
            panic!("Handler for event '{}' already registered", event);
        }
    }

    /// Dispatch a frame to its handler. Returns `false` when no handler is
    /// registered for the frame's event.
    pub async fn dispatch(&self, client: Arc<Client>, frame: &Frame) -> bool {
        if let Some(handler) = self.handlers.get(frame.event.as_str()) {
            handler.handle(client, frame).await;
            true
        } else {
            false
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for FrameRouter {
    fn default() -> Self {
        Self::with_default_handlers()
    }
}
