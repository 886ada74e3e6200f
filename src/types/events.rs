use crate::calls::state::{CallEndReason, CallPhase};
use crate::types::conversation::Conversation;
use crate::types::message::Message;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Serialize)]
pub struct Connected;

#[derive(Debug, Clone, Serialize)]
pub struct Disconnected;

/// Everything the session surfaces to its consumer. Transport failures are
/// never raised as errors; they appear only as `Connected` / `Disconnected`
/// transitions. On every `Connected` the consumer is expected to re-request
/// the conversation list.
#[derive(Debug, Clone, Serialize)]
pub enum Event {
    Connected(Connected),
    Disconnected(Disconnected),
    /// The conversation set changed (full list push or create response).
    ConversationsUpdated { conversations: Vec<Conversation> },
    /// A message arrived over the session, either from the remote peer or
    /// as the echo of a local send.
    MessageReceived(Message),
    /// A conversation's unread counter changed.
    UnreadChanged { conversation_id: String, count: u32 },
    /// The remote typing indicator for a conversation changed; `typist` is
    /// `None` when the indicator cleared.
    RemoteTypingChanged {
        conversation_id: String,
        typist: Option<String>,
    },
    /// Someone is calling; surface accept/decline to the user.
    IncomingCall {
        conversation_id: String,
        caller_id: String,
        caller_name: Option<String>,
    },
    /// The active call moved to a new lifecycle phase.
    CallPhaseChanged {
        conversation_id: String,
        phase: CallPhase,
    },
    /// The active call reached a terminal state and its resources were
    /// released.
    CallEnded {
        conversation_id: String,
        reason: CallEndReason,
    },
}

pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event);
}

/// Adapter so closures can subscribe without a named handler type.
struct FnEventHandler<F: Fn(&Event) + Send + Sync>(F);

impl<F: Fn(&Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn handle_event(&self, event: &Event) {
        (self.0)(event)
    }
}

/// Token returned by a subscription, for unsubscribing later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

#[derive(Default, Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<(HandlerId, Arc<dyn EventHandler>)>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .expect("RwLock should not be poisoned")
            .push((id, handler));
        id
    }

    pub fn add_fn(&self, handler: impl Fn(&Event) + Send + Sync + 'static) -> HandlerId {
        self.add_handler(Arc::new(FnEventHandler(handler)))
    }

    pub fn remove_handler(&self, id: HandlerId) {
        self.handlers
            .write()
            .expect("RwLock should not be poisoned")
            .retain(|(handler_id, _)| *handler_id != id);
    }

    pub fn dispatch(&self, event: &Event) {
        for (_, handler) in self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .iter()
        {
            handler.handle_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_bus_dispatches_to_all_handlers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = count.clone();
            bus.add_fn(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.dispatch(&Event::Connected(Connected));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_removed_handler_stops_receiving() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let id = bus.add_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.dispatch(&Event::Connected(Connected));
        bus.remove_handler(id);
        bus.dispatch(&Event::Connected(Connected));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
