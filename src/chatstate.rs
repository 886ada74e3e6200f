//! Typing indicators: debounced local emission and timed decay of the
//! remote indicator.

use crate::client::Client;
use crate::types::events::Event;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) const TYPING_EVENT: &str = "typing";

/// Quiet period after the last local input before `typing=false` goes out.
const LOCAL_QUIET_PERIOD: Duration = Duration::from_secs(2);
/// How long a remote `typing=true` stays visible without a refresh.
const REMOTE_DECAY: Duration = Duration::from_millis(2500);

const FALLBACK_TYPIST: &str = "Someone";

/// Outbound typing notification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub conversation_id: String,
    pub typing: bool,
}

/// Inbound typing notification. Like the call signaling channel, typing is
/// broadcast to the whole conversation, so the local user's own events come
/// back and must be filtered by `user_id`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub conversation_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    pub typing: bool,
}

struct LocalTyping {
    conversation_id: String,
    generation: u64,
}

struct RemoteTypist {
    username: String,
    generation: u64,
}

/// Ephemeral typing state. Timers are generation-guarded: a stale timer
/// firing after a newer update finds a different generation and does
/// nothing, so teardown never races a callback.
#[derive(Default)]
pub struct ChatStateCoordinator {
    local: Mutex<Option<LocalTyping>>,
    remote: DashMap<String, RemoteTypist>,
    timer_seq: AtomicU64,
}

impl ChatStateCoordinator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn next_generation(&self) -> u64 {
        self.timer_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Who is currently typing in a conversation, if anyone.
    pub fn remote_typist(&self, conversation_id: &str) -> Option<String> {
        self.remote
            .get(conversation_id)
            .map(|t| t.username.clone())
    }

    /// Drop all typing state; used on connection teardown.
    pub(crate) fn clear_all(&self) {
        *self.local.lock().expect("chatstate lock poisoned") = None;
        self.remote.clear();
    }
}

/// Typing operations bound to the live session connection.
pub struct Chatstate {
    client: Arc<Client>,
}

impl Client {
    pub fn chatstate(self: &Arc<Self>) -> Chatstate {
        Chatstate {
            client: self.clone(),
        }
    }
}

impl Chatstate {
    /// Call on every local input change: emits `typing=true` and (re)arms
    /// the quiet timer that emits `typing=false` once input stops.
    /// Switching conversations mid-typing stops the old conversation's
    /// indicator immediately.
    pub async fn notify_input(
        &self,
        conversation_id: &str,
    ) -> Result<(), crate::client::ClientError> {
        let coordinator = &self.client.chatstate;
        let generation = coordinator.next_generation();
        let previous = {
            let mut local = coordinator.local.lock().expect("chatstate lock poisoned");
            let previous = match local.as_ref() {
                Some(state) if state.conversation_id != conversation_id => {
                    Some(state.conversation_id.clone())
                }
                _ => None,
            };
            *local = Some(LocalTyping {
                conversation_id: conversation_id.to_string(),
                generation,
            });
            previous
        };

        if let Some(previous) = previous {
            let _ = self.emit(&previous, false).await;
        }
        self.emit(conversation_id, true).await?;

        let client = self.client.clone();
        let conversation_id = conversation_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(LOCAL_QUIET_PERIOD).await;
            let expired = {
                let mut local = client
                    .chatstate
                    .local
                    .lock()
                    .expect("chatstate lock poisoned");
                match local.as_ref() {
                    Some(state) if state.generation == generation => {
                        *local = None;
                        true
                    }
                    _ => false,
                }
            };
            if expired {
                let _ = client.chatstate().emit(&conversation_id, false).await;
            }
        });
        Ok(())
    }

    async fn emit(
        &self,
        conversation_id: &str,
        typing: bool,
    ) -> Result<(), crate::client::ClientError> {
        let payload = TypingUpdate {
            conversation_id: conversation_id.to_string(),
            typing,
        };
        let data = serde_json::to_value(&payload).map_err(crate::socket::SocketError::from)?;
        self.client.publish(TYPING_EVENT, data).await
    }
}

/// Handle an inbound typing event: ignore our own echo, show at most one
/// typist per conversation, and decay the indicator when no refresh
/// arrives in time.
pub(crate) async fn handle_remote(client: &Arc<Client>, event: TypingEvent) {
    if event.user_id.as_deref() == Some(client.identity().id.as_str()) {
        return;
    }
    let coordinator = &client.chatstate;

    if !event.typing {
        if coordinator.remote.remove(&event.conversation_id).is_some() {
            client.event_bus.dispatch(&Event::RemoteTypingChanged {
                conversation_id: event.conversation_id,
                typist: None,
            });
        }
        return;
    }

    let generation = coordinator.next_generation();
    let username = event
        .username
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_TYPIST.to_string());
    coordinator.remote.insert(
        event.conversation_id.clone(),
        RemoteTypist {
            username: username.clone(),
            generation,
        },
    );
    client.event_bus.dispatch(&Event::RemoteTypingChanged {
        conversation_id: event.conversation_id.clone(),
        typist: Some(username),
    });

    let client = client.clone();
    let conversation_id = event.conversation_id;
    tokio::spawn(async move {
        tokio::time::sleep(REMOTE_DECAY).await;
        let expired = matches!(
            client.chatstate.remote.get(&conversation_id),
            Some(typist) if typist.generation == generation
        );
        if expired {
            client.chatstate.remote.remove(&conversation_id);
            client.event_bus.dispatch(&Event::RemoteTypingChanged {
                conversation_id,
                typist: None,
            });
        }
    });
}
