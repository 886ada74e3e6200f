//! Conversation set, unread counters, and the conversation-list operations.

use crate::client::Client;
use crate::request::RequestError;
use crate::types::conversation::Conversation;
use crate::types::events::Event;
use crate::types::message::Message;
use dashmap::DashMap;
use log::debug;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Holds the deduplicated conversation list and per-conversation unread
/// counters. Purely in-memory; the server owns the data.
pub struct ConversationRegistry {
    local_user_id: String,
    list: Mutex<Vec<Conversation>>,
    unread: DashMap<String, u32>,
    selected: Mutex<Option<String>>,
}

impl ConversationRegistry {
    pub(crate) fn new(local_user_id: String) -> Self {
        Self {
            local_user_id,
            list: Mutex::new(Vec::new()),
            unread: DashMap::new(),
            selected: Mutex::new(None),
        }
    }

    /// Replace the whole set from a conversation-list push, dropping later
    /// entries whose derived key collides with an earlier one.
    pub fn replace_all(&self, conversations: Vec<Conversation>) -> Vec<Conversation> {
        let mut seen = HashSet::new();
        let deduped: Vec<Conversation> = conversations
            .into_iter()
            .filter(|c| seen.insert(c.dedup_key()))
            .collect();
        *self.list.lock().expect("registry lock poisoned") = deduped.clone();
        deduped
    }

    /// Insert or replace one conversation (create-conversation response).
    pub fn upsert(&self, conversation: Conversation) {
        let key = conversation.dedup_key();
        let mut list = self.list.lock().expect("registry lock poisoned");
        match list.iter_mut().find(|c| c.dedup_key() == key) {
            Some(existing) => *existing = conversation,
            None => list.push(conversation),
        }
    }

    /// Bookkeeping for an inbound message: refresh the conversation's
    /// preview and, unless the conversation is the selected one, bump its
    /// unread counter. Returns the new counter value when it changed.
    pub fn record_inbound_message(&self, message: &Message) -> Option<u32> {
        {
            let mut list = self.list.lock().expect("registry lock poisoned");
            if let Some(conversation) = list
                .iter_mut()
                .find(|c| c.id.as_deref() == Some(message.conversation_id.as_str()))
            {
                conversation.last_message = Some(message.preview());
            }
        }

        let selected = self.selected.lock().expect("registry lock poisoned");
        if selected.as_deref() == Some(message.conversation_id.as_str()) {
            return None;
        }
        drop(selected);

        let mut entry = self.unread.entry(message.conversation_id.clone()).or_insert(0);
        *entry += 1;
        Some(*entry)
    }

    /// Focus a conversation, clearing its unread counter the instant it is
    /// selected. Other counters are untouched.
    pub fn select_conversation(&self, id: &str) {
        *self.selected.lock().expect("registry lock poisoned") = Some(id.to_string());
        self.unread.remove(id);
    }

    pub fn selected(&self) -> Option<String> {
        self.selected.lock().expect("registry lock poisoned").clone()
    }

    pub fn unread_count(&self, id: &str) -> u32 {
        self.unread.get(id).map(|c| *c).unwrap_or(0)
    }

    pub fn snapshot(&self) -> Vec<Conversation> {
        self.list.lock().expect("registry lock poisoned").clone()
    }

    /// Display-name resolution with the registry's local identity applied.
    pub fn display_name(&self, conversation: &Conversation) -> String {
        conversation.display_name(&self.local_user_id)
    }
}

/// Conversation-list operations bound to the live session connection.
pub struct Conversations {
    client: Arc<Client>,
}

impl Client {
    pub fn conversations(self: &Arc<Self>) -> Conversations {
        Conversations {
            client: self.clone(),
        }
    }
}

impl Conversations {
    /// Request the conversation list. Callers invoke this on every
    /// `Connected` event; the session does not do it implicitly.
    pub async fn refresh(&self) -> Result<Vec<Conversation>, RequestError> {
        let value = self.client.request("get_conversations", Value::Null).await?;
        let list: Vec<Conversation> = serde_json::from_value(value)?;
        let deduped = self.client.conversation_registry.replace_all(list);
        self.client
            .event_bus
            .dispatch(&Event::ConversationsUpdated {
                conversations: deduped.clone(),
            });
        Ok(deduped)
    }

    /// Create (or look up) the conversation with another user. The ack
    /// carries the conversation id.
    pub async fn create(&self, user_id: &str) -> Result<String, RequestError> {
        let value = self
            .client
            .request("create_conversation", json!({ "userId": user_id }))
            .await?;
        let conversation_id = match &value {
            Value::String(id) => id.clone(),
            Value::Object(obj) => obj
                .get("conversationId")
                .or_else(|| obj.get("id"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| RequestError::Server("missing conversation id".into()))?,
            _ => return Err(RequestError::Server("missing conversation id".into())),
        };

        self.client.conversation_registry.upsert(Conversation {
            id: Some(conversation_id.clone()),
            participant_id: Some(user_id.to_string()),
            ..Default::default()
        });
        self.client
            .event_bus
            .dispatch(&Event::ConversationsUpdated {
                conversations: self.client.conversation_registry.snapshot(),
            });
        Ok(conversation_id)
    }

    /// Mark a conversation as the focused one and zero its unread counter.
    pub fn select(&self, conversation_id: &str) {
        debug!(target: "Conversations", "Selecting {conversation_id}");
        self.client
            .conversation_registry
            .select_conversation(conversation_id);
        self.client.event_bus.dispatch(&Event::UnreadChanged {
            conversation_id: conversation_id.to_string(),
            count: 0,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::types::message::MessageKind;

    fn registry() -> ConversationRegistry {
        ConversationRegistry::new("me".to_string())
    }

    fn conversation(id: &str) -> Conversation {
        Conversation {
            id: Some(id.to_string()),
            ..Default::default()
        }
    }

    fn message(conversation_id: &str, id: &str) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: Some("other".into()),
            sender_name: None,
            content: "hey".into(),
            kind: MessageKind::Text,
            created_at: Utc::now(),
            file_name: None,
        }
    }

    #[test]
    fn test_replace_all_dedups_first_wins() {
        let registry = registry();
        let mut dup = conversation("c1");
        dup.participant_name = Some("Loser".into());
        let mut first = conversation("c1");
        first.participant_name = Some("Winner".into());

        let out = registry.replace_all(vec![first, dup, conversation("c2")]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].participant_name.as_deref(), Some("Winner"));
    }

    #[test]
    fn test_unread_increments_only_for_unselected() {
        let registry = registry();
        registry.replace_all(vec![conversation("c1"), conversation("c2")]);
        registry.select_conversation("c1");

        assert_eq!(registry.record_inbound_message(&message("c1", "m1")), None);
        assert_eq!(registry.unread_count("c1"), 0);

        assert_eq!(
            registry.record_inbound_message(&message("c2", "m2")),
            Some(1)
        );
        assert_eq!(
            registry.record_inbound_message(&message("c2", "m3")),
            Some(2)
        );
        assert_eq!(registry.unread_count("c2"), 2);
    }

    #[test]
    fn test_select_clears_only_own_counter() {
        let registry = registry();
        registry.record_inbound_message(&message("c1", "m1"));
        registry.record_inbound_message(&message("c2", "m2"));

        registry.select_conversation("c1");
        assert_eq!(registry.unread_count("c1"), 0);
        assert_eq!(registry.unread_count("c2"), 1);
    }

    #[test]
    fn test_inbound_message_refreshes_preview() {
        let registry = registry();
        registry.replace_all(vec![conversation("c1")]);
        registry.record_inbound_message(&message("c1", "m1"));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].last_message.as_deref(), Some("hey"));
    }

    #[test]
    fn test_upsert_replaces_matching_key() {
        let registry = registry();
        registry.replace_all(vec![conversation("c1")]);

        let mut updated = conversation("c1");
        updated.participant_name = Some("Ada".into());
        registry.upsert(updated);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].participant_name.as_deref(), Some("Ada"));

        registry.upsert(conversation("c2"));
        assert_eq!(registry.snapshot().len(), 2);
    }
}
