//! Per-conversation message caches with cursor-based backward pagination.

use crate::client::Client;
use crate::request::RequestError;
use crate::types::message::{GetMessagesRequest, Message, MessageKind, SendMessagePayload};
use chrono::{DateTime, Utc};
use log::debug;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Page size for both the initial fetch and backward fetches.
pub const DEFAULT_PAGE_SIZE: usize = 30;

/// What a completed backward fetch did to the cache. The caller uses
/// `prepended` to keep the viewport anchored on the message the user was
/// reading; the paginator itself never touches presentation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrependOutcome {
    pub prepended: usize,
    pub has_older: bool,
}

/// Ordered message cache for one open conversation.
///
/// Invariant: ascending `created_at`, unique ids. `has_older` is inferred
/// from page-size equality: a full page means more data *may* exist. That
/// heuristic can false-positive on an exact boundary; the server provides
/// no total, so this stays documented approximate behavior.
#[derive(Default)]
pub struct MessageCache {
    messages: Vec<Message>,
    has_older: bool,
    fetching_older: bool,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn has_older(&self) -> bool {
        self.has_older
    }

    pub fn is_fetching_older(&self) -> bool {
        self.fetching_older
    }

    fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    pub(crate) fn apply_initial(&mut self, page: Vec<Message>, page_size: usize) {
        self.has_older = page.len() == page_size;
        let mut sorted = page;
        sorted.sort_by_key(|m| m.created_at);
        sorted.dedup_by(|a, b| a.id == b.id);
        self.messages = sorted;
    }

    /// Append an inbound message at the tail, keeping the order invariant
    /// even if the server delivers slightly out of order. Duplicates are
    /// dropped. Returns whether the cache changed.
    pub(crate) fn append(&mut self, message: Message) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        let pos = self
            .messages
            .iter()
            .rposition(|m| m.created_at <= message.created_at)
            .map(|p| p + 1)
            .unwrap_or(0);
        self.messages.insert(pos, message);
        true
    }

    /// Mark a backward fetch as started and yield its cursor. `None` means
    /// the fetch must not happen: one is already in flight, the cache is
    /// empty, or there is nothing older.
    pub(crate) fn begin_older_fetch(&mut self) -> Option<DateTime<Utc>> {
        if self.fetching_older || !self.has_older {
            return None;
        }
        let cursor = self.messages.first()?.created_at;
        self.fetching_older = true;
        Some(cursor)
    }

    pub(crate) fn abort_older_fetch(&mut self) {
        self.fetching_older = false;
    }

    /// Prepend an older page, preserving its order and dropping ids already
    /// cached.
    pub(crate) fn apply_older(&mut self, page: Vec<Message>, page_size: usize) -> PrependOutcome {
        self.fetching_older = false;
        self.has_older = page.len() == page_size;
        let mut fresh: Vec<Message> = page
            .into_iter()
            .filter(|m| !self.contains(&m.id))
            .collect();
        let prepended = fresh.len();
        fresh.append(&mut self.messages);
        self.messages = fresh;
        PrependOutcome {
            prepended,
            has_older: self.has_older,
        }
    }
}

/// Message operations bound to the live session connection.
pub struct Messages {
    client: Arc<Client>,
}

impl Client {
    pub fn messages(self: &Arc<Self>) -> Messages {
        Messages {
            client: self.clone(),
        }
    }
}

impl Messages {
    /// Open a conversation: install a fresh cache and fetch the latest
    /// page. Returns the number of cached messages.
    pub async fn open(&self, conversation_id: &str) -> Result<usize, RequestError> {
        let cache = Arc::new(Mutex::new(MessageCache::new()));
        self.client
            .message_caches
            .insert(conversation_id.to_string(), cache.clone());

        let request = GetMessagesRequest {
            conversation_id: conversation_id.to_string(),
            limit: DEFAULT_PAGE_SIZE,
            before: None,
        };
        let value = self
            .client
            .request("get_messages", serde_json::to_value(&request)?)
            .await?;
        let page: Vec<Message> = serde_json::from_value(value)?;

        if !self.cache_is_current(conversation_id, &cache) {
            debug!(target: "Messages", "Conversation {conversation_id} closed during initial fetch");
            return Ok(0);
        }
        let mut guard = cache.lock().await;
        guard.apply_initial(page, DEFAULT_PAGE_SIZE);
        Ok(guard.messages().len())
    }

    /// Drop the cache for a conversation. In-flight fetches for it discard
    /// their results when they complete.
    pub fn close(&self, conversation_id: &str) {
        self.client.message_caches.remove(conversation_id);
    }

    /// Fetch the page strictly older than the earliest cached message.
    /// Returns `Ok(None)` when the fetch was refused (already in flight,
    /// cache empty or closed, or nothing older); that is a deliberate
    /// no-op, not an error.
    pub async fn fetch_older(
        &self,
        conversation_id: &str,
    ) -> Result<Option<PrependOutcome>, RequestError> {
        let Some(cache) = self.open_cache(conversation_id) else {
            return Ok(None);
        };
        let Some(before) = cache.lock().await.begin_older_fetch() else {
            return Ok(None);
        };

        let request = GetMessagesRequest {
            conversation_id: conversation_id.to_string(),
            limit: DEFAULT_PAGE_SIZE,
            before: Some(before),
        };
        let result = self
            .client
            .request("get_messages", serde_json::to_value(&request)?)
            .await;

        let still_open = self.cache_is_current(conversation_id, &cache);
        match result {
            Ok(value) => {
                let page: Vec<Message> = match serde_json::from_value(value) {
                    Ok(page) => page,
                    Err(e) => {
                        if still_open {
                            cache.lock().await.abort_older_fetch();
                        }
                        return Err(e.into());
                    }
                };
                if !still_open {
                    debug!(target: "Messages", "Conversation {conversation_id} closed during backward fetch");
                    return Ok(None);
                }
                Ok(Some(
                    cache.lock().await.apply_older(page, DEFAULT_PAGE_SIZE),
                ))
            }
            Err(e) => {
                if still_open {
                    cache.lock().await.abort_older_fetch();
                }
                Err(e)
            }
        }
    }

    /// Snapshot of the cached messages for a conversation.
    pub async fn cached(&self, conversation_id: &str) -> Vec<Message> {
        match self.open_cache(conversation_id) {
            Some(cache) => cache.lock().await.messages().to_vec(),
            None => Vec::new(),
        }
    }

    pub async fn has_older(&self, conversation_id: &str) -> bool {
        match self.open_cache(conversation_id) {
            Some(cache) => cache.lock().await.has_older(),
            None => false,
        }
    }

    /// Send a text message. Fire-and-forget: the cache mutates only when
    /// the server echoes the message back through `new_message`.
    pub async fn send_text(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<(), crate::client::ClientError> {
        self.send(SendMessagePayload {
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            kind: MessageKind::Text,
            file_name: None,
        })
        .await
    }

    /// Send an already-uploaded attachment by URL.
    pub async fn send_attachment(
        &self,
        conversation_id: &str,
        url: &str,
        kind: MessageKind,
        file_name: Option<&str>,
    ) -> Result<(), crate::client::ClientError> {
        self.send(SendMessagePayload {
            conversation_id: conversation_id.to_string(),
            content: url.to_string(),
            kind,
            file_name: file_name.map(str::to_string),
        })
        .await
    }

    async fn send(&self, payload: SendMessagePayload) -> Result<(), crate::client::ClientError> {
        let data = serde_json::to_value(&payload)
            .map_err(crate::socket::SocketError::from)?;
        self.client.publish("send_message", data).await
    }

    /// Tail-append for the `new_message` handler. No-op when the
    /// conversation is not open.
    pub(crate) async fn append_inbound(&self, message: &Message) -> bool {
        match self.open_cache(&message.conversation_id) {
            Some(cache) => cache.lock().await.append(message.clone()),
            None => false,
        }
    }

    fn open_cache(&self, conversation_id: &str) -> Option<Arc<Mutex<MessageCache>>> {
        self.client
            .message_caches
            .get(conversation_id)
            .map(|entry| entry.value().clone())
    }

    fn cache_is_current(&self, conversation_id: &str, cache: &Arc<Mutex<MessageCache>>) -> bool {
        matches!(
            self.client.message_caches.get(conversation_id),
            Some(entry) if Arc::ptr_eq(entry.value(), cache)
        )
    }
}
