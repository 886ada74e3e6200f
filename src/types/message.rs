use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of characters of message text carried in a conversation
/// preview before truncation.
const PREVIEW_MAX_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    Voice,
    File,
}

impl MessageKind {
    /// Classify an upload by its MIME type, the way the web client picks a
    /// message kind for an attachment.
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image") {
            Self::Image
        } else if mime.starts_with("video") {
            Self::Video
        } else if mime.starts_with("audio") {
            Self::Voice
        } else {
            Self::File
        }
    }

    pub fn is_attachment(&self) -> bool {
        !matches!(self, Self::Text)
    }
}

/// A chat message as delivered by the server.
///
/// `created_at` doubles as the pagination cursor: backward fetches request
/// messages strictly older than the earliest cached timestamp. Field aliases
/// absorb the server's mixed snake/camel naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(alias = "conversationId")]
    pub conversation_id: String,
    #[serde(default, alias = "senderId")]
    pub sender_id: Option<String>,
    #[serde(default, rename = "senderName", alias = "sender_name")]
    pub sender_name: Option<String>,
    pub content: String,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    #[serde(alias = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(
        default,
        rename = "fileName",
        alias = "file_name",
        skip_serializing_if = "Option::is_none"
    )]
    pub file_name: Option<String>,
}

impl Message {
    /// Short single-line text used for conversation previews and
    /// notifications. Attachments collapse to a placeholder.
    pub fn preview(&self) -> String {
        if self.kind.is_attachment() {
            return "[attachment]".to_string();
        }
        if self.content.chars().count() <= PREVIEW_MAX_CHARS {
            self.content.clone()
        } else {
            self.content.chars().take(PREVIEW_MAX_CHARS).collect()
        }
    }
}

/// Outbound `send_message` payload. The echo that comes back as
/// `new_message` is the only thing that mutates local caches.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub conversation_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// Outbound `get_messages` request. `before` bounds the page to messages
/// strictly older than the cursor; omitted for the initial (latest) page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMessagesRequest {
    pub conversation_id: String,
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<DateTime<Utc>>,
}
