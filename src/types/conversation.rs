use serde::{Deserialize, Serialize};

/// A two-party conversation as pushed by the server.
///
/// The server denormalizes participant metadata inconsistently across
/// responses, so every display field is optional and aliased over the
/// spellings it has been observed to use. Consumers should go through
/// [`Conversation::display_name`] rather than reading fields directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub participant_id: Option<String>,
    #[serde(
        default,
        rename = "participantName",
        alias = "participant_name",
        alias = "username",
        alias = "name"
    )]
    pub participant_name: Option<String>,
    #[serde(
        default,
        rename = "participantEmail",
        alias = "participant_email",
        alias = "email"
    )]
    pub participant_email: Option<String>,
    #[serde(default, rename = "lastMessage", alias = "last_message")]
    pub last_message: Option<String>,
}

impl Conversation {
    /// Key used to deduplicate conversation-list entries: server id first,
    /// then participant identity, then a synthesized key from contact info.
    /// The first entry seen for a key wins.
    pub fn dedup_key(&self) -> String {
        if let Some(id) = non_empty(&self.id) {
            return id.to_string();
        }
        if let Some(pid) = non_empty(&self.participant_id) {
            return pid.to_string();
        }
        format!(
            "{}-{}",
            non_empty(&self.participant_email).unwrap_or("unknown"),
            non_empty(&self.participant_id).unwrap_or("")
        )
    }

    /// Resolve something presentable even when the server omits the
    /// denormalized fields: name, then email, then a placeholder derived
    /// from a composite `idA_idB` conversation id, then a fixed default.
    pub fn display_name(&self, local_user_id: &str) -> String {
        if let Some(name) = non_empty(&self.participant_name) {
            return name.to_string();
        }
        if let Some(email) = non_empty(&self.participant_email) {
            return email.to_string();
        }
        if let Some(id) = non_empty(&self.id)
            && let Some(other) = other_participant(id, local_user_id)
        {
            return format!("User {other}");
        }
        "Unknown".to_string()
    }
}

/// Extract the non-local component of a composite `idA_idB` conversation id.
fn other_participant<'a>(conversation_id: &'a str, local_user_id: &str) -> Option<&'a str> {
    let (a, b) = conversation_id.split_once('_')?;
    if a == local_user_id {
        Some(b)
    } else {
        Some(a)
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}
