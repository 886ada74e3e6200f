use crate::types::user::UserIdentity;

/// Everything the session needs to identify itself: the bearer credential
/// presented in the handshake and the local user identity used to filter
/// self-echoed events. Threaded in explicitly; nothing reads ambient state.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub token: String,
    pub user: UserIdentity,
}

impl ClientConfig {
    pub fn new(token: impl Into<String>, user: UserIdentity) -> Self {
        Self {
            token: token.into(),
            user,
        }
    }
}
