//! Companion request/response channel, outside the persistent connection:
//! account creation, login, user search, and binary upload. These are
//! external collaborators of the session core: a thin blocking client, the
//! way the rest of the stack does plain HTTP. Async callers wrap it in
//! `tokio::task::spawn_blocking`.

use crate::types::user::UserIdentity;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use ureq::Agent;

#[derive(Debug, Error)]
pub enum RestError {
    #[error("http error: {0}")]
    Http(#[from] ureq::Error),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("server rejected the request ({status}): {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserIdentity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Response of a successful upload; the URL goes out as the content of a
/// non-text message.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub url: String,
}

pub struct RestClient {
    agent: Agent,
    base_url: String,
    token: Option<String>,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        // Statuses are checked manually so error bodies (`{"message": ..}`)
        // can be surfaced instead of a bare code.
        let agent: Agent = Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            base_url: base_url.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn signup(&self, username: &str, email: &str, password: &str) -> Result<(), RestError> {
        let body = json!({ "username": username, "email": email, "password": password });
        self.post_json("/api/auth/signup", &body)?;
        Ok(())
    }

    pub fn login(&self, email: &str, password: &str) -> Result<LoginResponse, RestError> {
        let body = json!({ "email": email, "password": password });
        let text = self.post_json("/api/auth/login", &body)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn search_users(&self, query: &str) -> Result<Vec<UserSummary>, RestError> {
        let url = format!(
            "{}/api/users/search?query={}",
            self.base_url,
            urlencoding::encode(query)
        );
        let mut request = self.agent.get(&url);
        if let Some(token) = &self.token {
            request = request.header("Authorization", &format!("Bearer {token}"));
        }
        let mut response = request.call()?;
        let status = response.status().as_u16();
        let text = response.body_mut().read_to_string()?;
        if !(200..300).contains(&status) {
            return Err(api_error(status, &text));
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Upload one file as `multipart/form-data`; the returned URL is what
    /// gets sent over the session as the message content.
    pub fn upload(
        &self,
        file_name: &str,
        mime: &str,
        bytes: &[u8],
    ) -> Result<UploadResponse, RestError> {
        let boundary = multipart_boundary();
        let mut body = Vec::with_capacity(bytes.len() + 256);
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n")
                .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {mime}\r\n\r\n").as_bytes());
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let url = format!("{}/api/upload", self.base_url);
        let mut request = self
            .agent
            .post(&url)
            .header(
                "Content-Type",
                &format!("multipart/form-data; boundary={boundary}"),
            );
        if let Some(token) = &self.token {
            request = request.header("Authorization", &format!("Bearer {token}"));
        }
        let mut response = request.send(&body[..])?;
        let status = response.status().as_u16();
        let text = response.body_mut().read_to_string()?;
        if !(200..300).contains(&status) {
            return Err(api_error(status, &text));
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<String, RestError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .agent
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", &format!("Bearer {token}"));
        }
        let mut response = request.send(body.to_string().as_bytes())?;
        let status = response.status().as_u16();
        let text = response.body_mut().read_to_string()?;
        if !(200..300).contains(&status) {
            return Err(api_error(status, &text));
        }
        Ok(text)
    }
}

fn api_error(status: u16, body: &str) -> RestError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| "request failed".to_string());
    RestError::Api { status, message }
}

fn multipart_boundary() -> String {
    let mut nonce = [0u8; 12];
    rand::rng().fill_bytes(&mut nonce);
    let mut out = String::with_capacity(16 + nonce.len() * 2);
    out.push_str("chatflow");
    for byte in nonce {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_is_unique_enough() {
        assert_ne!(multipart_boundary(), multipart_boundary());
    }

    #[test]
    fn test_api_error_extracts_message() {
        let err = api_error(400, r#"{"message": "email taken"}"#);
        match err {
            RestError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "email taken");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_api_error_defaults_without_body() {
        let err = api_error(500, "oops not json");
        match err {
            RestError::Api { message, .. } => assert_eq!(message, "request failed"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
