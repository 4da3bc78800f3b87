//! Messaging client (§6): lookup user by email, open direct channel, post
//! message with structured blocks. Notification-only — never a control
//! channel; the Validation Coordinator never reads replies from here.

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("messaging request failed: {0}")]
    Request(String),
    #[error("no user found for email {0}")]
    UserNotFound(String),
}

pub type MessagingResult<T> = Result<T, MessagingError>;

#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn lookup_user_by_email(&self, email: &str) -> MessagingResult<String>;
    async fn open_direct_channel(&self, user_id: &str) -> MessagingResult<String>;
    async fn post_message(&self, channel_id: &str, text: &str, blocks: Option<Value>) -> MessagingResult<()>;
}

pub struct RestMessagingClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl RestMessagingClient {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl MessagingClient for RestMessagingClient {
    async fn lookup_user_by_email(&self, email: &str) -> MessagingResult<String> {
        let url = format!("{}/users.lookupByEmail?email={email}", self.api_base);
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| MessagingError::Request(e.to_string()))?;
        let body: Value = response.json().await.map_err(|e| MessagingError::Request(e.to_string()))?;
        body["user"]["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| MessagingError::UserNotFound(email.to_string()))
    }

    async fn open_direct_channel(&self, user_id: &str) -> MessagingResult<String> {
        let url = format!("{}/conversations.open", self.api_base);
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({"users": user_id}))
            .send()
            .await
            .map_err(|e| MessagingError::Request(e.to_string()))?;
        let body: Value = response.json().await.map_err(|e| MessagingError::Request(e.to_string()))?;
        body["channel"]["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| MessagingError::Request("missing channel.id in response".to_string()))
    }

    async fn post_message(&self, channel_id: &str, text: &str, blocks: Option<Value>) -> MessagingResult<()> {
        let url = format!("{}/chat.postMessage", self.api_base);
        let mut payload = serde_json::json!({"channel": channel_id, "text": text});
        if let Some(blocks) = blocks {
            payload["blocks"] = blocks;
        }
        self.http
            .post(url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MessagingError::Request(e.to_string()))?;
        Ok(())
    }
}

/// Renders the timeout-notification template (§4.6): a single DM sent when a
/// `ValidationRequest` lapses without a human reply.
pub fn render_timeout_template(task_title: &str, run_number: u32) -> String {
    format!(
        "Validation for \"{task_title}\" (run #{run_number}) timed out waiting for your reply. \
         Reply with an approval, rejection with instructions, or \"abandon\" to resolve it."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_template_includes_run_number() {
        let rendered = render_timeout_template("Add health endpoint", 2);
        assert!(rendered.contains("run #2"));
        assert!(rendered.contains("Add health endpoint"));
    }
}
