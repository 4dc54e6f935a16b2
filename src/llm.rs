use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;

/// One turn of a conversation sent to the completion provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

/// The completion capability injected into the orchestrator. Lets tests
/// substitute a canned or failing provider.
#[async_trait]
pub trait CompletionApi: Send + Sync {
    /// Single-attempt completion call: conversation in, reply text out.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Anthropic Messages API client.
pub struct CompletionClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl CompletionClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .context("Failed to build completion HTTP client")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl CompletionApi for CompletionClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system: &self.config.system_prompt,
            messages,
        };

        let url = format!("{}/messages", self.config.base_url.trim_end_matches('/'));
        debug!("Sending completion request: {} turns", messages.len());

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send completion request")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Completion API error ({}): {}", status, error_body);
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .context("Failed to parse completion response")?;

        parsed
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .context("Completion response contained no text block")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_config(base_url: String) -> LlmConfig {
        LlmConfig {
            api_key: "test-key".to_string(),
            base_url,
            ..LlmConfig::default()
        }
    }

    #[test]
    fn serializes_roles_lowercase() {
        let message = ChatMessage::assistant("hi");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "hi");
    }

    #[tokio::test]
    async fn extracts_first_text_block() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/messages")
                .header("x-api-key", "test-key")
                .header("anthropic-version", "2023-06-01");
            then.status(200).json_body(serde_json::json!({
                "content": [
                    {"type": "text", "text": "Here's how..."},
                    {"type": "text", "text": "ignored second block"}
                ]
            }));
        });

        let client = CompletionClient::new(test_config(server.base_url())).unwrap();
        let reply = client
            .complete(&[ChatMessage::user("How do I reset my Outlook password?")])
            .await
            .unwrap();

        mock.assert();
        assert_eq!(reply, "Here's how...");
    }

    #[tokio::test]
    async fn skips_non_text_leading_blocks() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/messages");
            then.status(200).json_body(serde_json::json!({
                "content": [
                    {"type": "thinking", "thinking": "..."},
                    {"type": "text", "text": "answer"}
                ]
            }));
        });

        let client = CompletionClient::new(test_config(server.base_url())).unwrap();
        let reply = client.complete(&[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(reply, "answer");
    }

    #[tokio::test]
    async fn provider_error_status_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/messages");
            then.status(429)
                .body(r#"{"type":"error","error":{"type":"rate_limit_error"}}"#);
        });

        let client = CompletionClient::new(test_config(server.base_url())).unwrap();
        let err = client
            .complete(&[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn empty_content_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/messages");
            then.status(200).json_body(serde_json::json!({ "content": [] }));
        });

        let client = CompletionClient::new(test_config(server.base_url())).unwrap();
        let err = client
            .complete(&[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no text block"));
    }

    #[tokio::test]
    async fn request_body_carries_system_prompt_and_budget() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/messages")
                .json_body_partial(r#"{"max_tokens": 1024}"#);
            then.status(200).json_body(serde_json::json!({
                "content": [{"type": "text", "text": "ok"}]
            }));
        });

        let client = CompletionClient::new(test_config(server.base_url())).unwrap();
        client.complete(&[ChatMessage::user("hi")]).await.unwrap();
        mock.assert();
    }
}
