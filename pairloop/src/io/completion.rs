//! Chat-completion client abstraction.
//!
//! The generator only needs "history in, text out"; [`CompletionClient`] is
//! that seam. [`OpenAiChatClient`] talks to any OpenAI-compatible
//! `chat/completions` endpoint.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::types::ConversationTurn;
use crate::io::config::ModelConfig;

/// External completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Produce the next assistant reply for `history`.
    async fn complete(&self, history: &[ConversationTurn]) -> Result<String>;
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiChatClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: Option<f32>,
}

impl OpenAiChatClient {
    /// Build a client, reading the API key from `config.api_key_env`.
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).with_context(|| {
            format!(
                "set {} to use the completion service at {}",
                config.api_key_env, config.base_url
            )
        })?;
        Self::new(config, api_key)
    }

    pub fn new(config: &ModelConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.into(),
            temperature: config.temperature,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionClient for OpenAiChatClient {
    #[instrument(skip_all, fields(model = %self.model, turns = history.len()))]
    async fn complete(&self, history: &[ConversationTurn]) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: history.iter().map(WireMessage::from_turn).collect(),
            temperature: self.temperature,
        };

        debug!(endpoint = %self.endpoint(), "sending chat completion request");
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("send chat completion request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("read chat completion response")?;
        if !status.is_success() {
            warn!(status = %status, "chat completion request rejected");
            bail!("completion service returned HTTP {status}: {body}");
        }
        parse_completion(&body)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, PartialEq)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

impl<'a> WireMessage<'a> {
    fn from_turn(turn: &'a ConversationTurn) -> Self {
        let role = match turn {
            ConversationTurn::System { .. } => "system",
            ConversationTurn::User { .. } => "user",
            ConversationTurn::Assistant { .. } => "assistant",
        };
        let source = turn.source();
        let name = (role != "system" && is_valid_name(source)).then_some(source);
        Self {
            role,
            content: turn.content(),
            name,
        }
    }
}

/// The API only accepts `[A-Za-z0-9_-]{1,64}` as participant names.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

fn parse_completion(body: &str) -> Result<String> {
    let response: ChatResponse =
        serde_json::from_str(body).context("parse chat completion response")?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("completion response has no choices"))?;
    choice
        .message
        .content
        .ok_or_else(|| anyhow!("completion response has no content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_turns_to_roles_and_names() {
        let turns = vec![
            ConversationTurn::System {
                content: "sys".to_string(),
                source: "system".to_string(),
            },
            ConversationTurn::User {
                content: "task".to_string(),
                source: "user".to_string(),
            },
            ConversationTurn::Assistant {
                content: "```r\n1\n```".to_string(),
                source: "generator".to_string(),
            },
            ConversationTurn::User {
                content: "Success:\n".to_string(),
                source: "R executor".to_string(),
            },
        ];
        let wire: Vec<WireMessage<'_>> = turns.iter().map(WireMessage::from_turn).collect();

        assert_eq!(
            wire[0],
            WireMessage {
                role: "system",
                content: "sys",
                name: None
            }
        );
        assert_eq!(wire[1].role, "user");
        assert_eq!(wire[1].name, Some("user"));
        assert_eq!(wire[2].role, "assistant");
        assert_eq!(wire[2].name, Some("generator"));
        assert_eq!(wire[3].name, None);
    }

    #[test]
    fn request_omits_unset_temperature() {
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: Vec::new(),
            temperature: None,
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert!(value.get("temperature").is_none());
        assert_eq!(value["model"], "gpt-4o-mini");
    }

    #[test]
    fn parses_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"hello"}},{"message":{"content":"second"}}]}"#;
        assert_eq!(parse_completion(body).expect("parse"), "hello");
    }

    #[test]
    fn empty_choices_is_an_error() {
        let err = parse_completion(r#"{"choices":[]}"#).unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }

    #[test]
    fn malformed_body_is_an_error() {
        let err = parse_completion("<html>bad gateway</html>").unwrap_err();
        assert!(err.to_string().contains("parse chat completion response"));
    }

    #[test]
    fn endpoint_joins_base_url() {
        let config = ModelConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            ..ModelConfig::default()
        };
        let client = OpenAiChatClient::new(&config, "key").expect("client");
        assert_eq!(client.endpoint(), "http://localhost:11434/v1/chat/completions");
    }
}
