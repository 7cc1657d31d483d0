//! Generator agent: turns the conversation so far into the next code reply.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::core::history::ConversationHistory;
use crate::core::types::{AgentId, Message};
use crate::io::completion::CompletionClient;
use crate::io::config::ModelConfig;
use crate::runtime::{MessageContext, MessageHandler};

/// Source label for turns that came from outside the runtime.
pub const HUMAN_SOURCE: &str = "user";

/// How often and how patiently a failed completion is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each later one.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.backoff.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ModelConfig::default())
    }
}

/// The completion service kept failing after every retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionFailedError {
    pub attempts: u32,
    pub last_error: String,
}

impl fmt::Display for CompletionFailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "completion service failed after {} attempt(s): {}",
            self.attempts, self.last_error
        )
    }
}

impl std::error::Error for CompletionFailedError {}

/// Owns the conversation history and asks the completion service for each
/// reply. Every incoming message becomes a user turn, every reply an
/// assistant turn.
pub struct Generator {
    id: AgentId,
    history: ConversationHistory,
    client: Arc<dyn CompletionClient>,
    retry: RetryPolicy,
}

impl Generator {
    pub fn new(
        id: AgentId,
        system_prompt: impl Into<String>,
        client: Arc<dyn CompletionClient>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            id,
            history: ConversationHistory::new(system_prompt),
            client,
            retry,
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    async fn complete_with_retry(&self) -> Result<String, CompletionFailedError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.complete(self.history.turns()).await {
                Ok(reply) => return Ok(reply),
                Err(err) if attempt <= self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        err = %format!("{err:#}"),
                        "completion failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(CompletionFailedError {
                        attempts: attempt,
                        last_error: format!("{err:#}"),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl MessageHandler for Generator {
    #[instrument(skip_all, fields(agent = %self.id, turns = self.history.len()))]
    async fn on_message(
        &mut self,
        message: &Message,
        ctx: &MessageContext,
    ) -> Result<Vec<Message>> {
        let source = ctx.sender.as_ref().map_or(HUMAN_SOURCE, AgentId::as_str);
        self.history.push_user(message.content.as_str(), source);

        let reply = self.complete_with_retry().await?;
        debug!(reply_bytes = reply.len(), "completion received");
        self.history.push_assistant(reply.as_str(), self.id.as_str());
        info!(turns = self.history.len(), "generator replied");
        Ok(vec![Message::new(reply)])
    }
}
