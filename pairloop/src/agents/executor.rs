//! Executor agent: extracts the fenced block from a reply, runs it, and
//! publishes the classified result.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::core::extract::Fence;
use crate::core::termination::TerminationState;
use crate::core::types::{AgentId, Message};
use crate::io::config::PairloopConfig;
use crate::io::runner::CodeRunner;
use crate::runtime::{MessageContext, MessageHandler};

/// Static settings for an [`Executor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub language: String,
    pub fence: Fence,
    pub completion_token: String,
    /// Publish a diagnostic when no code block is found instead of only
    /// logging it.
    pub announce_missing_code: bool,
}

impl ExecutorSettings {
    pub fn from_config(config: &PairloopConfig) -> Self {
        Self {
            language: config.agents.language.clone(),
            fence: config.agents.fence(),
            completion_token: config.termination.completion_token.clone(),
            announce_missing_code: config.agents.announce_missing_code,
        }
    }

    fn missing_code_notice(&self) -> String {
        format!(
            "No {} code block found. Reply with exactly one block between {} and {}.",
            self.language, self.fence.open, self.fence.close
        )
    }
}

pub struct Executor {
    id: AgentId,
    settings: ExecutorSettings,
    runner: Box<dyn CodeRunner>,
    state: Arc<TerminationState>,
}

impl Executor {
    pub fn new(
        id: AgentId,
        settings: ExecutorSettings,
        runner: Box<dyn CodeRunner>,
        state: Arc<TerminationState>,
    ) -> Self {
        Self {
            id,
            settings,
            runner,
            state,
        }
    }
}

#[async_trait]
impl MessageHandler for Executor {
    #[instrument(skip_all, fields(agent = %self.id))]
    async fn on_message(
        &mut self,
        message: &Message,
        _ctx: &MessageContext,
    ) -> Result<Vec<Message>> {
        let code = self
            .settings
            .fence
            .extract(&message.content)
            .filter(|code| !code.is_empty());
        let Some(code) = code else {
            info!("no code block found, nothing to run");
            if self.settings.announce_missing_code {
                return Ok(vec![Message::new(self.settings.missing_code_notice())]);
            }
            return Ok(Vec::new());
        };

        debug!(code_bytes = code.len(), "running extracted code");
        let result = self.runner.run(&code).await;
        info!(status = ?result.status, output_bytes = result.text.len(), "code ran");

        if result.text.contains(self.settings.completion_token.as_str()) {
            let first = self.state.mark_complete();
            info!(token = %self.settings.completion_token, first, "completion token seen");
        }
        Ok(vec![Message::new(result.render())])
    }
}
