//! Line-based human input at the process boundary.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

/// Prompt shown when the agents have gone idle.
pub const IDLE_PROMPT: &str = "\nTEAM is idle. Enter feedback or corrections (empty to exit): ";

/// Source of human feedback between rounds.
#[async_trait]
pub trait FeedbackSource: Send {
    /// Block until the human answers. `None` means end of input.
    async fn next_input(&mut self) -> Result<Option<String>>;
}

/// Reads one line from stdin per request, after printing [`IDLE_PROMPT`].
pub struct StdinFeedback {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinFeedback {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinFeedback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedbackSource for StdinFeedback {
    async fn next_input(&mut self) -> Result<Option<String>> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(IDLE_PROMPT.as_bytes())
            .await
            .context("write idle prompt")?;
        stdout.flush().await.context("flush idle prompt")?;
        self.lines.next_line().await.context("read feedback line")
    }
}
