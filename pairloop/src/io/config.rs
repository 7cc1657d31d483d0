//! Pairloop configuration stored in `pairloop.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::classifier::ClassificationPolicy;
use crate::core::extract::Fence;
use crate::core::termination::Termination;

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "pairloop.toml";

/// Pairloop configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// values that drive R through `Rscript` against an OpenAI-compatible API.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PairloopConfig {
    pub model: ModelConfig,
    pub interpreter: InterpreterConfig,
    pub agents: AgentsConfig,
    pub termination: TerminationConfig,
    pub controller: ControllerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible API, including the version segment.
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the bearer token.
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    /// Retries after the first failed completion request.
    pub max_retries: u32,
    /// Initial retry delay; doubled after every failed attempt.
    pub retry_backoff_ms: u64,
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 120,
            max_retries: 2,
            retry_backoff_ms: 500,
            temperature: None,
        }
    }
}

/// How extracted code is executed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunnerStrategy {
    /// One interpreter process per code block, script passed as a file.
    Subprocess,
    /// One long-lived interpreter fed over stdin.
    Session,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InterpreterConfig {
    pub strategy: RunnerStrategy,
    /// Script interpreter; the temp script path is appended as last argument.
    pub script_command: Vec<String>,
    pub script_suffix: String,
    /// Interactive interpreter kept alive for the `session` strategy.
    pub session_command: Vec<String>,
    /// Statement run after each session evaluation. Must print `{marker}` on
    /// its own line to stdout and to stderr.
    pub sentinel: String,
    pub timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Classify output containing "Error" as a failure.
    pub match_error_text: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            strategy: RunnerStrategy::Subprocess,
            script_command: vec!["Rscript".to_string()],
            script_suffix: ".R".to_string(),
            session_command: vec![
                "R".to_string(),
                "--no-echo".to_string(),
                "--vanilla".to_string(),
                "--interactive".to_string(),
            ],
            sentinel: r#"cat("{marker}\n"); message("{marker}")"#.to_string(),
            timeout_secs: 5 * 60,
            output_limit_bytes: 100_000,
            match_error_text: true,
        }
    }
}

impl InterpreterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn policy(&self) -> ClassificationPolicy {
        ClassificationPolicy {
            match_error_text: self.match_error_text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentsConfig {
    /// Human-readable language name used in the system prompt.
    pub language: String,
    pub fence_open: String,
    pub fence_close: String,
    /// Standing goal appended to the generator's system prompt.
    pub goal: Option<String>,
    /// Initial task used by `pairloop run` when none is given.
    pub task: Option<String>,
    /// Publish a diagnostic when a message has no code block instead of
    /// only logging it. Publishing keeps the round going.
    pub announce_missing_code: bool,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            language: "R".to_string(),
            fence_open: "```r".to_string(),
            fence_close: "```".to_string(),
            goal: None,
            task: None,
            announce_missing_code: false,
        }
    }
}

impl AgentsConfig {
    pub fn fence(&self) -> Fence {
        Fence::new(self.fence_open.clone(), self.fence_close.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TerminationConfig {
    /// Token that marks the task complete when it shows up in a result.
    pub completion_token: String,
    /// Hard cap on messages per round.
    pub max_messages: usize,
    /// Extra tokens that end a round when an agent message mentions them.
    pub mention_tokens: Vec<String>,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            completion_token: "TASK_COMPLETE".to_string(),
            max_messages: 30,
            mention_tokens: Vec::new(),
        }
    }
}

impl TerminationConfig {
    /// Build the stop condition checked once a round is idle.
    pub fn condition(&self) -> Termination {
        Termination::CompletionFlag | self.dispatch_guard()
    }

    /// Build the condition checked after every delivery.
    ///
    /// Leaves out the completion flag so the round that reports success still
    /// delivers its result to the generator.
    pub fn dispatch_guard(&self) -> Termination {
        self.mention_tokens.iter().fold(
            Termination::MaxMessages(self.max_messages),
            |acc, token| acc | Termination::TextMention(token.clone()),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Exit after a round that ended in termination instead of asking for
    /// more feedback.
    pub exit_on_termination: bool,
}

impl PairloopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.base_url.trim().is_empty() {
            return Err(anyhow!("model.base_url must not be empty"));
        }
        if self.model.model.trim().is_empty() {
            return Err(anyhow!("model.model must not be empty"));
        }
        if self.model.request_timeout_secs == 0 {
            return Err(anyhow!("model.request_timeout_secs must be > 0"));
        }
        if self.interpreter.timeout_secs == 0 {
            return Err(anyhow!("interpreter.timeout_secs must be > 0"));
        }
        if self.interpreter.output_limit_bytes == 0 {
            return Err(anyhow!("interpreter.output_limit_bytes must be > 0"));
        }
        if is_blank_command(&self.interpreter.script_command) {
            return Err(anyhow!("interpreter.script_command must be a non-empty array"));
        }
        if is_blank_command(&self.interpreter.session_command) {
            return Err(anyhow!("interpreter.session_command must be a non-empty array"));
        }
        if !self.interpreter.sentinel.contains("{marker}") {
            return Err(anyhow!("interpreter.sentinel must contain {{marker}}"));
        }
        if self.agents.fence_open.is_empty() || self.agents.fence_close.is_empty() {
            return Err(anyhow!("agents.fence_open and agents.fence_close must not be empty"));
        }
        if self.termination.completion_token.trim().is_empty() {
            return Err(anyhow!("termination.completion_token must not be empty"));
        }
        if self.termination.max_messages == 0 {
            return Err(anyhow!("termination.max_messages must be > 0"));
        }
        Ok(())
    }
}

fn is_blank_command(command: &[String]) -> bool {
    command.first().is_none_or(|program| program.trim().is_empty())
}

/// Resolve the config path from an optional CLI override.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), Path::to_path_buf)
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PairloopConfig::default()`.
pub fn load_config(path: &Path) -> Result<PairloopConfig> {
    if !path.exists() {
        let cfg = PairloopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PairloopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PairloopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
