//! Code runner abstraction over interpreter backends.
//!
//! The [`CodeRunner`] trait decouples the executor agent from how code is
//! actually run. Both strategies observe a [`RawOutcome`] and hand it to the
//! shared [`classify`] policy; tests use scripted runners that return
//! predetermined results without spawning processes.

use std::io::Write;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::{ClassificationPolicy, RawOutcome, classify};
use crate::core::types::ExecutionResult;
use crate::io::config::{InterpreterConfig, RunnerStrategy};
use crate::io::process::{CommandOutput, run_command_with_timeout};
use crate::io::session::{CaptureGuard, InterpreterSession, ProcessSession, ProcessSessionConfig};

/// Runs one extracted code block and classifies the outcome.
///
/// Never fails: faults while spawning or evaluating become `Error` results.
#[async_trait]
pub trait CodeRunner: Send {
    async fn run(&mut self, code: &str) -> ExecutionResult;
}

/// Build the runner selected by `config.strategy`.
pub fn build_code_runner(config: &InterpreterConfig) -> Box<dyn CodeRunner> {
    match config.strategy {
        RunnerStrategy::Subprocess => Box::new(SubprocessRunner::new(config)),
        RunnerStrategy::Session => {
            let session = ProcessSession::new(ProcessSessionConfig {
                command: config.session_command.clone(),
                sentinel: config.sentinel.clone(),
            });
            Box::new(SessionRunner::new(session, config.timeout(), config.policy()))
        }
    }
}

/// Runs each code block as a script file in a fresh interpreter process.
#[derive(Debug, Clone)]
pub struct SubprocessRunner {
    command: Vec<String>,
    script_suffix: String,
    timeout: Duration,
    output_limit_bytes: usize,
    policy: ClassificationPolicy,
}

impl SubprocessRunner {
    pub fn new(config: &InterpreterConfig) -> Self {
        Self {
            command: config.script_command.clone(),
            script_suffix: config.script_suffix.clone(),
            timeout: config.timeout(),
            output_limit_bytes: config.output_limit_bytes,
            policy: config.policy(),
        }
    }

    /// Write, run, and remove the script, blocking the current thread.
    pub fn observe(&self, code: &str) -> RawOutcome {
        match self.run_script(code) {
            Ok(output) if output.timed_out => RawOutcome::fault(format!(
                "interpreter timed out after {}s\n{}",
                self.timeout.as_secs(),
                output.stderr_text()
            )),
            Ok(output) => RawOutcome::completed(
                output.stdout_text(),
                output.stderr_text(),
                output.status.code(),
            ),
            Err(err) => {
                warn!(err = %err, "interpreter run failed");
                RawOutcome::fault(format!("Exception when running code:\n{err:#}"))
            }
        }
    }

    fn run_script(&self, code: &str) -> Result<CommandOutput> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("script command is empty"))?;

        let mut script = tempfile::Builder::new()
            .prefix("pairloop-")
            .suffix(&self.script_suffix)
            .tempfile()
            .context("create temp script")?;
        script
            .write_all(code.as_bytes())
            .context("write temp script")?;
        script.flush().context("flush temp script")?;
        debug!(script = %script.path().display(), "wrote temp script");

        let mut cmd = Command::new(program);
        cmd.args(args).arg(script.path());
        let output = run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run {program}"))?;

        // The code may have moved or deleted its own script.
        if let Err(err) = script.close() {
            warn!(err = %err, "failed to remove temp script");
        }
        Ok(output)
    }
}

#[async_trait]
impl CodeRunner for SubprocessRunner {
    #[instrument(skip_all, fields(code_bytes = code.len()))]
    async fn run(&mut self, code: &str) -> ExecutionResult {
        let runner = self.clone();
        let code = code.to_string();
        let raw = match tokio::task::spawn_blocking(move || runner.observe(&code)).await {
            Ok(raw) => raw,
            Err(err) => RawOutcome::fault(format!("interpreter task failed: {err}")),
        };
        let result = classify(&raw, self.policy);
        info!(status = ?result.status, "subprocess run classified");
        result
    }
}

/// Runs code in one long-lived interpreter session, capturing its console.
pub struct SessionRunner<S> {
    session: S,
    timeout: Duration,
    policy: ClassificationPolicy,
}

impl<S: InterpreterSession> SessionRunner<S> {
    pub fn new(session: S, timeout: Duration, policy: ClassificationPolicy) -> Self {
        Self {
            session,
            timeout,
            policy,
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }
}

#[async_trait]
impl<S: InterpreterSession> CodeRunner for SessionRunner<S> {
    #[instrument(skip_all, fields(code_bytes = code.len()))]
    async fn run(&mut self, code: &str) -> ExecutionResult {
        let capture = CaptureGuard::install(self.session.console());
        let evaluated = tokio::time::timeout(self.timeout, self.session.evaluate(code)).await;
        let output = capture.output();
        drop(capture);

        let raw = match evaluated {
            Ok(Ok(())) => RawOutcome::completed(output, "", Some(0)),
            Ok(Err(err)) => {
                warn!(err = %err, "interpreter session fault");
                RawOutcome::fault(format!("{output}{err:#}"))
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "session evaluation timed out");
                self.session.reset();
                RawOutcome::fault(format!(
                    "{output}evaluation timed out after {}s",
                    self.timeout.as_secs()
                ))
            }
        };
        let result = classify(&raw, self.policy);
        info!(status = ?result.status, "session run classified");
        result
    }
}
