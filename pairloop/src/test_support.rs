//! Scripted fakes for the external collaborators.
//!
//! Each fake replays a fixed script and records what it was asked, so tests
//! can drive full rounds without a network, an interpreter, or a terminal.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;

use crate::core::types::{ConversationTurn, ExecutionResult};
use crate::io::completion::CompletionClient;
use crate::io::feedback::FeedbackSource;
use crate::io::runner::CodeRunner;
use crate::io::session::{ConsoleHooks, InterpreterSession};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Completion client that replays replies (or failures) in order.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<Vec<ConversationTurn>>>,
}

impl ScriptedCompletion {
    /// `Ok` entries are replies, `Err` entries fail that request.
    pub fn new(script: Vec<Result<String, String>>) -> Self {
        Self {
            replies: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(replies.into_iter().map(|reply| Ok(reply.into())).collect())
    }

    /// Every history the client was called with.
    pub fn requests(&self) -> Vec<Vec<ConversationTurn>> {
        lock(&self.requests).clone()
    }

    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, history: &[ConversationTurn]) -> Result<String> {
        lock(&self.requests).push(history.to_vec());
        match lock(&self.replies).pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow!(message)),
            None => bail!("scripted completion has no replies left"),
        }
    }
}

/// Code runner that replays results and records the code it was given.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    results: VecDeque<ExecutionResult>,
    codes: Arc<Mutex<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new(results: Vec<ExecutionResult>) -> Self {
        Self {
            results: results.into(),
            codes: Arc::default(),
        }
    }

    /// Handle to the recorded code; stays valid after the runner is moved.
    pub fn recorded(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.codes)
    }
}

#[async_trait]
impl CodeRunner for ScriptedRunner {
    async fn run(&mut self, code: &str) -> ExecutionResult {
        lock(&self.codes).push(code.to_string());
        self.results
            .pop_front()
            .unwrap_or_else(|| ExecutionResult::error("scripted runner has no results left"))
    }
}

#[derive(Debug, Clone)]
enum ConsoleWrite {
    Print(String),
    WarnError(String),
}

#[derive(Debug, Clone, Default)]
enum EvaluationEnd {
    #[default]
    Completes,
    Faults(String),
    Hangs,
}

/// One scripted evaluation of a [`FakeSession`].
#[derive(Debug, Clone, Default)]
pub struct FakeEvaluation {
    writes: Vec<ConsoleWrite>,
    end: EvaluationEnd,
}

impl FakeEvaluation {
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn prints(text: impl Into<String>) -> Self {
        Self::silent().then_prints(text)
    }

    pub fn then_prints(mut self, text: impl Into<String>) -> Self {
        self.writes.push(ConsoleWrite::Print(text.into()));
        self
    }

    pub fn warns(mut self, text: impl Into<String>) -> Self {
        self.writes.push(ConsoleWrite::WarnError(text.into()));
        self
    }

    /// Fail the evaluation after the console writes.
    pub fn faults(mut self, message: impl Into<String>) -> Self {
        self.end = EvaluationEnd::Faults(message.into());
        self
    }

    /// Never finish after the console writes.
    pub fn hangs(mut self) -> Self {
        self.end = EvaluationEnd::Hangs;
        self
    }
}

/// In-memory interpreter session writing through real [`ConsoleHooks`].
#[derive(Debug, Default)]
pub struct FakeSession {
    console: ConsoleHooks,
    script: VecDeque<FakeEvaluation>,
    evaluated: Vec<String>,
    resets: usize,
}

impl FakeSession {
    pub fn new(script: Vec<FakeEvaluation>) -> Self {
        Self {
            script: script.into(),
            ..Self::default()
        }
    }

    pub fn evaluated(&self) -> &[String] {
        &self.evaluated
    }

    pub fn resets(&self) -> usize {
        self.resets
    }
}

#[async_trait]
impl InterpreterSession for FakeSession {
    fn console(&self) -> &ConsoleHooks {
        &self.console
    }

    async fn evaluate(&mut self, code: &str) -> Result<()> {
        self.evaluated.push(code.to_string());
        let Some(evaluation) = self.script.pop_front() else {
            bail!("fake session has no evaluations left");
        };
        for write in &evaluation.writes {
            match write {
                ConsoleWrite::Print(text) => self.console.print(text),
                ConsoleWrite::WarnError(text) => self.console.warn_error(text),
            }
        }
        match evaluation.end {
            EvaluationEnd::Completes => Ok(()),
            EvaluationEnd::Faults(message) => Err(anyhow!(message)),
            EvaluationEnd::Hangs => std::future::pending().await,
        }
    }

    fn reset(&mut self) {
        self.resets += 1;
    }
}

/// Feedback source replaying lines; `None` once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedFeedback {
    lines: VecDeque<String>,
    asked: usize,
}

impl ScriptedFeedback {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            asked: 0,
        }
    }

    /// How many times input was requested.
    pub fn asked(&self) -> usize {
        self.asked
    }
}

#[async_trait]
impl FeedbackSource for ScriptedFeedback {
    async fn next_input(&mut self) -> Result<Option<String>> {
        self.asked += 1;
        Ok(self.lines.pop_front())
    }
}
