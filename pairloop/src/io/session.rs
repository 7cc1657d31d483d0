//! Long-lived interpreter sessions and scoped console capture.
//!
//! A session routes everything the interpreter prints through the
//! [`ConsoleCallbacks`] currently installed in its [`ConsoleHooks`]. The hooks
//! are shared mutable state: whoever swaps them must put the previous pair
//! back. [`CaptureGuard`] does that in `Drop`, so the restore happens on every
//! exit path, including early returns, cancellation, and panics.
//!
//! Only one capture may be active at a time. The runtime never runs two
//! handlers concurrently, which is what keeps this sound.

use std::fmt;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, instrument, warn};

/// Sink for one console stream.
pub type ConsoleWriter = Arc<dyn Fn(&str) + Send + Sync>;

/// The pair of console callbacks an interpreter writes through.
#[derive(Clone)]
pub struct ConsoleCallbacks {
    pub print: ConsoleWriter,
    pub warn_error: ConsoleWriter,
}

impl ConsoleCallbacks {
    /// Callbacks that forward console text to tracing at debug level.
    pub fn traced() -> Self {
        Self {
            print: Arc::new(|text: &str| debug!(target: "pairloop::console", stream = "print", text)),
            warn_error: Arc::new(|text: &str| {
                debug!(target: "pairloop::console", stream = "warn_error", text);
            }),
        }
    }

    /// Whether both callbacks are the very same closures as `other`'s.
    pub fn same_as(&self, other: &ConsoleCallbacks) -> bool {
        Arc::ptr_eq(&self.print, &other.print) && Arc::ptr_eq(&self.warn_error, &other.warn_error)
    }
}

impl fmt::Debug for ConsoleCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleCallbacks").finish_non_exhaustive()
    }
}

/// Shared slot holding the currently installed console callbacks.
#[derive(Debug, Clone)]
pub struct ConsoleHooks {
    slot: Arc<Mutex<ConsoleCallbacks>>,
}

impl Default for ConsoleHooks {
    fn default() -> Self {
        Self::new(ConsoleCallbacks::traced())
    }
}

impl ConsoleHooks {
    pub fn new(callbacks: ConsoleCallbacks) -> Self {
        Self {
            slot: Arc::new(Mutex::new(callbacks)),
        }
    }

    pub fn current(&self) -> ConsoleCallbacks {
        lock(&self.slot).clone()
    }

    /// Install `callbacks`, returning the pair that was installed before.
    pub fn replace(&self, callbacks: ConsoleCallbacks) -> ConsoleCallbacks {
        std::mem::replace(&mut *lock(&self.slot), callbacks)
    }

    pub fn print(&self, text: &str) {
        let print = lock(&self.slot).print.clone();
        print(text);
    }

    pub fn warn_error(&self, text: &str) {
        let warn_error = lock(&self.slot).warn_error.clone();
        warn_error(text);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Redirects both console streams into one buffer until dropped.
pub struct CaptureGuard {
    hooks: ConsoleHooks,
    previous: Option<ConsoleCallbacks>,
    buffer: Arc<Mutex<String>>,
}

impl CaptureGuard {
    pub fn install(hooks: &ConsoleHooks) -> Self {
        let buffer = Arc::new(Mutex::new(String::new()));
        let sink: ConsoleWriter = {
            let buffer = Arc::clone(&buffer);
            Arc::new(move |text: &str| lock(&buffer).push_str(text))
        };
        let previous = hooks.replace(ConsoleCallbacks {
            print: Arc::clone(&sink),
            warn_error: sink,
        });
        Self {
            hooks: hooks.clone(),
            previous: Some(previous),
            buffer,
        }
    }

    /// Everything captured so far.
    pub fn output(&self) -> String {
        lock(&self.buffer).clone()
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.hooks.replace(previous);
        }
    }
}

/// An interpreter that keeps state between evaluations.
#[async_trait]
pub trait InterpreterSession: Send {
    /// Hooks the session writes its console output through.
    fn console(&self) -> &ConsoleHooks;

    /// Evaluate `code`. Interpreter-level errors are console output, not
    /// `Err`; `Err` means the session itself faulted.
    async fn evaluate(&mut self, code: &str) -> Result<()>;

    /// Discard interpreter state after a fault or an abandoned evaluation.
    fn reset(&mut self) {}
}

/// Settings for a [`ProcessSession`].
#[derive(Debug, Clone)]
pub struct ProcessSessionConfig {
    /// Interpreter program and arguments; it must read statements from stdin.
    pub command: Vec<String>,
    /// Statement template printing `{marker}` to stdout and stderr.
    pub sentinel: String,
}

struct LiveInterpreter {
    // Held so the process is killed when the session drops it.
    _child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: Lines<BufReader<ChildStderr>>,
}

/// Interpreter child process fed over stdin.
///
/// Each evaluation writes the code followed by the sentinel statement and
/// relays output lines until the marker shows up on both streams. The process
/// is spawned lazily and respawned after a fault.
pub struct ProcessSession {
    config: ProcessSessionConfig,
    console: ConsoleHooks,
    live: Option<LiveInterpreter>,
    evaluations: u64,
}

impl ProcessSession {
    pub fn new(config: ProcessSessionConfig) -> Self {
        Self {
            config,
            console: ConsoleHooks::default(),
            live: None,
            evaluations: 0,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.live.is_some()
    }

    fn spawn(&self) -> Result<LiveInterpreter> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("session command is empty"))?;
        debug!(program = %program, "spawning interpreter session");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn interpreter session {program}"))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;

        Ok(LiveInterpreter {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            stderr: BufReader::new(stderr).lines(),
        })
    }
}

#[async_trait]
impl InterpreterSession for ProcessSession {
    fn console(&self) -> &ConsoleHooks {
        &self.console
    }

    #[instrument(skip_all, fields(evaluation = self.evaluations, code_bytes = code.len()))]
    async fn evaluate(&mut self, code: &str) -> Result<()> {
        self.evaluations += 1;
        let marker = format!("__pairloop_eval_{}__", self.evaluations);
        let sentinel = self.config.sentinel.replace("{marker}", &marker);

        if self.live.is_none() {
            self.live = Some(self.spawn()?);
        }
        let console = self.console.clone();
        let Some(live) = self.live.as_mut() else {
            bail!("interpreter session is not running");
        };

        let outcome = exchange(live, &console, code, &sentinel, &marker).await;
        if let Err(err) = &outcome {
            warn!(err = %err, "interpreter session faulted, discarding it");
            self.live = None;
        }
        outcome
    }

    fn reset(&mut self) {
        if self.live.take().is_some() {
            debug!("interpreter session reset");
        }
    }
}

async fn exchange(
    live: &mut LiveInterpreter,
    console: &ConsoleHooks,
    code: &str,
    sentinel: &str,
    marker: &str,
) -> Result<()> {
    let mut script = String::with_capacity(code.len() + sentinel.len() + 2);
    script.push_str(code);
    if !code.ends_with('\n') {
        script.push('\n');
    }
    script.push_str(sentinel);
    script.push('\n');

    live.stdin
        .write_all(script.as_bytes())
        .await
        .context("write code to interpreter")?;
    live.stdin.flush().await.context("flush interpreter stdin")?;

    tokio::try_join!(
        relay_until_marker(&mut live.stdout, marker, |text| console.print(text)),
        relay_until_marker(&mut live.stderr, marker, |text| console.warn_error(text)),
    )?;
    Ok(())
}

async fn relay_until_marker<R, F>(lines: &mut Lines<R>, marker: &str, emit: F) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    F: Fn(&str),
{
    loop {
        let Some(line) = lines.next_line().await.context("read interpreter output")? else {
            bail!("interpreter session exited before finishing the evaluation");
        };
        if let Some(prefix) = line.strip_suffix(marker) {
            if !prefix.is_empty() {
                emit(prefix);
            }
            return Ok(());
        }
        emit(&format!("{line}\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_session() -> ProcessSession {
        ProcessSession::new(ProcessSessionConfig {
            command: vec!["sh".to_string()],
            sentinel: "echo {marker}; echo {marker} >&2".to_string(),
        })
    }

    #[test]
    fn capture_guard_restores_previous_callbacks() {
        let hooks = ConsoleHooks::default();
        let before = hooks.current();
        {
            let guard = CaptureGuard::install(&hooks);
            assert!(!hooks.current().same_as(&before));
            hooks.print("hello ");
            hooks.warn_error("world");
            assert_eq!(guard.output(), "hello world");
        }
        assert!(hooks.current().same_as(&before));
    }

    #[test]
    fn capture_guard_restores_on_panic() {
        let hooks = ConsoleHooks::default();
        let before = hooks.current();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = CaptureGuard::install(&hooks);
            panic!("evaluation blew up");
        }));
        assert!(result.is_err());
        assert!(hooks.current().same_as(&before));
    }

    #[tokio::test]
    async fn process_session_relays_output_through_console() {
        let mut session = shell_session();
        let guard = CaptureGuard::install(session.console());
        session.evaluate("echo hello").await.expect("evaluate");
        assert_eq!(guard.output(), "hello\n");
    }

    #[tokio::test]
    async fn process_session_keeps_state_between_evaluations() {
        let mut session = shell_session();
        session.evaluate("X=41; X=$((X + 1))").await.expect("assign");
        let guard = CaptureGuard::install(session.console());
        session.evaluate("echo $X").await.expect("read back");
        assert_eq!(guard.output(), "42\n");
    }

    #[tokio::test]
    async fn process_session_captures_stderr_and_partial_lines() {
        let mut session = shell_session();
        let guard = CaptureGuard::install(session.console());
        session
            .evaluate("echo oops >&2\nprintf partial")
            .await
            .expect("evaluate");
        let output = guard.output();
        assert!(output.contains("oops\n"));
        assert!(output.contains("partial"));
    }

    #[tokio::test]
    async fn process_session_faults_and_respawns_after_exit() {
        let mut session = shell_session();
        let err = session.evaluate("exit 1").await.unwrap_err();
        assert!(err.to_string().contains("exited before finishing"));
        assert!(!session.is_alive());

        let guard = CaptureGuard::install(session.console());
        session.evaluate("echo back").await.expect("respawned");
        assert_eq!(guard.output(), "back\n");
    }

    #[tokio::test]
    async fn missing_interpreter_is_a_fault() {
        let mut session = ProcessSession::new(ProcessSessionConfig {
            command: vec!["pairloop-definitely-missing-binary".to_string()],
            sentinel: "{marker}".to_string(),
        });
        let err = session.evaluate("1").await.unwrap_err();
        assert!(err.to_string().contains("spawn interpreter session"));
    }
}
