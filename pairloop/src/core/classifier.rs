//! Deterministic classification of raw interpreter output.

use crate::core::types::ExecutionResult;

/// Marker whose presence in captured output is treated as a failure.
pub const ERROR_MARKER: &str = "Error";

/// Everything a code runner observed about one execution, before
/// classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutcome {
    /// Captured standard output (or the session console buffer).
    pub output: String,
    /// Captured standard error. Always empty for session runs.
    pub stderr: String,
    /// Exit code; `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Set when spawning, evaluation, or waiting itself failed.
    pub fault: Option<String>,
}

impl RawOutcome {
    pub fn completed(output: impl Into<String>, stderr: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            output: output.into(),
            stderr: stderr.into(),
            exit_code,
            fault: None,
        }
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self {
            fault: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Policy shared by every code runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationPolicy {
    /// Treat any output containing [`ERROR_MARKER`] as an error.
    pub match_error_text: bool,
}

impl Default for ClassificationPolicy {
    fn default() -> Self {
        Self {
            match_error_text: true,
        }
    }
}

/// Classify a raw outcome into `Success` or `Error`.
///
/// - `Error` with the fault text if the run faulted.
/// - `Error` with the diagnostics if the exit code is non-zero or missing.
/// - `Error` with stderr if stderr is non-blank.
/// - `Error` with the output if it contains "Error" (when enabled).
/// - `Success` with the output otherwise.
///
/// The substring rule is a textual heuristic: benign output mentioning
/// "Error" is classified as a failure.
pub fn classify(raw: &RawOutcome, policy: ClassificationPolicy) -> ExecutionResult {
    if let Some(fault) = &raw.fault {
        return ExecutionResult::error(fault.clone());
    }
    if raw.exit_code != Some(0) {
        return ExecutionResult::error(diagnostics(raw));
    }
    if !raw.stderr.trim().is_empty() {
        return ExecutionResult::error(raw.stderr.clone());
    }
    if policy.match_error_text && raw.output.contains(ERROR_MARKER) {
        return ExecutionResult::error(raw.output.clone());
    }
    ExecutionResult::success(raw.output.clone())
}

fn diagnostics(raw: &RawOutcome) -> String {
    if raw.stderr.trim().is_empty() {
        let code = raw
            .exit_code
            .map_or_else(|| "signal".to_string(), |code| code.to_string());
        format!("{}[exit status {code}]\n", raw.output)
    } else {
        raw.stderr.clone()
    }
}
