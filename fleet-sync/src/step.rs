//! Step records and the helper that runs one command inside a step.

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{RunError, StepError};
use crate::runner::{CommandOutput, Invocation, OutputChunk, Runner};

/// One discrete version-control operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Read-only classification (status + upstream comparison).
    Probe,
    Stage,
    Commit,
    Pull,
    Push,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Probe => write!(f, "probe"),
            StepKind::Stage => write!(f, "stage"),
            StepKind::Commit => write!(f, "commit"),
            StepKind::Pull => write!(f, "pull"),
            StepKind::Push => write!(f, "push"),
        }
    }
}

/// Tagged outcome of a step. `Skipped` means the step had nothing to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Success,
    Skipped,
    Failed,
}

impl StepOutcome {
    pub fn is_failure(self) -> bool {
        matches!(self, StepOutcome::Failed)
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Success => write!(f, "ok"),
            StepOutcome::Skipped => write!(f, "no-op"),
            StepOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Immutable record of one step.
///
/// A step may spawn more than one command (Stage checks what it staged, Pull
/// checks for an upstream first); `output` holds all of it and `exit_code`
/// is the last one observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub step: StepKind,
    pub outcome: StepOutcome,
    pub exit_code: Option<i32>,
    pub output: Vec<OutputChunk>,
    pub duration: Duration,
    pub error: Option<StepError>,
    /// Short human note, e.g. "nothing to commit".
    pub note: Option<String>,
}

impl StepResult {
    pub fn succeeded(&self) -> bool {
        !self.outcome.is_failure()
    }

    /// A step that was decided without invoking any command.
    pub fn bypassed(step: StepKind, note: impl Into<String>) -> Self {
        Self {
            step,
            outcome: StepOutcome::Skipped,
            exit_code: None,
            output: Vec::new(),
            duration: Duration::ZERO,
            error: None,
            note: Some(note.into()),
        }
    }
}

/// Accumulates the commands run for one step until it is sealed.
pub(crate) struct StepAudit {
    step: StepKind,
    started: Instant,
    output: Vec<OutputChunk>,
    exit_code: Option<i32>,
}

impl StepAudit {
    pub(crate) fn new(step: StepKind) -> Self {
        Self {
            step,
            started: Instant::now(),
            output: Vec::new(),
            exit_code: None,
        }
    }

    /// Run one command, keeping its output on this step.
    ///
    /// `Ok` carries any exit status, non-zero included. `Err` means no exit
    /// status was obtained (spawn failure or timeout).
    pub(crate) async fn exec<R: Runner>(
        &mut self,
        runner: &R,
        cwd: &Path,
        args: &[&str],
        timeout: Duration,
        on_output: &mut (dyn FnMut(&OutputChunk) + Send),
    ) -> Result<CommandOutput, StepError> {
        let result = runner
            .run(
                Invocation {
                    cwd,
                    args,
                    timeout,
                },
                on_output,
            )
            .await;
        match result {
            Ok(output) => {
                self.exit_code = output.exit_code;
                self.output.extend(output.output.iter().cloned());
                Ok(output)
            }
            Err(err) => {
                let step_err = StepError::from(&err);
                if let RunError::Timeout { partial, .. } = err {
                    self.output.extend(partial);
                }
                self.exit_code = None;
                Err(step_err)
            }
        }
    }

    pub(crate) fn success(self) -> StepResult {
        self.seal(StepOutcome::Success, None, None)
    }

    pub(crate) fn skipped(self, note: impl Into<String>) -> StepResult {
        self.seal(StepOutcome::Skipped, None, Some(note.into()))
    }

    pub(crate) fn failed(self, error: StepError) -> StepResult {
        self.seal(StepOutcome::Failed, Some(error), None)
    }

    /// Fail with `Command { code }` from the last exit status.
    pub(crate) fn failed_exit(self) -> StepResult {
        let error = match self.exit_code {
            Some(code) => StepError::Command { code },
            None => StepError::Killed,
        };
        self.failed(error)
    }

    fn seal(self, outcome: StepOutcome, error: Option<StepError>, note: Option<String>) -> StepResult {
        StepResult {
            step: self.step,
            outcome,
            exit_code: self.exit_code,
            output: self.output,
            duration: self.started.elapsed(),
            error,
            note,
        }
    }
}
