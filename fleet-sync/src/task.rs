//! Sync Task: Stage → Commit → Pull → Push as an explicit state machine.
//!
//! [`next`] is the whole transition table and touches no processes;
//! [`SyncMachine`] keeps the audit trail; [`drive`] feeds it real step
//! results from a [`Runner`].

use std::fmt;
use std::path::Path;
use std::time::Duration;

use fleet_core::{RepositoryDescriptor, Settings};

use crate::cancel::CancelToken;
use crate::error::StepError;
use crate::event::{BatchEvent, EventKind, EventSink};
use crate::report::TaskOutcome;
use crate::runner::{OutputChunk, Runner};
use crate::step::{StepAudit, StepKind, StepOutcome, StepResult};

pub const NOTHING_TO_COMMIT: &str = "nothing to commit";

/// Lifecycle of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running(StepKind),
    Succeeded,
    PartiallyFailed,
    Failed,
    /// Never started: disabled, or the batch was cancelled first.
    Skipped,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskState::Pending | TaskState::Running(_))
    }
}

impl From<TaskOutcome> for TaskState {
    fn from(outcome: TaskOutcome) -> Self {
        match outcome {
            TaskOutcome::Success => TaskState::Succeeded,
            TaskOutcome::PartialFailure => TaskState::PartiallyFailed,
            TaskOutcome::Failed => TaskState::Failed,
            TaskOutcome::Skipped => TaskState::Skipped,
            TaskOutcome::Cancelled => TaskState::Cancelled,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Running(step) => write!(f, "running {step}"),
            TaskState::Succeeded => write!(f, "succeeded"),
            TaskState::PartiallyFailed => write!(f, "partially failed"),
            TaskState::Failed => write!(f, "failed"),
            TaskState::Skipped => write!(f, "skipped"),
            TaskState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What the machine wants after a step settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Invoke the step's commands.
    Run(StepKind),
    /// Record the step as `Skipped` without invoking anything.
    Bypass(StepKind),
    Finish(TaskOutcome),
}

/// The transition table.
pub fn next(step: StepKind, outcome: StepOutcome) -> Next {
    use StepKind::*;
    use StepOutcome::*;

    match (step, outcome) {
        (Stage, Success) => Next::Run(Commit),
        (Stage, Skipped) => Next::Bypass(Commit),
        (Stage, Failed) => Next::Finish(TaskOutcome::Failed),

        (Commit, Success | Skipped) => Next::Run(Pull),
        (Commit, Failed) => Next::Finish(TaskOutcome::Failed),

        (Pull, Success | Skipped) => Next::Run(Push),
        (Pull, Failed) => Next::Finish(TaskOutcome::Failed),

        // Local history is already integrated; only publication is missing.
        (Push, Success | Skipped) => Next::Finish(TaskOutcome::Success),
        (Push, Failed) => Next::Finish(TaskOutcome::PartialFailure),

        (Probe, Failed) => Next::Finish(TaskOutcome::Failed),
        (Probe, Success | Skipped) => Next::Finish(TaskOutcome::Success),
    }
}

/// Tracks state and the ordered audit trail of one task.
#[derive(Debug, Clone)]
pub struct SyncMachine {
    state: TaskState,
    steps: Vec<StepResult>,
}

impl SyncMachine {
    pub fn new() -> Self {
        Self {
            state: TaskState::Pending,
            steps: Vec::new(),
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn steps(&self) -> &[StepResult] {
        &self.steps
    }

    pub fn start(&mut self) -> Next {
        self.state = TaskState::Running(StepKind::Stage);
        Next::Run(StepKind::Stage)
    }

    /// Append `result` and move to whatever the table says comes next.
    pub fn advance(&mut self, result: StepResult) -> Next {
        let next = next(result.step, result.outcome);
        self.steps.push(result);
        self.state = match next {
            Next::Run(step) | Next::Bypass(step) => TaskState::Running(step),
            Next::Finish(outcome) => outcome.into(),
        };
        next
    }

    /// Stop before the next step. Recorded steps are kept.
    pub fn interrupt(&mut self) -> TaskOutcome {
        self.state = TaskState::Cancelled;
        TaskOutcome::Cancelled
    }

    pub fn into_steps(self) -> Vec<StepResult> {
        self.steps
    }
}

impl Default for SyncMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Knobs for one sync task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Applied to every command the task spawns.
    pub timeout: Duration,
    pub commit_message: String,
    pub pull_rebase: bool,
}

impl From<&Settings> for SyncOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.command_timeout_secs),
            commit_message: settings.commit_message.clone(),
            pull_rebase: settings.pull_rebase,
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

/// Run the full sync for one repository.
///
/// Emits `output_line` and `step_completed` events as they happen. The
/// cancellation token is only consulted between steps; a command in flight
/// always runs to completion.
pub(crate) async fn drive<R: Runner>(
    runner: &R,
    descriptor: &RepositoryDescriptor,
    options: &SyncOptions,
    sink: &dyn EventSink,
    cancel: &CancelToken,
) -> (Vec<StepResult>, TaskOutcome) {
    let name = &descriptor.name;
    let mut forward = |chunk: &OutputChunk| sink.emit(BatchEvent::new(name.clone(), chunk.into()));

    let mut machine = SyncMachine::new();
    let mut pending = machine.start();
    let outcome = loop {
        let result = match pending {
            Next::Finish(outcome) => break outcome,
            Next::Bypass(step) => StepResult::bypassed(step, NOTHING_TO_COMMIT),
            Next::Run(step) => {
                if cancel.is_cancelled() {
                    tracing::info!(repository = %name, next = %step, "cancelled before step");
                    break machine.interrupt();
                }
                run_step(runner, &descriptor.path, step, options, &mut forward).await
            }
        };

        if let Some(err) = &result.error {
            tracing::warn!(repository = %name, step = %result.step, error = %err, "step failed");
        }
        sink.emit(BatchEvent::new(
            name.clone(),
            EventKind::StepCompleted {
                step: result.step,
                outcome: result.outcome,
            },
        ));
        pending = machine.advance(result);
    };

    (machine.into_steps(), outcome)
}

async fn run_step<R: Runner>(
    runner: &R,
    cwd: &Path,
    step: StepKind,
    options: &SyncOptions,
    on_output: &mut (dyn FnMut(&OutputChunk) + Send),
) -> StepResult {
    let mut audit = StepAudit::new(step);
    let timeout = options.timeout;

    match step {
        StepKind::Stage => {
            match audit.exec(runner, cwd, &["add", "--all"], timeout, on_output).await {
                Ok(out) if out.success() => {}
                Ok(_) => return audit.failed_exit(),
                Err(err) => return audit.failed(err),
            }
            // Exit 1 means the index differs from HEAD.
            match audit
                .exec(runner, cwd, &["diff", "--cached", "--quiet"], timeout, on_output)
                .await
            {
                Ok(out) if out.exit_code == Some(1) => audit.success(),
                Ok(out) if out.success() => audit.skipped(NOTHING_TO_COMMIT),
                Ok(_) => audit.failed_exit(),
                Err(err) => audit.failed(err),
            }
        }
        StepKind::Commit => {
            let args = ["commit", "-m", options.commit_message.as_str()];
            match audit.exec(runner, cwd, &args, timeout, on_output).await {
                Ok(out) if out.success() => audit.success(),
                Ok(_) => audit.failed_exit(),
                Err(err) => audit.failed(err),
            }
        }
        StepKind::Pull => {
            let upstream = ["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{upstream}"];
            match audit.exec(runner, cwd, &upstream, timeout, on_output).await {
                Ok(out) if out.success() => {}
                Ok(_) => return audit.failed(StepError::NoUpstream),
                Err(err) => return audit.failed(err),
            }
            let mode = if options.pull_rebase {
                "--rebase"
            } else {
                "--no-rebase"
            };
            match audit.exec(runner, cwd, &["pull", mode], timeout, on_output).await {
                Ok(out) if out.success() => audit.success(),
                Ok(_) => audit.failed_exit(),
                Err(err) => audit.failed(err),
            }
        }
        StepKind::Push => match audit.exec(runner, cwd, &["push"], timeout, on_output).await {
            Ok(out) if out.success() => audit.success(),
            Ok(_) => audit.failed_exit(),
            Err(err) => audit.failed(err),
        },
        StepKind::Probe => audit.skipped("probes run through the prober"),
    }
}
