//! Task and batch results.
//!
//! A [`TaskResult`] is sealed exactly once, when its task reaches a terminal
//! state. The [`BatchReport`] is assembled by a single writer (the
//! Orchestrator's collector) and handed out frozen.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use fleet_core::{RepoName, RepositoryDescriptor};

use crate::error::StepError;
use crate::probe::{ProbeReport, RepositoryState};
use crate::step::{StepKind, StepResult};
use crate::task::TaskState;

/// What a batch does to each repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ProbeOnly,
    FullSync,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::ProbeOnly => write!(f, "probe"),
            Operation::FullSync => write!(f, "sync"),
        }
    }
}

/// Terminal outcome of one repository's task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Success,
    /// Local history was updated but publishing it failed; retry Push only.
    PartialFailure,
    Failed,
    /// Never started (disabled, or the batch was cancelled first).
    Skipped,
    /// Started, then stopped between steps by a batch cancellation.
    Cancelled,
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Success => write!(f, "success"),
            TaskOutcome::PartialFailure => write!(f, "partial failure"),
            TaskOutcome::Failed => write!(f, "failed"),
            TaskOutcome::Skipped => write!(f, "skipped"),
            TaskOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Everything recorded about one repository in one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub repository: RepoName,
    pub path: PathBuf,
    pub operation: Operation,
    /// In execution order; every attempted step is kept, failed ones included.
    pub steps: Vec<StepResult>,
    pub outcome: TaskOutcome,
    /// Present for probe tasks.
    pub probe: Option<ProbeReport>,
    /// Task-level reason when no step explains the outcome (validation,
    /// disabled, skipped by cancellation, crashed task).
    pub error: Option<String>,
    pub duration: Duration,
}

impl TaskResult {
    pub(crate) fn skipped(
        descriptor: &RepositoryDescriptor,
        operation: Operation,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            repository: descriptor.name.clone(),
            path: descriptor.path.clone(),
            operation,
            steps: Vec::new(),
            outcome: TaskOutcome::Skipped,
            probe: None,
            error: Some(reason.into()),
            duration: Duration::ZERO,
        }
    }

    /// Rejected before any process was spawned.
    pub(crate) fn invalid(
        descriptor: &RepositoryDescriptor,
        operation: Operation,
        error: &StepError,
    ) -> Self {
        let probe = match operation {
            Operation::ProbeOnly => Some(ProbeReport::unreadable(error.to_string())),
            Operation::FullSync => None,
        };
        Self {
            repository: descriptor.name.clone(),
            path: descriptor.path.clone(),
            operation,
            steps: Vec::new(),
            outcome: TaskOutcome::Failed,
            probe,
            error: Some(error.to_string()),
            duration: Duration::ZERO,
        }
    }

    pub(crate) fn crashed(
        descriptor: &RepositoryDescriptor,
        operation: Operation,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            outcome: TaskOutcome::Failed,
            ..Self::skipped(descriptor, operation, reason)
        }
    }

    /// Final lifecycle state of the task, derived from its outcome.
    pub fn task_state(&self) -> TaskState {
        self.outcome.into()
    }

    /// Headline state for probe tasks.
    pub fn state(&self) -> Option<RepositoryState> {
        self.probe.as_ref().map(|p| p.state)
    }

    /// The step result for `step`, if it was recorded.
    pub fn step(&self, step: StepKind) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step == step)
    }
}

/// Batch-level tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchCounts {
    pub succeeded: usize,
    pub partially_failed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

/// Overall verdict, mapped to process exit codes by CLI wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    PartialFailure,
    AllFailed,
    Cancelled,
}

impl Verdict {
    pub fn exit_code(self) -> i32 {
        match self {
            Verdict::Success => 0,
            Verdict::PartialFailure => 2,
            Verdict::AllFailed => 3,
            Verdict::Cancelled => 130,
        }
    }
}

/// Frozen result of one `run_batch` call: one entry per submitted descriptor,
/// in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    operation: Operation,
    entries: Vec<TaskResult>,
    cancelled: bool,
    duration: Duration,
}

impl BatchReport {
    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TaskResult] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskResult> {
        self.entries.iter()
    }

    /// Case-insensitive lookup by repository name.
    pub fn get(&self, name: &str) -> Option<&TaskResult> {
        self.entries.iter().find(|r| r.repository.matches(name))
    }

    /// Whether the batch saw a cancellation signal.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn counts(&self) -> BatchCounts {
        let mut counts = BatchCounts::default();
        for entry in &self.entries {
            match entry.outcome {
                TaskOutcome::Success => counts.succeeded += 1,
                TaskOutcome::PartialFailure => counts.partially_failed += 1,
                TaskOutcome::Failed => counts.failed += 1,
                TaskOutcome::Skipped => counts.skipped += 1,
                TaskOutcome::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub fn verdict(&self) -> Verdict {
        if self.cancelled {
            return Verdict::Cancelled;
        }
        let counts = self.counts();
        if counts.failed + counts.partially_failed == 0 {
            Verdict::Success
        } else if counts.succeeded + counts.partially_failed == 0 {
            Verdict::AllFailed
        } else {
            Verdict::PartialFailure
        }
    }
}

/// Single-writer accumulator behind [`BatchReport`].
pub(crate) struct BatchCollector<'a> {
    descriptors: &'a [RepositoryDescriptor],
    operation: Operation,
    slots: Vec<Option<TaskResult>>,
}

impl<'a> BatchCollector<'a> {
    pub(crate) fn new(descriptors: &'a [RepositoryDescriptor], operation: Operation) -> Self {
        Self {
            descriptors,
            operation,
            slots: vec![None; descriptors.len()],
        }
    }

    /// Record the terminal result for submission `index`. First write wins.
    pub(crate) fn record(&mut self, index: usize, result: TaskResult) {
        match self.slots.get_mut(index) {
            Some(slot @ None) => *slot = Some(result),
            Some(Some(_)) => {
                tracing::warn!(repository = %result.repository, "duplicate task result ignored");
            }
            None => {
                tracing::warn!(index, "task result for unknown submission index ignored");
            }
        }
    }

    pub(crate) fn freeze(self, cancelled: bool, duration: Duration) -> BatchReport {
        let operation = self.operation;
        let entries = self
            .slots
            .into_iter()
            .zip(self.descriptors)
            .map(|(slot, descriptor)| {
                slot.unwrap_or_else(|| {
                    tracing::warn!(repository = %descriptor.name, "no result recorded; marking skipped");
                    TaskResult::skipped(descriptor, operation, "no result recorded")
                })
            })
            .collect();
        BatchReport {
            operation,
            entries,
            cancelled,
            duration,
        }
    }
}
