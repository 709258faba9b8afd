//! Error types for fleet-sync.
//!
//! None of these ever escape a task: the Orchestrator folds them into the
//! task's [`StepResult`](crate::step::StepResult)s and events.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::runner::OutputChunk;

/// Failure to obtain an exit status from a single external command.
#[derive(Debug, Error)]
pub enum RunError {
    /// The binary could not be located or executed.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The command did not exit within its allotted time and was killed.
    #[error("command timed out after {}s", after.as_secs())]
    Timeout {
        after: Duration,
        /// Output captured before the process was killed.
        partial: Vec<OutputChunk>,
    },

    /// Waiting on the child process failed.
    #[error("I/O error while waiting for '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Why a step (or a whole task) did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// Binary missing or not executable. Not retried.
    #[error("spawn error: {0}")]
    Spawn(String),

    /// The command exceeded its timeout; partial output is kept on the step.
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Non-zero exit with diagnostic output captured on the step.
    #[error("command exited with status {code}")]
    Command { code: i32 },

    /// The process was terminated by a signal and has no exit code.
    #[error("command terminated by signal")]
    Killed,

    /// The current branch has no upstream to pull from or push to.
    #[error("no upstream configured for the current branch")]
    NoUpstream,

    /// The descriptor was rejected before any process was spawned.
    #[error("invalid repository {}: {reason}", path.display())]
    Validation { path: PathBuf, reason: String },
}

impl From<&RunError> for StepError {
    fn from(err: &RunError) -> Self {
        match err {
            RunError::Spawn { .. } | RunError::Io { .. } => StepError::Spawn(err.to_string()),
            RunError::Timeout { after, .. } => StepError::Timeout(*after),
        }
    }
}
