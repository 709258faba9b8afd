//! Progress events emitted while a batch runs.
//!
//! Per repository, events arrive in order: `task_started`, any number of
//! `output_line`s interleaved with `step_completed`, then exactly one
//! `task_finished`. Events for different repositories interleave freely.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use fleet_core::RepoName;

use crate::report::{Operation, TaskOutcome};
use crate::runner::{OutputChunk, Stream};
use crate::step::{StepKind, StepOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchEvent {
    pub repository: RepoName,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl BatchEvent {
    pub fn new(repository: RepoName, kind: EventKind) -> Self {
        Self {
            repository,
            at: Utc::now(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    TaskStarted { operation: Operation },
    OutputLine { stream: Stream, text: String },
    StepCompleted { step: StepKind, outcome: StepOutcome },
    TaskFinished { outcome: TaskOutcome },
}

impl From<&OutputChunk> for EventKind {
    fn from(chunk: &OutputChunk) -> Self {
        EventKind::OutputLine {
            stream: chunk.stream,
            text: chunk.text.clone(),
        }
    }
}

/// Consumer of batch events.
///
/// `emit` is called from many tasks at once and must not block; a slow or
/// gone consumer must never stall the batch.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: BatchEvent);
}

impl EventSink for mpsc::UnboundedSender<BatchEvent> {
    fn emit(&self, event: BatchEvent) {
        // Receiver dropped: the consumer stopped listening, the batch goes on.
        let _ = self.send(event);
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: BatchEvent) {}
}
