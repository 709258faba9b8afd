//! # fleet-sync
//!
//! Probe and synchronize many git repositories at once.
//!
//! The [`Orchestrator`] fans a batch of [`RepositoryDescriptor`]s out over a
//! bounded pool. Each repository gets either a read-only probe
//! ([`Operation::ProbeOnly`]) or the Stage → Commit → Pull → Push state
//! machine ([`Operation::FullSync`]); progress streams to an [`EventSink`]
//! and the call resolves to a complete [`BatchReport`].
//!
//! [`RepositoryDescriptor`]: fleet_core::RepositoryDescriptor

pub mod cancel;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod probe;
pub mod report;
pub mod runner;
pub mod step;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use cancel::CancelToken;
pub use error::{RunError, StepError};
pub use event::{BatchEvent, EventKind, EventSink, NullSink};
pub use orchestrator::Orchestrator;
pub use probe::{ProbeReport, Prober, RepositoryState};
pub use report::{BatchCounts, BatchReport, Operation, TaskOutcome, TaskResult, Verdict};
pub use runner::{CommandOutput, Invocation, OutputChunk, ProcessRunner, Runner, Stream};
pub use step::{StepKind, StepOutcome, StepResult};
pub use task::{SyncOptions, TaskState};
