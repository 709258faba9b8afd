//! Bounded fan-out of probes and sync tasks over a batch of repositories.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use fleet_core::{RepositoryDescriptor, Settings};

use crate::cancel::CancelToken;
use crate::event::{BatchEvent, EventKind, EventSink};
use crate::probe::{self, Prober, RepositoryState};
use crate::report::{BatchCollector, BatchReport, Operation, TaskOutcome, TaskResult};
use crate::runner::{OutputChunk, Runner};
use crate::step::StepKind;
use crate::task::{self, SyncOptions};

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs batches. Holds no per-batch state, so one instance serves many
/// `run_batch` calls.
pub struct Orchestrator<R> {
    runner: Arc<R>,
    concurrency: usize,
    probe_timeout: Duration,
    sync: SyncOptions,
}

impl<R: Runner> Orchestrator<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner: Arc::new(runner),
            concurrency: DEFAULT_CONCURRENCY,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            sync: SyncOptions::default(),
        }
    }

    pub fn from_settings(runner: R, settings: &Settings) -> Self {
        Self::new(runner)
            .concurrency(settings.concurrency)
            .probe_timeout(Duration::from_secs(settings.probe_timeout_secs))
            .sync_options(SyncOptions::from(settings))
    }

    /// Maximum tasks in flight. Clamped to at least 1.
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.sync.timeout = timeout;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn commit_message(mut self, message: impl Into<String>) -> Self {
        self.sync.commit_message = message.into();
        self
    }

    pub fn pull_rebase(mut self, rebase: bool) -> Self {
        self.sync.pull_rebase = rebase;
        self
    }

    pub fn sync_options(mut self, options: SyncOptions) -> Self {
        self.sync = options;
        self
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency
    }

    /// Run `operation` over every descriptor and wait for all of them.
    ///
    /// The report has exactly one entry per descriptor, in submission order.
    /// Tasks are started in submission order as permits free up. Once
    /// `cancel` fires no new task or step starts; steps already running
    /// finish and undispatched descriptors are reported `Skipped`.
    pub async fn run_batch(
        &self,
        descriptors: &[RepositoryDescriptor],
        operation: Operation,
        sink: Arc<dyn EventSink>,
        cancel: CancelToken,
    ) -> BatchReport {
        let started = Instant::now();
        tracing::info!(
            operation = %operation,
            repositories = descriptors.len(),
            concurrency = self.concurrency,
            "starting batch",
        );

        let mut collector = BatchCollector::new(descriptors, operation);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut running: JoinSet<(usize, TaskResult)> = JoinSet::new();
        let mut stopped = false;

        for (index, descriptor) in descriptors.iter().enumerate() {
            if !stopped && cancel.is_cancelled() {
                tracing::info!("batch cancelled; remaining repositories skipped");
                stopped = true;
            }
            if stopped {
                finish_unstarted(&mut collector, index, descriptor, operation, &sink, "batch cancelled");
                continue;
            }
            if !descriptor.enabled {
                finish_unstarted(&mut collector, index, descriptor, operation, &sink, "disabled");
                continue;
            }
            if let Err(err) = probe::validate(descriptor) {
                tracing::warn!(repository = %descriptor.name, error = %err, "repository rejected");
                emit(sink.as_ref(), descriptor, EventKind::TaskStarted { operation });
                emit(sink.as_ref(), descriptor, EventKind::TaskFinished { outcome: TaskOutcome::Failed });
                collector.record(index, TaskResult::invalid(descriptor, operation, &err));
                continue;
            }

            // Wait for a permit, harvesting finished tasks meanwhile.
            let permit = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break None,
                    permit = Arc::clone(&semaphore).acquire_owned() => break permit.ok(),
                    Some(joined) = running.join_next(), if !running.is_empty() => {
                        harvest(&mut collector, joined);
                    }
                }
            };
            let Some(permit) = permit else {
                tracing::info!("batch cancelled; remaining repositories skipped");
                stopped = true;
                finish_unstarted(&mut collector, index, descriptor, operation, &sink, "batch cancelled");
                continue;
            };

            let job = Job {
                runner: Arc::clone(&self.runner),
                descriptor: descriptor.clone(),
                operation,
                probe_timeout: self.probe_timeout,
                sync: self.sync.clone(),
                sink: Arc::clone(&sink),
                cancel: cancel.clone(),
            };
            running.spawn(async move {
                let _permit = permit;
                let descriptor = job.descriptor.clone();
                let sink = Arc::clone(&job.sink);
                // A second spawn so a panic surfaces as a JoinError we can
                // attribute to this index.
                let result = match tokio::spawn(job.execute()).await {
                    Ok(result) => result,
                    Err(err) => crashed(&descriptor, operation, &sink, err),
                };
                (index, result)
            });
        }

        while let Some(joined) = running.join_next().await {
            harvest(&mut collector, joined);
        }

        let report = collector.freeze(cancel.is_cancelled(), started.elapsed());
        let counts = report.counts();
        tracing::info!(
            operation = %operation,
            succeeded = counts.succeeded,
            partially_failed = counts.partially_failed,
            failed = counts.failed,
            skipped = counts.skipped,
            cancelled = counts.cancelled,
            elapsed_ms = report.duration().as_millis() as u64,
            "batch finished",
        );
        report
    }
}

/// Everything one spawned task owns.
struct Job<R> {
    runner: Arc<R>,
    descriptor: RepositoryDescriptor,
    operation: Operation,
    probe_timeout: Duration,
    sync: SyncOptions,
    sink: Arc<dyn EventSink>,
    cancel: CancelToken,
}

impl<R: Runner> Job<R> {
    async fn execute(self) -> TaskResult {
        let started = Instant::now();
        let name = self.descriptor.name.clone();
        let sink = self.sink.as_ref();
        emit(sink, &self.descriptor, EventKind::TaskStarted { operation: self.operation });

        let (steps, outcome, probe) = match self.operation {
            Operation::ProbeOnly => {
                let prober = Prober::new(Arc::clone(&self.runner), self.probe_timeout);
                let mut forward =
                    |chunk: &OutputChunk| sink.emit(BatchEvent::new(name.clone(), chunk.into()));
                let probe = prober.probe_with_output(&self.descriptor, &mut forward).await;
                let outcome = match probe.report.state {
                    RepositoryState::Unreadable => TaskOutcome::Failed,
                    _ => TaskOutcome::Success,
                };
                if let Some(step) = &probe.step {
                    emit(
                        sink,
                        &self.descriptor,
                        EventKind::StepCompleted {
                            step: StepKind::Probe,
                            outcome: step.outcome,
                        },
                    );
                }
                (probe.step.into_iter().collect(), outcome, Some(probe.report))
            }
            Operation::FullSync => {
                let (steps, outcome) =
                    task::drive(self.runner.as_ref(), &self.descriptor, &self.sync, sink, &self.cancel)
                        .await;
                (steps, outcome, None)
            }
        };

        emit(sink, &self.descriptor, EventKind::TaskFinished { outcome });
        let duration = started.elapsed();
        match outcome {
            TaskOutcome::Success | TaskOutcome::Skipped => tracing::info!(
                repository = %name,
                outcome = %outcome,
                elapsed_ms = duration.as_millis() as u64,
                "task finished",
            ),
            _ => tracing::warn!(
                repository = %name,
                outcome = %outcome,
                elapsed_ms = duration.as_millis() as u64,
                "task finished",
            ),
        }

        TaskResult {
            repository: name,
            path: self.descriptor.path,
            operation: self.operation,
            steps,
            outcome,
            probe,
            error: None,
            duration,
        }
    }
}

fn emit(sink: &dyn EventSink, descriptor: &RepositoryDescriptor, kind: EventKind) {
    sink.emit(BatchEvent::new(descriptor.name.clone(), kind));
}

fn finish_unstarted(
    collector: &mut BatchCollector<'_>,
    index: usize,
    descriptor: &RepositoryDescriptor,
    operation: Operation,
    sink: &Arc<dyn EventSink>,
    reason: &str,
) {
    emit(
        sink.as_ref(),
        descriptor,
        EventKind::TaskFinished {
            outcome: TaskOutcome::Skipped,
        },
    );
    collector.record(index, TaskResult::skipped(descriptor, operation, reason));
}

fn crashed(
    descriptor: &RepositoryDescriptor,
    operation: Operation,
    sink: &Arc<dyn EventSink>,
    err: JoinError,
) -> TaskResult {
    let reason = if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        format!("task panicked: {message}")
    } else {
        "task aborted".to_string()
    };
    tracing::error!(repository = %descriptor.name, reason = %reason, "task crashed");
    emit(
        sink.as_ref(),
        descriptor,
        EventKind::TaskFinished {
            outcome: TaskOutcome::Failed,
        },
    );
    TaskResult::crashed(descriptor, operation, reason)
}

fn harvest(collector: &mut BatchCollector<'_>, joined: Result<(usize, TaskResult), JoinError>) {
    match joined {
        Ok((index, result)) => collector.record(index, result),
        // Only reachable if the wrapper itself is aborted; the gap is filled
        // when the report is frozen.
        Err(err) => tracing::error!(error = %err, "batch worker join failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StepError;
    use crate::event::NullSink;
    use crate::report::Verdict;
    use crate::step::StepOutcome;
    use crate::testing::{FakeRunner, Reply};
    use fleet_core::RepoName;
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    struct Repos {
        _root: tempfile::TempDir,
        descriptors: Vec<RepositoryDescriptor>,
    }

    impl Repos {
        fn new(names: &[&str]) -> Self {
            let root = tempfile::tempdir().unwrap();
            let descriptors = names
                .iter()
                .map(|name| {
                    let path = root.path().join(name);
                    std::fs::create_dir(&path).unwrap();
                    RepositoryDescriptor::new(RepoName::parse(name).unwrap(), path)
                })
                .collect();
            Self {
                _root: root,
                descriptors,
            }
        }

        fn path(&self, i: usize) -> PathBuf {
            self.descriptors[i].path.clone()
        }
    }

    async fn run(
        orchestrator: &Orchestrator<FakeRunner>,
        repos: &[RepositoryDescriptor],
        operation: Operation,
    ) -> BatchReport {
        orchestrator
            .run_batch(repos, operation, Arc::new(NullSink), CancelToken::new())
            .await
    }

    #[tokio::test]
    async fn report_has_one_entry_per_descriptor_in_order() {
        let repos = Repos::new(&["a", "b", "c", "d", "e"]);
        let orchestrator = Orchestrator::new(FakeRunner::new()).concurrency(2);
        let report = run(&orchestrator, &repos.descriptors, Operation::FullSync).await;

        assert_eq!(report.len(), 5);
        let names: Vec<_> = report.iter().map(|r| r.repository.to_string()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(report.verdict(), Verdict::Success);
    }

    #[tokio::test]
    async fn never_exceeds_concurrency_limit() {
        let names: Vec<String> = (0..8).map(|i| format!("repo{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let repos = Repos::new(&refs);
        let runner = FakeRunner::new().with_delay(Duration::from_millis(20));
        let orchestrator = Orchestrator::new(runner).concurrency(3);
        let report = run(&orchestrator, &repos.descriptors, Operation::FullSync).await;

        assert_eq!(report.len(), 8);
        let peak = orchestrator.runner.peak();
        assert!(peak <= 3, "peak in-flight was {peak}");
        assert!(peak >= 2, "expected some parallelism, peak was {peak}");
    }

    #[tokio::test]
    async fn failure_in_one_repository_does_not_affect_others() {
        let repos = Repos::new(&["good", "bad"]);
        let runner = FakeRunner::new().on_in(&repos.path(1), "pull", Reply::stderr(1, "conflict"));
        let orchestrator = Orchestrator::new(runner);
        let report = run(&orchestrator, &repos.descriptors, Operation::FullSync).await;

        assert_eq!(report.get("good").unwrap().outcome, TaskOutcome::Success);
        assert_eq!(report.get("bad").unwrap().outcome, TaskOutcome::Failed);
        assert_eq!(report.verdict(), Verdict::PartialFailure);
        assert_eq!(report.verdict().exit_code(), 2);
    }

    #[tokio::test]
    async fn panicking_task_is_recorded_as_failed() {
        let repos = Repos::new(&["steady", "crashy"]);
        let runner = FakeRunner::new().on_in(&repos.path(1), "add", Reply::Panic);
        let orchestrator = Orchestrator::new(runner);
        let report = run(&orchestrator, &repos.descriptors, Operation::FullSync).await;

        assert_eq!(report.len(), 2);
        assert_eq!(report.get("steady").unwrap().outcome, TaskOutcome::Success);
        let crashed = report.get("crashy").unwrap();
        assert_eq!(crashed.outcome, TaskOutcome::Failed);
        assert!(crashed
            .error
            .as_deref()
            .unwrap()
            .contains("injected runner panic"));
    }

    #[tokio::test]
    async fn disabled_and_invalid_descriptors_never_spawn() {
        let mut repos = Repos::new(&["on", "off"]);
        repos.descriptors[1].enabled = false;
        repos.descriptors.push(RepositoryDescriptor::new(
            RepoName::parse("gone").unwrap(),
            "/definitely/not/here/fleet",
        ));
        let orchestrator = Orchestrator::new(FakeRunner::new());
        let report = run(&orchestrator, &repos.descriptors, Operation::FullSync).await;

        let off = report.get("off").unwrap();
        assert_eq!(off.outcome, TaskOutcome::Skipped);
        assert_eq!(off.task_state(), crate::task::TaskState::Skipped);
        let gone = report.get("gone").unwrap();
        assert_eq!(gone.outcome, TaskOutcome::Failed);
        assert!(gone.steps.is_empty());
        assert!(gone.error.is_some());
        assert!(orchestrator.runner.calls_in(&repos.path(1)).is_empty());
        assert_eq!(report.counts().succeeded, 1);
    }

    #[tokio::test]
    async fn probe_batch_classifies_each_repository() {
        let repos = Repos::new(&["clean", "dirty"]);
        let mut descriptors = repos.descriptors.clone();
        descriptors.push(RepositoryDescriptor::new(
            RepoName::parse("gone").unwrap(),
            "/definitely/not/here/fleet",
        ));
        let upstream = Reply::Exit {
            code: 0,
            output: vec![
                OutputChunk::stdout("# branch.head main"),
                OutputChunk::stdout("# branch.upstream origin/main"),
            ],
            delay: Duration::ZERO,
        };
        let dirty = Reply::Exit {
            code: 0,
            output: vec![
                OutputChunk::stdout("# branch.head main"),
                OutputChunk::stdout("# branch.upstream origin/main"),
                OutputChunk::stdout("? notes.txt"),
            ],
            delay: Duration::ZERO,
        };
        let counts = Reply::Exit {
            code: 0,
            output: vec![OutputChunk::stdout("0\t0")],
            delay: Duration::ZERO,
        };
        let runner = FakeRunner::new()
            .on("status", upstream)
            .on_in(&repos.path(1), "status", dirty)
            .on("rev-list", counts);
        let orchestrator = Orchestrator::new(runner);
        let report = run(&orchestrator, &descriptors, Operation::ProbeOnly).await;

        assert_eq!(report.len(), 3);
        assert_eq!(report.get("clean").unwrap().state(), Some(RepositoryState::Clean));
        assert_eq!(report.get("dirty").unwrap().state(), Some(RepositoryState::Dirty));
        assert_eq!(report.get("gone").unwrap().state(), Some(RepositoryState::Unreadable));
        let probe_step = &report.get("clean").unwrap().steps[0];
        assert_eq!(probe_step.step, StepKind::Probe);
        assert_eq!(probe_step.outcome, StepOutcome::Success);
    }

    #[tokio::test]
    async fn cancellation_mid_pull_finishes_step_and_skips_queue() {
        let repos = Repos::new(&["first", "second"]);
        let runner = FakeRunner::new().on("pull", Reply::slow(0, Duration::from_millis(300)));
        let orchestrator = Arc::new(Orchestrator::new(runner).concurrency(1));
        let cancel = CancelToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let batch = {
            let orchestrator = Arc::clone(&orchestrator);
            let descriptors = repos.descriptors.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                orchestrator
                    .run_batch(&descriptors, Operation::FullSync, Arc::new(tx), cancel)
                    .await
            })
        };

        let first = repos.path(0);
        while !orchestrator
            .runner
            .calls_in(&first)
            .iter()
            .any(|c| c.starts_with("pull"))
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        let report = batch.await.unwrap();

        let a = report.get("first").unwrap();
        assert_eq!(a.outcome, TaskOutcome::Cancelled);
        let pull = a.steps.last().unwrap();
        assert_eq!(pull.step, StepKind::Pull);
        assert_eq!(pull.outcome, StepOutcome::Success, "in-flight step runs to completion");
        assert!(a.step(StepKind::Push).is_none());

        assert_eq!(report.get("second").unwrap().outcome, TaskOutcome::Skipped);
        assert!(orchestrator.runner.calls_in(&repos.path(1)).is_empty());
        assert!(report.was_cancelled());
        assert_eq!(report.verdict(), Verdict::Cancelled);

        let mut finished = Vec::new();
        while let Some(event) = rx.recv().await {
            if let EventKind::TaskFinished { outcome } = event.kind {
                finished.push((event.repository.to_string(), outcome));
            }
        }
        assert_eq!(finished.len(), 2, "exactly one task_finished per repository");
    }

    #[tokio::test]
    async fn per_repository_events_are_ordered() {
        let repos = Repos::new(&["x", "y", "z"]);
        let orchestrator = Orchestrator::new(FakeRunner::new().with_delay(Duration::from_millis(5)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        orchestrator
            .run_batch(&repos.descriptors, Operation::FullSync, Arc::new(tx), CancelToken::new())
            .await;

        let mut events: Vec<BatchEvent> = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        for name in ["x", "y", "z"] {
            let own: Vec<_> = events
                .iter()
                .filter(|e| e.repository.as_str() == name)
                .map(|e| &e.kind)
                .collect();
            assert!(matches!(own.first(), Some(EventKind::TaskStarted { .. })));
            assert!(matches!(own.last(), Some(EventKind::TaskFinished { .. })));
            assert_eq!(
                own.iter()
                    .filter(|k| matches!(k, EventKind::TaskFinished { .. }))
                    .count(),
                1
            );
        }
    }

    #[tokio::test]
    async fn step_errors_surface_on_results() {
        let repos = Repos::new(&["solo"]);
        let runner = FakeRunner::new().on("rev-parse --abbrev-ref", Reply::exit(128));
        let orchestrator = Orchestrator::new(runner);
        let report = run(&orchestrator, &repos.descriptors, Operation::FullSync).await;

        let result = report.get("solo").unwrap();
        assert_eq!(
            result.step(StepKind::Pull).and_then(|s| s.error.clone()),
            Some(StepError::NoUpstream)
        );
        assert_eq!(report.verdict(), Verdict::AllFailed);
    }

    #[test]
    fn settings_drive_the_builder() {
        let settings = Settings {
            concurrency: 0,
            ..Settings::default()
        };
        let orchestrator = Orchestrator::from_settings(FakeRunner::new(), &settings);
        assert_eq!(orchestrator.concurrency_limit(), 1);
    }
}
