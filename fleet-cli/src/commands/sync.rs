//! `fleet sync`: stage, commit, pull and push every repository.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use fleet_sync::{
    BatchCounts, BatchEvent, BatchReport, EventKind, Operation, Orchestrator, ProcessRunner,
    StepKind, StepOutcome, Stream, TaskOutcome, TaskResult, Verdict,
};

/// Arguments for `fleet sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Only this repository.
    pub name: Option<String>,

    /// Repositories synced at once (defaults to the registry setting).
    #[arg(long, short = 'j', value_name = "N")]
    pub jobs: Option<usize>,

    /// Per-command timeout in seconds (defaults to the registry setting).
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Stream newline-delimited JSON events instead of text.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    /// Returns the process exit code.
    pub fn run(self) -> Result<i32> {
        let fleet = super::load_fleet()?;
        let descriptors = super::select(&fleet, self.name.as_deref())?;
        if descriptors.is_empty() && !self.json {
            println!("No repositories registered.");
            return Ok(0);
        }

        let mut orchestrator = Orchestrator::from_settings(ProcessRunner::git(), &fleet.settings);
        if let Some(jobs) = self.jobs {
            orchestrator = orchestrator.concurrency(jobs);
        }
        if let Some(secs) = self.timeout {
            orchestrator = orchestrator.command_timeout(Duration::from_secs(secs));
        }

        let json = self.json;
        let report = super::run_batch(orchestrator, descriptors, Operation::FullSync, move |event| {
            if json {
                print_event_json(&event);
            } else {
                print_event(&event);
            }
        })?;

        if self.json {
            print_summary_json(&report)?;
        } else {
            print_summary(&report);
        }
        Ok(report.verdict().exit_code())
    }
}

// ---------------------------------------------------------------------------
// Live output
// ---------------------------------------------------------------------------

fn print_event(event: &BatchEvent) {
    let prefix = format!("[{}]", event.repository).bold();
    match &event.kind {
        EventKind::TaskStarted { .. } => println!("{prefix} {}", "syncing".bright_black()),
        EventKind::OutputLine { text, stream } => match stream {
            Stream::Stdout => println!("{prefix} {text}"),
            Stream::Stderr => println!("{prefix} {}", text.bright_black()),
        },
        EventKind::StepCompleted { step, outcome } => {
            let mark = match outcome {
                StepOutcome::Success => "✓".green(),
                StepOutcome::Skipped => "–".bright_black(),
                StepOutcome::Failed => "✗".red(),
            };
            println!("{prefix} {mark} {step} {outcome}");
        }
        EventKind::TaskFinished { outcome } => {
            println!("{prefix} {}", colored_outcome(*outcome));
        }
    }
}

fn print_event_json(event: &BatchEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(err) => tracing::error!(error = %err, "failed to serialize event"),
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Tabled)]
struct SyncRow {
    #[tabled(rename = "repository")]
    repository: String,
    #[tabled(rename = "stage")]
    stage: String,
    #[tabled(rename = "commit")]
    commit: String,
    #[tabled(rename = "pull")]
    pull: String,
    #[tabled(rename = "push")]
    push: String,
    #[tabled(rename = "outcome")]
    outcome: String,
    #[tabled(rename = "time")]
    time: String,
}

#[derive(Serialize)]
struct BatchSummaryJson {
    event: &'static str,
    verdict: Verdict,
    cancelled: bool,
    summary: BatchCounts,
    duration_ms: u64,
    repositories: Vec<RepoSyncJson>,
}

#[derive(Serialize)]
struct RepoSyncJson {
    name: String,
    outcome: TaskOutcome,
    steps: Vec<StepJson>,
    error: Option<String>,
}

#[derive(Serialize)]
struct StepJson {
    step: StepKind,
    outcome: StepOutcome,
    exit_code: Option<i32>,
    error: Option<String>,
    note: Option<String>,
}

fn print_summary(report: &BatchReport) {
    let rows: Vec<SyncRow> = report
        .iter()
        .map(|r| SyncRow {
            repository: r.repository.to_string(),
            stage: step_cell(r, StepKind::Stage),
            commit: step_cell(r, StepKind::Commit),
            pull: step_cell(r, StepKind::Pull),
            push: step_cell(r, StepKind::Push),
            outcome: r.outcome.to_string(),
            time: super::format_duration(r.duration),
        })
        .collect();
    println!();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    for result in report.iter() {
        if let Some(reason) = failure_reason(result) {
            println!("{} {}: {}", "✗".red(), result.repository, reason);
        }
    }

    let counts = report.counts();
    let line = format!(
        "{} succeeded, {} partially failed, {} failed, {} skipped, {} cancelled in {}",
        counts.succeeded,
        counts.partially_failed,
        counts.failed,
        counts.skipped,
        counts.cancelled,
        super::format_duration(report.duration()),
    );
    match report.verdict() {
        Verdict::Success => println!("{}", line.green()),
        Verdict::PartialFailure => println!("{}", line.yellow()),
        Verdict::AllFailed => println!("{}", line.red()),
        Verdict::Cancelled => println!("{} ({})", line.yellow(), "cancelled".bold()),
    }
    if counts.partially_failed > 0 {
        println!("Local changes are committed; re-run `fleet sync` to retry the push.");
    }
}

fn print_summary_json(report: &BatchReport) -> Result<()> {
    let payload = BatchSummaryJson {
        event: "batch_finished",
        verdict: report.verdict(),
        cancelled: report.was_cancelled(),
        summary: report.counts(),
        duration_ms: u64::try_from(report.duration().as_millis()).unwrap_or(u64::MAX),
        repositories: report
            .iter()
            .map(|r| RepoSyncJson {
                name: r.repository.to_string(),
                outcome: r.outcome,
                steps: r
                    .steps
                    .iter()
                    .map(|s| StepJson {
                        step: s.step,
                        outcome: s.outcome,
                        exit_code: s.exit_code,
                        error: s.error.as_ref().map(ToString::to_string),
                        note: s.note.clone(),
                    })
                    .collect(),
                error: r.error.clone(),
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string(&payload).context("failed to serialize sync summary")?
    );
    Ok(())
}

fn step_cell(result: &TaskResult, step: StepKind) -> String {
    result
        .step(step)
        .map(|s| s.outcome.to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// First step error, or the task-level reason.
fn failure_reason(result: &TaskResult) -> Option<String> {
    if matches!(result.outcome, TaskOutcome::Success) {
        return None;
    }
    result
        .steps
        .iter()
        .find_map(|s| s.error.as_ref().map(|e| format!("{} {}", s.step, e)))
        .or_else(|| result.error.clone())
}

fn colored_outcome(outcome: TaskOutcome) -> String {
    let text = outcome.to_string();
    match outcome {
        TaskOutcome::Success => text.green().bold().to_string(),
        TaskOutcome::PartialFailure => text.yellow().bold().to_string(),
        TaskOutcome::Failed => text.red().bold().to_string(),
        TaskOutcome::Skipped | TaskOutcome::Cancelled => text.bright_black().to_string(),
    }
}
