//! `fleet status`: read-only probe of every repository.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use fleet_sync::{
    BatchCounts, BatchReport, Operation, Orchestrator, ProcessRunner, RepositoryState, TaskOutcome,
    TaskResult, Verdict,
};

/// Arguments for `fleet status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only this repository.
    pub name: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,

    /// Repositories probed at once (defaults to the registry setting).
    #[arg(long, short = 'j', value_name = "N")]
    pub jobs: Option<usize>,
}

impl StatusArgs {
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
        let report = super::run_batch(orchestrator, descriptors, Operation::ProbeOnly, |_| {})?;

        if self.json {
            print_json(&report)?;
        } else {
            print_table(&report);
        }
        Ok(report.verdict().exit_code())
    }
}

#[derive(Serialize)]
struct StatusReportJson {
    generated_at: DateTime<Utc>,
    verdict: Verdict,
    summary: BatchCounts,
    repositories: Vec<RepoStatusJson>,
}

#[derive(Serialize)]
struct RepoStatusJson {
    name: String,
    path: String,
    outcome: TaskOutcome,
    state: Option<&'static str>,
    ahead: u32,
    behind: u32,
    branch: Option<String>,
    upstream: Option<String>,
    changed_files: usize,
    dirty: bool,
    detail: Option<String>,
    duration_ms: u64,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "repository")]
    repository: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "branch")]
    branch: String,
    #[tabled(rename = "changes")]
    changes: usize,
    #[tabled(rename = "detail")]
    detail: String,
}

fn print_json(report: &BatchReport) -> Result<()> {
    let payload = StatusReportJson {
        generated_at: Utc::now(),
        verdict: report.verdict(),
        summary: report.counts(),
        repositories: report.iter().map(repo_json).collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn repo_json(result: &TaskResult) -> RepoStatusJson {
    let probe = result.probe.as_ref();
    let (ahead, behind) = result.state().map(ahead_behind).unwrap_or((0, 0));
    RepoStatusJson {
        name: result.repository.to_string(),
        path: result.path.display().to_string(),
        outcome: result.outcome,
        state: result.state().map(state_key),
        ahead,
        behind,
        branch: probe.and_then(|p| p.branch.clone()),
        upstream: probe.and_then(|p| p.upstream.clone()),
        changed_files: probe.map_or(0, |p| p.changed_files),
        dirty: probe.is_some_and(|p| p.dirty),
        detail: detail(result),
        duration_ms: duration_ms(result.duration),
    }
}

fn print_table(report: &BatchReport) {
    let counts = report.counts();
    let needs_attention = report
        .iter()
        .filter(|r| !matches!(r.state(), Some(RepositoryState::Clean)))
        .count();
    println!(
        "fleet v{} | {} repositories | {} need attention",
        env!("CARGO_PKG_VERSION"),
        report.len(),
        needs_attention,
    );

    let rows: Vec<StatusRow> = report
        .iter()
        .map(|r| StatusRow {
            repository: r.repository.to_string(),
            state: match r.state() {
                Some(state) => state.to_string(),
                None => r.outcome.to_string(),
            },
            branch: r
                .probe
                .as_ref()
                .and_then(|p| p.branch.clone())
                .unwrap_or_else(|| "-".to_string()),
            changes: r.probe.as_ref().map_or(0, |p| p.changed_files),
            detail: detail(r).unwrap_or_default(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    let mut legend = Vec::new();
    for result in report.iter() {
        if let Some(state) = result.state() {
            legend.push(format!("{} {}", indicator(state), result.repository));
        }
    }
    if !legend.is_empty() {
        println!("{}", legend.join("  "));
    }
    if counts.skipped > 0 {
        println!("{}", format!("{} skipped", counts.skipped).bright_black());
    }
    if report.was_cancelled() {
        println!("{}", "cancelled".yellow().bold());
    }
}

fn detail(result: &TaskResult) -> Option<String> {
    result
        .probe
        .as_ref()
        .and_then(|p| p.detail.clone())
        .or_else(|| result.error.clone())
}

fn ahead_behind(state: RepositoryState) -> (u32, u32) {
    match state {
        RepositoryState::Ahead(a) => (a, 0),
        RepositoryState::Behind(b) => (0, b),
        RepositoryState::Diverged(a, b) => (a, b),
        _ => (0, 0),
    }
}

fn state_key(state: RepositoryState) -> &'static str {
    match state {
        RepositoryState::Clean => "clean",
        RepositoryState::Dirty => "dirty",
        RepositoryState::Ahead(_) => "ahead",
        RepositoryState::Behind(_) => "behind",
        RepositoryState::Diverged(..) => "diverged",
        RepositoryState::NoRemote => "no_remote",
        RepositoryState::Unreadable => "unreadable",
    }
}

fn indicator(state: RepositoryState) -> String {
    match state {
        RepositoryState::Clean => "■".green().bold().to_string(),
        RepositoryState::Dirty => "■".yellow().bold().to_string(),
        RepositoryState::Ahead(_) | RepositoryState::Behind(_) => "■".cyan().bold().to_string(),
        RepositoryState::Diverged(..) => "■".red().bold().to_string(),
        RepositoryState::NoRemote => "■".magenta().bold().to_string(),
        RepositoryState::Unreadable => "■".bright_black().bold().to_string(),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
