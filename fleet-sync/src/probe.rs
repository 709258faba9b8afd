//! Repository Prober: read-only classification of a repository.
//!
//! Classification precedence:
//! 1. `Unreadable` (path missing, not a repository root, status query failed)
//! 2. `NoRemote` (current branch has no usable upstream)
//! 3. `Diverged` (ahead > 0 and behind > 0)
//! 4. `Behind`
//! 5. `Ahead`
//! 6. `Dirty` (staged, unstaged or untracked changes)
//! 7. `Clean`
//!
//! Ahead/behind wins over dirtiness for the headline state; dirtiness stays
//! visible on [`ProbeReport::dirty`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use fleet_core::RepositoryDescriptor;

use crate::error::StepError;
use crate::runner::{OutputChunk, Runner};
use crate::step::{StepAudit, StepKind, StepResult};

/// Headline synchronization state of a repository. Never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryState {
    Clean,
    Dirty,
    Ahead(u32),
    Behind(u32),
    Diverged(u32, u32),
    NoRemote,
    Unreadable,
}

impl fmt::Display for RepositoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryState::Clean => write!(f, "clean"),
            RepositoryState::Dirty => write!(f, "dirty"),
            RepositoryState::Ahead(n) => write!(f, "ahead {n}"),
            RepositoryState::Behind(n) => write!(f, "behind {n}"),
            RepositoryState::Diverged(ahead, behind) => {
                write!(f, "diverged (+{ahead}/-{behind})")
            }
            RepositoryState::NoRemote => write!(f, "no remote"),
            RepositoryState::Unreadable => write!(f, "unreadable"),
        }
    }
}

/// Headline state plus the narrative that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub state: RepositoryState,
    pub branch: Option<String>,
    pub upstream: Option<String>,
    /// Entries reported by the status query (tracked changes + untracked).
    pub changed_files: usize,
    pub dirty: bool,
    /// Why the repository was classified `Unreadable` / `NoRemote`.
    pub detail: Option<String>,
}

impl ProbeReport {
    pub(crate) fn unreadable(detail: impl Into<String>) -> Self {
        Self {
            state: RepositoryState::Unreadable,
            branch: None,
            upstream: None,
            changed_files: 0,
            dirty: false,
            detail: Some(detail.into()),
        }
    }
}

/// A finished probe: the report and, when any command ran, its audit record.
#[derive(Debug, Clone)]
pub struct Probe {
    pub report: ProbeReport,
    pub step: Option<StepResult>,
}

/// Reject descriptors that cannot possibly be probed, without spawning.
pub fn validate(descriptor: &RepositoryDescriptor) -> Result<(), StepError> {
    let reason = match std::fs::metadata(&descriptor.path) {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => "not a directory".to_string(),
        Err(err) => err.to_string(),
    };
    Err(StepError::Validation {
        path: descriptor.path.clone(),
        reason,
    })
}

/// Issues the fixed read-only command sequence against one repository.
pub struct Prober<R> {
    runner: Arc<R>,
    timeout: Duration,
}

impl<R: Runner> Prober<R> {
    pub fn new(runner: Arc<R>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    /// Classify `descriptor`, discarding command output.
    pub async fn probe(&self, descriptor: &RepositoryDescriptor) -> ProbeReport {
        self.probe_with_output(descriptor, &mut |_: &OutputChunk| {})
            .await
            .report
    }

    /// Classify `descriptor`, forwarding command output as it arrives.
    pub async fn probe_with_output(
        &self,
        descriptor: &RepositoryDescriptor,
        on_output: &mut (dyn FnMut(&OutputChunk) + Send),
    ) -> Probe {
        if let Err(err) = validate(descriptor) {
            return Probe {
                report: ProbeReport::unreadable(err.to_string()),
                step: None,
            };
        }

        let mut audit = StepAudit::new(StepKind::Probe);
        let (report, failure) = self.inspect(&descriptor.path, &mut audit, on_output).await;
        let step = match failure {
            Some(err) => audit.failed(err),
            None => audit.success(),
        };
        Probe {
            report,
            step: Some(step),
        }
    }

    async fn inspect(
        &self,
        path: &Path,
        audit: &mut StepAudit,
        on_output: &mut (dyn FnMut(&OutputChunk) + Send),
    ) -> (ProbeReport, Option<StepError>) {
        let runner = self.runner.as_ref();

        // 1. repository root check
        let toplevel = match audit
            .exec(runner, path, &["rev-parse", "--show-toplevel"], self.timeout, on_output)
            .await
        {
            Ok(out) if out.success() => PathBuf::from(out.stdout_text().trim()),
            Ok(out) => {
                let err = exit_error(out.exit_code);
                return (ProbeReport::unreadable("not a git repository"), Some(err));
            }
            Err(err) => return (ProbeReport::unreadable(err.to_string()), Some(err)),
        };
        if !same_dir(&toplevel, path) {
            let detail = format!(
                "not a repository root (enclosing repository is {})",
                toplevel.display()
            );
            return (
                ProbeReport::unreadable(detail.clone()),
                Some(StepError::Validation {
                    path: path.to_path_buf(),
                    reason: detail,
                }),
            );
        }

        // 2. working-tree status
        let status = match audit
            .exec(
                runner,
                path,
                &["status", "--porcelain=v2", "--branch"],
                self.timeout,
                on_output,
            )
            .await
        {
            Ok(out) if out.success() => parse_status(&out.stdout_text()),
            Ok(out) => {
                let err = exit_error(out.exit_code);
                return (ProbeReport::unreadable("status query failed"), Some(err));
            }
            Err(err) => return (ProbeReport::unreadable(err.to_string()), Some(err)),
        };

        let mut report = ProbeReport {
            state: RepositoryState::Clean,
            branch: status.branch,
            upstream: status.upstream,
            changed_files: status.changed_files,
            dirty: status.changed_files > 0,
            detail: None,
        };

        if report.upstream.is_none() {
            report.state = RepositoryState::NoRemote;
            report.detail = Some("no upstream configured for the current branch".to_string());
            return (report, None);
        }

        // 3. remote-tracking comparison
        let counts = match audit
            .exec(
                runner,
                path,
                &["rev-list", "--left-right", "--count", "HEAD...@{upstream}"],
                self.timeout,
                on_output,
            )
            .await
        {
            Ok(out) if out.success() => parse_ahead_behind(&out.stdout_text()),
            Ok(_) => None,
            Err(err) => {
                report.state = RepositoryState::NoRemote;
                report.detail = Some(format!("upstream comparison failed: {err}"));
                return (report, None);
            }
        };
        let Some((ahead, behind)) = counts else {
            report.state = RepositoryState::NoRemote;
            report.detail = Some("upstream branch is missing".to_string());
            return (report, None);
        };

        report.state = classify(ahead, behind, report.dirty);
        (report, None)
    }
}

/// Rules 3–7 of the precedence table.
pub fn classify(ahead: u32, behind: u32, dirty: bool) -> RepositoryState {
    match (ahead, behind) {
        (a, b) if a > 0 && b > 0 => RepositoryState::Diverged(a, b),
        (_, b) if b > 0 => RepositoryState::Behind(b),
        (a, _) if a > 0 => RepositoryState::Ahead(a),
        _ if dirty => RepositoryState::Dirty,
        _ => RepositoryState::Clean,
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct StatusSummary {
    pub branch: Option<String>,
    pub upstream: Option<String>,
    pub changed_files: usize,
}

/// Parse `git status --porcelain=v2 --branch`.
pub(crate) fn parse_status(text: &str) -> StatusSummary {
    let mut summary = StatusSummary::default();
    for line in text.lines() {
        if let Some(head) = line.strip_prefix("# branch.head ") {
            if head != "(detached)" {
                summary.branch = Some(head.to_string());
            }
        } else if let Some(upstream) = line.strip_prefix("# branch.upstream ") {
            summary.upstream = Some(upstream.to_string());
        } else if line.starts_with("1 ")
            || line.starts_with("2 ")
            || line.starts_with("u ")
            || line.starts_with("? ")
        {
            summary.changed_files += 1;
        }
    }
    summary
}

/// Parse `git rev-list --left-right --count HEAD...@{upstream}` → (ahead, behind).
pub(crate) fn parse_ahead_behind(text: &str) -> Option<(u32, u32)> {
    let mut parts = text.split_whitespace();
    let ahead = parts.next()?.parse().ok()?;
    let behind = parts.next()?.parse().ok()?;
    Some((ahead, behind))
}

fn exit_error(code: Option<i32>) -> StepError {
    match code {
        Some(code) => StepError::Command { code },
        None => StepError::Killed,
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0, false, RepositoryState::Clean)]
    #[case(0, 0, true, RepositoryState::Dirty)]
    #[case(2, 0, false, RepositoryState::Ahead(2))]
    #[case(2, 0, true, RepositoryState::Ahead(2))]
    #[case(0, 3, true, RepositoryState::Behind(3))]
    #[case(1, 4, false, RepositoryState::Diverged(1, 4))]
    #[case(1, 4, true, RepositoryState::Diverged(1, 4))]
    fn classification_precedence(
        #[case] ahead: u32,
        #[case] behind: u32,
        #[case] dirty: bool,
        #[case] expected: RepositoryState,
    ) {
        assert_eq!(classify(ahead, behind, dirty), expected);
    }

    #[test]
    fn parse_status_reads_branch_upstream_and_entries() {
        let text = "\
# branch.oid 1234567890abcdef
# branch.head main
# branch.upstream origin/main
# branch.ab +1 -0
1 .M N... 100644 100644 100644 abc abc README.md
2 R. N... 100644 100644 100644 abc abc R100 new.txt\told.txt
? scratch.txt";
        let summary = parse_status(text);
        assert_eq!(summary.branch.as_deref(), Some("main"));
        assert_eq!(summary.upstream.as_deref(), Some("origin/main"));
        assert_eq!(summary.changed_files, 3);
    }

    #[test]
    fn parse_status_without_upstream_or_changes() {
        let summary = parse_status("# branch.oid (initial)\n# branch.head main\n");
        assert_eq!(summary.upstream, None);
        assert_eq!(summary.changed_files, 0);
    }

    #[test]
    fn parse_status_detached_head_has_no_branch() {
        let summary = parse_status("# branch.oid abc\n# branch.head (detached)\n");
        assert_eq!(summary.branch, None);
    }

    #[rstest]
    #[case("3\t1", Some((3, 1)))]
    #[case("0\t0\n", Some((0, 0)))]
    #[case("", None)]
    #[case("fatal", None)]
    fn parse_ahead_behind_cases(#[case] text: &str, #[case] expected: Option<(u32, u32)>) {
        assert_eq!(parse_ahead_behind(text), expected);
    }

    #[test]
    fn state_display() {
        assert_eq!(RepositoryState::Diverged(1, 2).to_string(), "diverged (+1/-2)");
        assert_eq!(RepositoryState::NoRemote.to_string(), "no remote");
    }

    #[test]
    fn validate_rejects_missing_path() {
        let desc = RepositoryDescriptor::new(
            fleet_core::RepoName::parse("gone").unwrap(),
            "/definitely/not/here/fleet",
        );
        assert!(matches!(validate(&desc), Err(StepError::Validation { .. })));
    }
}
