//! Scripted [`Runner`] for unit tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::RunError;
use crate::runner::{CommandOutput, Invocation, OutputChunk, Runner};

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Exit {
        code: i32,
        output: Vec<OutputChunk>,
        delay: Duration,
    },
    Timeout,
    Spawn,
    Panic,
}

impl Reply {
    pub(crate) fn exit(code: i32) -> Self {
        Reply::Exit {
            code,
            output: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn stderr(code: i32, line: &str) -> Self {
        Reply::Exit {
            code,
            output: vec![OutputChunk::stderr(line)],
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn slow(code: i32, delay: Duration) -> Self {
        Reply::Exit {
            code,
            output: Vec::new(),
            delay,
        }
    }
}

struct Rule {
    cwd: Option<PathBuf>,
    prefix: String,
    reply: Reply,
}

/// Matches each call against rules (first match wins, most recent first);
/// unmatched calls exit 0, and `rev-parse --show-toplevel` echoes the cwd.
#[derive(Default)]
pub(crate) struct FakeRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<(PathBuf, String)>>,
    default_delay: Mutex<Duration>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reply to any call in any repository whose args start with `prefix`.
    pub(crate) fn on(self, prefix: &str, reply: Reply) -> Self {
        self.push(None, prefix, reply);
        self
    }

    /// Reply to calls in `cwd` whose args start with `prefix`.
    pub(crate) fn on_in(self, cwd: &Path, prefix: &str, reply: Reply) -> Self {
        self.push(Some(cwd.to_path_buf()), prefix, reply);
        self
    }

    /// Delay applied to every otherwise-unmatched call.
    pub(crate) fn with_delay(self, delay: Duration) -> Self {
        *self.default_delay.lock().unwrap() = delay;
        self
    }

    fn push(&self, cwd: Option<PathBuf>, prefix: &str, reply: Reply) {
        self.rules.lock().unwrap().push(Rule {
            cwd,
            prefix: prefix.to_string(),
            reply,
        });
    }

    /// Calls made in `cwd`, each as `args.join(" ")`.
    pub(crate) fn calls_in(&self, cwd: &Path) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(dir, _)| dir == cwd)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, args)| args.clone())
            .collect()
    }

    /// Highest number of commands observed in flight at once.
    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn reply_for(&self, cwd: &Path, args: &str) -> Reply {
        let rules = self.rules.lock().unwrap();
        let matched = rules.iter().rev().find(|rule| {
            args.starts_with(&rule.prefix) && rule.cwd.as_deref().map_or(true, |dir| dir == cwd)
        });
        if let Some(rule) = matched {
            return rule.reply.clone();
        }
        let delay = *self.default_delay.lock().unwrap();
        let output = if args == "rev-parse --show-toplevel" {
            vec![OutputChunk::stdout(cwd.display().to_string())]
        } else {
            Vec::new()
        };
        Reply::Exit {
            code: 0,
            output,
            delay,
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Runner for FakeRunner {
    async fn run(
        &self,
        invocation: Invocation<'_>,
        on_output: &mut (dyn FnMut(&OutputChunk) + Send),
    ) -> Result<CommandOutput, RunError> {
        let args = invocation.args.join(" ");
        self.calls
            .lock()
            .unwrap()
            .push((invocation.cwd.to_path_buf(), args.clone()));
        let reply = self.reply_for(invocation.cwd, &args);

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.active);

        let started = Instant::now();
        match reply {
            Reply::Exit {
                code,
                output,
                delay,
            } => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                for chunk in &output {
                    on_output(chunk);
                }
                Ok(CommandOutput {
                    exit_code: Some(code),
                    output,
                    duration: started.elapsed(),
                })
            }
            Reply::Timeout => Err(RunError::Timeout {
                after: invocation.timeout,
                partial: vec![OutputChunk::stderr("partial")],
            }),
            Reply::Spawn => Err(RunError::Spawn {
                program: "git".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            }),
            Reply::Panic => panic!("injected runner panic for {args}"),
        }
    }
}
