//! Command Runner: one external process per call, output streamed live.
//!
//! Arguments always travel as a discrete vector; nothing is ever handed to a
//! shell. A non-zero exit is data for the caller, not an error.

use std::ffi::OsString;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::error::RunError;

/// How long to keep draining pipes after the child exited. A grandchild that
/// inherited stdout can otherwise hold the call open until the timeout.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Chunks buffered between the pipe readers and the caller. A child that
/// writes faster than the caller consumes blocks on its pipe.
const OUTPUT_BUFFER: usize = 256;

/// Which pipe a chunk of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// One line of output, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputChunk {
    pub stream: Stream,
    pub text: String,
}

impl OutputChunk {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: Stream::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: Stream::Stderr,
            text: text.into(),
        }
    }
}

/// What to run and where.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub cwd: &'a Path,
    pub args: &'a [&'a str],
    pub timeout: Duration,
}

/// Terminal record of a command that ran to exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub output: Vec<OutputChunk>,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// All stdout lines joined with `\n`.
    pub fn stdout_text(&self) -> String {
        self.output
            .iter()
            .filter(|c| c.stream == Stream::Stdout)
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The seam between the sync state machine and process spawning.
///
/// `on_output` is called once per chunk, as chunks arrive, before `run`
/// resolves.
pub trait Runner: Send + Sync + 'static {
    fn run(
        &self,
        invocation: Invocation<'_>,
        on_output: &mut (dyn FnMut(&OutputChunk) + Send),
    ) -> impl Future<Output = Result<CommandOutput, RunError>> + Send;
}

/// [`Runner`] backed by real child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: OsString,
    envs: Vec<(OsString, OsString)>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            envs: Vec::new(),
        }
    }

    /// Runner for the `git` found on `PATH`.
    pub fn git() -> Self {
        Self::new("git")
    }

    /// Add an environment variable to every spawned process.
    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::git()
    }
}

impl Runner for ProcessRunner {
    async fn run(
        &self,
        invocation: Invocation<'_>,
        on_output: &mut (dyn FnMut(&OutputChunk) + Send),
    ) -> Result<CommandOutput, RunError> {
        let started = Instant::now();
        let program = self.program.to_string_lossy().into_owned();
        tracing::debug!(
            program = %program,
            args = ?invocation.args,
            cwd = %invocation.cwd.display(),
            "spawning command",
        );

        let mut command = Command::new(&self.program);
        command
            .args(invocation.args)
            .current_dir(invocation.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Credentials come from the client's own store; never block on a prompt.
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        for (key, value) in &self.envs {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| RunError::Spawn {
            program: program.clone(),
            source,
        })?;

        let (tx, mut rx) = mpsc::channel::<OutputChunk>(OUTPUT_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, Stream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, Stream::Stderr, tx.clone()));
        }
        drop(tx);

        let deadline_at = tokio::time::Instant::now() + invocation.timeout;
        let deadline = tokio::time::sleep_until(deadline_at);
        tokio::pin!(deadline);

        let mut output = Vec::new();
        let mut streams_open = true;
        let mut exit = None;
        let mut drain_until: Option<tokio::time::Instant> = None;
        let mut timed_out = false;

        loop {
            if exit.is_some() && !streams_open {
                break;
            }
            tokio::select! {
                biased;
                _ = &mut deadline, if exit.is_none() => {
                    timed_out = true;
                    break;
                }
                chunk = rx.recv(), if streams_open => match chunk {
                    Some(chunk) => {
                        on_output(&chunk);
                        output.push(chunk);
                        // A child that never stops writing keeps this branch ready.
                        if exit.is_none() && tokio::time::Instant::now() >= deadline_at {
                            timed_out = true;
                            break;
                        }
                    }
                    None => streams_open = false,
                },
                status = child.wait(), if exit.is_none() => {
                    let status = status.map_err(|source| RunError::Io {
                        program: program.clone(),
                        source,
                    })?;
                    exit = Some(status);
                    drain_until = Some(tokio::time::Instant::now() + DRAIN_GRACE);
                }
                _ = sleep_until_opt(drain_until), if drain_until.is_some() => {
                    tracing::debug!(program = %program, "output pipes still open after exit; not waiting further");
                    break;
                }
            }
        }

        if timed_out {
            if let Err(err) = child.kill().await {
                tracing::warn!(program = %program, error = %err, "failed to kill timed-out command");
            }
            while let Ok(chunk) = rx.try_recv() {
                on_output(&chunk);
                output.push(chunk);
            }
            tracing::warn!(
                program = %program,
                args = ?invocation.args,
                timeout_secs = invocation.timeout.as_secs(),
                "command timed out",
            );
            return Err(RunError::Timeout {
                after: invocation.timeout,
                partial: output,
            });
        }

        let exit_code = exit.and_then(|status| status.code());
        Ok(CommandOutput {
            exit_code,
            output,
            duration: started.elapsed(),
        })
    }
}

async fn sleep_until_opt(until: Option<tokio::time::Instant>) {
    match until {
        Some(until) => tokio::time::sleep_until(until).await,
        None => std::future::pending().await,
    }
}

async fn forward_lines<R>(reader: R, stream: Stream, tx: mpsc::Sender<OutputChunk>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                if tx.send(OutputChunk { stream, text }).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "output pipe read failed");
                break;
            }
        }
    }
}
