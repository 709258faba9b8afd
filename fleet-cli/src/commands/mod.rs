pub mod add;
pub mod edit;
pub mod init;
pub mod list;
pub mod remove;
pub mod status;
pub mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use fleet_core::{registry, Fleet, RepositoryDescriptor};
use fleet_sync::{BatchEvent, BatchReport, CancelToken, Operation, Orchestrator, ProcessRunner};

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub(crate) fn load_fleet() -> Result<Fleet> {
    let home = home()?;
    registry::load_at(&home).context("failed to load registry; run `fleet init` first")
}

/// Every registered repository, or just `name` (case-insensitive).
pub(crate) fn select(fleet: &Fleet, name: Option<&str>) -> Result<Vec<RepositoryDescriptor>> {
    match name {
        None => Ok(fleet.repos.clone()),
        Some(name) => fleet
            .find(name)
            .cloned()
            .map(|repo| vec![repo])
            .with_context(|| format!("unknown repository '{name}'; see `fleet list`")),
    }
}

/// Run one batch on a fresh runtime, handing every event to `on_event` as
/// it arrives. Ctrl-C cancels the batch; steps already running finish.
pub(crate) fn run_batch<F>(
    orchestrator: Orchestrator<ProcessRunner>,
    descriptors: Vec<RepositoryDescriptor>,
    operation: Operation,
    mut on_event: F,
) -> Result<BatchReport>
where
    F: FnMut(BatchEvent) + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let report = runtime.block_on(async move {
        let cancel = CancelToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupted; letting running steps finish");
                    eprintln!("interrupted: finishing current steps, skipping the rest");
                    cancel.cancel();
                }
            })
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<BatchEvent>();
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                on_event(event);
            }
        });

        let report = orchestrator
            .run_batch(&descriptors, operation, Arc::new(tx), cancel)
            .await;
        // The sink was dropped with the batch, so the printer drains and stops.
        if let Err(err) = printer.await {
            tracing::error!(error = %err, "event printer failed");
        }
        interrupt.abort();
        report
    });
    Ok(report)
}

/// `1.2s`, `340ms`.
pub(crate) fn format_duration(duration: std::time::Duration) -> String {
    let ms = duration.as_millis();
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}
