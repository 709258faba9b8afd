//! Fleet: keep many git repositories in sync.
//!
//! # Usage
//!
//! ```text
//! fleet init
//! fleet list [--json]
//! fleet add <name> <path>
//! fleet remove <name>
//! fleet edit <name> [--name N] [--path P] [--enable|--disable] [--force]
//! fleet status [NAME] [--json] [--jobs N]
//! fleet sync [NAME] [--jobs N] [--timeout SECS] [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    add::AddArgs, edit::EditArgs, init::InitArgs, list::ListArgs, remove::RemoveArgs,
    status::StatusArgs, sync::SyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "fleet",
    version,
    about = "Probe and synchronize many git repositories at once",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the registry at ~/.fleet/fleet.yaml.
    Init(InitArgs),

    /// List registered repositories.
    List(ListArgs),

    /// Register a repository.
    Add(AddArgs),

    /// Stop tracking a repository.
    Remove(RemoveArgs),

    /// Rename, move, enable or disable a repository.
    Edit(EditArgs),

    /// Show the synchronization state of every repository.
    Status(StatusArgs),

    /// Stage, commit, pull and push every repository.
    Sync(SyncArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Init(args) => args.run().map(|()| 0),
        Commands::List(args) => args.run().map(|()| 0),
        Commands::Add(args) => args.run().map(|()| 0),
        Commands::Remove(args) => args.run().map(|()| 0),
        Commands::Edit(args) => args.run().map(|()| 0),
        Commands::Status(args) => args.run(),
        Commands::Sync(args) => args.run(),
    }?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Diagnostics go to stderr so stdout stays machine-readable.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
