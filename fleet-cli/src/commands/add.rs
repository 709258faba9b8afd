//! `fleet add <name> <path>`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use fleet_core::registry;

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Unique name for the repository (case-insensitive, at most 100 characters).
    pub name: String,

    /// Path to the repository root.
    pub path: PathBuf,
}

impl AddArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let repo = registry::add_repo_at(&home, &self.name, &self.path)
            .with_context(|| format!("failed to add '{}'", self.name))?;
        println!("✓ Added '{}' ({})", repo.name, repo.path.display());
        Ok(())
    }
}
