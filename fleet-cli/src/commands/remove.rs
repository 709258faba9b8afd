//! `fleet remove <name>`

use anyhow::{Context, Result};
use clap::Args;

use fleet_core::registry;

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Repository to stop tracking. Files on disk are left alone.
    pub name: String,
}

impl RemoveArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let removed = registry::remove_repo_at(&home, &self.name)
            .with_context(|| format!("failed to remove '{}'", self.name))?;
        println!("✓ Removed '{}'", removed.name);
        Ok(())
    }
}
