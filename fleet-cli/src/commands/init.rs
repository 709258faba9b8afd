//! `fleet init`

use anyhow::{Context, Result};
use clap::Args;

use fleet_core::registry;

/// Create the registry if it does not exist yet.
#[derive(Args, Debug)]
pub struct InitArgs {}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let (_, created) = registry::init_at(&home).context("failed to initialize registry")?;
        let path = registry::config_path_at(&home);
        if created {
            println!("✓ Created {}", path.display());
            println!("  Next: fleet add <name> <path>");
        } else {
            println!("Registry already exists at {}", path.display());
        }
        Ok(())
    }
}
