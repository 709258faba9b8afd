//! `fleet edit <name> [--name N] [--path P] [--enable|--disable] [--force]`

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use fleet_core::registry::{self, RepoEdit};

#[derive(Args, Debug)]
pub struct EditArgs {
    /// Repository to change.
    pub name: String,

    /// New name.
    #[arg(long = "name", value_name = "NEW_NAME")]
    pub new_name: Option<String>,

    /// New location on disk.
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Include the repository in batches again.
    #[arg(long, conflicts_with = "disable")]
    pub enable: bool,

    /// Leave the repository out of batches.
    #[arg(long)]
    pub disable: bool,

    /// Accept a --path that does not exist yet.
    #[arg(long, requires = "path")]
    pub force: bool,
}

impl EditArgs {
    pub fn run(self) -> Result<()> {
        let enabled = match (self.enable, self.disable) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        if self.new_name.is_none() && self.path.is_none() && enabled.is_none() {
            bail!("nothing to change; pass --name, --path, --enable or --disable");
        }

        let home = super::home()?;
        let edit = RepoEdit {
            new_name: self.new_name,
            path: self.path,
            enabled,
            force: self.force,
        };
        let repo = registry::edit_repo_at(&home, &self.name, edit)
            .with_context(|| format!("failed to edit '{}'", self.name))?;

        let state = if repo.enabled { "enabled" } else { "disabled" };
        println!("✓ Updated '{}' ({}, {})", repo.name, repo.path.display(), state);
        Ok(())
    }
}
