//! `fleet list [--json]`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct RepoJson {
    name: String,
    path: String,
    enabled: bool,
}

#[derive(Tabled)]
struct RepoRow {
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "enabled")]
    enabled: String,
}

impl ListArgs {
    pub fn run(self) -> Result<()> {
        let fleet = super::load_fleet()?;

        if self.json {
            let payload: Vec<RepoJson> = fleet
                .repos
                .iter()
                .map(|r| RepoJson {
                    name: r.name.to_string(),
                    path: r.path.display().to_string(),
                    enabled: r.enabled,
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize repository list")?
            );
            return Ok(());
        }

        if fleet.repos.is_empty() {
            println!("No repositories registered.");
            println!("Run: fleet add <name> <path>");
            return Ok(());
        }

        let rows: Vec<RepoRow> = fleet
            .repos
            .iter()
            .map(|r| RepoRow {
                name: r.name.to_string(),
                path: r.path.display().to_string(),
                enabled: if r.enabled { "yes" } else { "no" }.to_string(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");

        let disabled = fleet.repos.iter().filter(|r| !r.enabled).count();
        if disabled > 0 {
            println!("{}", format!("{disabled} disabled").bright_black());
        }
        Ok(())
    }
}
