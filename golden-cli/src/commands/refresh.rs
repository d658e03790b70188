//! `golden refresh <alias>`: one synchronous run of the refresh pipeline.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use golden_core::RepoAlias;
use golden_refresh::{init_tracing, standalone_scheduler, RefreshAction};

use super::home;

#[derive(Args, Debug)]
pub struct RefreshArgs {
    /// Repository alias to refresh.
    pub alias: String,

    /// Emit the outcome as JSON.
    #[arg(long)]
    pub json: bool,
}

impl RefreshArgs {
    pub fn run(self) -> Result<()> {
        init_tracing();
        let home = home()?;
        let scheduler = standalone_scheduler(&home).context("failed to set up refresh")?;
        let alias = RepoAlias::from(self.alias);
        let outcome = scheduler
            .execute_refresh(&alias)
            .with_context(|| format!("refresh of '{alias}' failed"))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&outcome).context("failed to serialize outcome")?
            );
            return Ok(());
        }

        let status = match outcome.action {
            RefreshAction::Refreshed { .. } => "refreshed".green(),
            RefreshAction::NoChanges => "unchanged".normal(),
            RefreshAction::SkippedWriteInProgress { .. } => "skipped".yellow(),
        };
        println!("{status} {}: {}", outcome.alias, outcome.message);
        Ok(())
    }
}
