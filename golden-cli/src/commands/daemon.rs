//! `golden daemon start`: scheduler loop in the foreground.

use anyhow::{Context, Result};
use clap::Subcommand;

use golden_refresh::start_blocking;

use super::home;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the refresh scheduler until ctrl-c.
    Start,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = home()?;
    match command {
        DaemonCommand::Start => start_blocking(&home).context("daemon exited with error")?,
    }
    Ok(())
}
