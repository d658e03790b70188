//! Golden: operator CLI for golden repository refresh.
//!
//! # Usage
//!
//! ```text
//! golden repo add <alias> <source-url> [--interval <secs>] [--schedule]
//! golden repo list [--json]
//! golden repo show <alias>
//! golden repo remove <alias>
//! golden refresh <alias> [--json]
//! golden lock acquire|release|status <alias> [--owner <name>] [--force]
//! golden alias show <alias>
//! golden daemon start
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    alias::AliasCommand, daemon::DaemonCommand, lock::LockCommand, refresh::RefreshArgs,
    repo::RepoCommand,
};

#[derive(Parser, Debug)]
#[command(
    name = "golden",
    version,
    about = "Keep golden reference repositories fresh behind stable aliases",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register, inspect and remove golden repositories.
    Repo {
        #[command(subcommand)]
        command: RepoCommand,
    },

    /// Refresh one repository now, in the foreground.
    Refresh(RefreshArgs),

    /// Inspect or manage the write lock of a locally edited repository.
    Lock {
        #[command(subcommand)]
        command: LockCommand,
    },

    /// Inspect alias pointers.
    Alias {
        #[command(subcommand)]
        command: AliasCommand,
    },

    /// Run the refresh scheduler.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Repo { command } => commands::repo::run(command),
        Commands::Refresh(args) => args.run(),
        Commands::Lock { command } => commands::lock::run(command),
        Commands::Alias { command } => commands::alias::run(command),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
