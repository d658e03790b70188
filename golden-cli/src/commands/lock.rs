//! `golden lock acquire|release|status`: manual control of the write lock
//! that content writers hold while editing a local repository.

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;

use golden_core::RepoAlias;
use golden_store::WriteLockManager;

use super::environment;

#[derive(Subcommand, Debug)]
pub enum LockCommand {
    /// Take the lock. Fails if someone else holds it.
    Acquire(OwnerArgs),
    /// Release a lock held by `--owner`, or any lock with `--force`.
    Release(ReleaseArgs),
    /// Show who holds the lock.
    Status { alias: String },
}

#[derive(Args, Debug)]
pub struct OwnerArgs {
    pub alias: String,

    /// Name recorded as the lock holder.
    #[arg(long, default_value = "operator")]
    pub owner: String,
}

#[derive(Args, Debug)]
pub struct ReleaseArgs {
    #[command(flatten)]
    pub target: OwnerArgs,

    /// Remove the lock whoever holds it (recovery after a crashed writer).
    #[arg(long)]
    pub force: bool,
}

pub fn run(cmd: LockCommand) -> Result<()> {
    let (_home, _config, layout) = environment()?;
    let locks = WriteLockManager::new(&layout);

    match cmd {
        LockCommand::Acquire(args) => {
            let alias = RepoAlias::from(args.alias);
            if !locks
                .acquire(&alias, &args.owner)
                .with_context(|| format!("failed to acquire lock for '{alias}'"))?
            {
                let holder = locks
                    .lock_info(&alias)?
                    .map(|info| info.owner)
                    .unwrap_or_else(|| "unknown".to_string());
                bail!("write lock for '{alias}' is already held by '{holder}'");
            }
            println!("{} {alias} (owner: {})", "locked".green(), args.owner);
        }
        LockCommand::Release(args) => {
            let alias = RepoAlias::from(args.target.alias);
            let released = if args.force {
                locks.force_release(&alias)
            } else {
                locks.release(&alias, &args.target.owner)
            }
            .with_context(|| format!("failed to release lock for '{alias}'"))?;
            if released {
                println!("{} {alias}", "released".green());
            } else {
                println!("{alias} was not locked");
            }
        }
        LockCommand::Status { alias } => {
            let alias = RepoAlias::from(alias);
            match locks.lock_info(&alias)? {
                Some(info) => {
                    let since = info
                        .acquired_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "unknown".to_string());
                    println!(
                        "{} {alias}: held by {} since {since}",
                        "locked".yellow(),
                        info.owner
                    );
                }
                None => println!("{alias}: unlocked"),
            }
        }
    }
    Ok(())
}
