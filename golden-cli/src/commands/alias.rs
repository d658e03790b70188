//! `golden alias show <alias>`

use anyhow::{Context, Result};
use clap::Subcommand;

use golden_core::RepoAlias;
use golden_store::AliasManager;

use super::environment;

#[derive(Subcommand, Debug)]
pub enum AliasCommand {
    /// Print the alias pointer (target directory, repository, last swap).
    Show {
        alias: String,
        /// Print only the target path.
        #[arg(long)]
        path: bool,
    },
}

pub fn run(cmd: AliasCommand) -> Result<()> {
    let (_home, _config, layout) = environment()?;
    let aliases = AliasManager::new(&layout);

    match cmd {
        AliasCommand::Show { alias, path } => {
            let alias = RepoAlias::from(alias);
            let pointer = aliases
                .read_pointer(&alias)
                .with_context(|| format!("failed to resolve alias '{alias}'"))?;
            if path {
                println!("{}", pointer.target_path.display());
            } else {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&pointer).context("failed to serialize alias")?
                );
            }
        }
    }
    Ok(())
}
