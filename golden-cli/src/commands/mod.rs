pub mod alias;
pub mod daemon;
pub mod lock;
pub mod refresh;
pub mod repo;

use std::path::PathBuf;

use anyhow::{Context, Result};

use golden_refresh::{config, SchedulerConfig};
use golden_store::RepoLayout;

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Home, loaded config, and the layout of its repos root.
pub(crate) fn environment() -> Result<(PathBuf, SchedulerConfig, RepoLayout)> {
    let home = home()?;
    let config = config::load_at(&home).context("failed to load ~/.golden/config.yaml")?;
    let layout = RepoLayout::new(&config.repos_root);
    Ok((home, config, layout))
}
