use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.yaml";
pub const CLEANUP_QUEUE_FILE: &str = ".cleanup-pending";

pub fn golden_root(home: &Path) -> PathBuf {
    home.join(".golden")
}

pub fn config_path(home: &Path) -> PathBuf {
    golden_root(home).join(CONFIG_FILE)
}

pub fn default_repos_root(home: &Path) -> PathBuf {
    golden_root(home).join("repos")
}

/// Superseded snapshots recorded by short-lived processes for the daemon to delete.
pub fn cleanup_queue_path(repos_root: &Path) -> PathBuf {
    repos_root.join(CLEANUP_QUEUE_FILE)
}
