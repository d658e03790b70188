//! On-disk layout under the repos root.
//!
//! ```text
//! <repos_root>/
//!   <repo_name>/                       master copy (never versioned)
//!   .aliases/<alias>.json              alias pointers
//!   .locks/<base_name>.lock            write locks
//!   .versioned/<repo_name>/v_<epoch>/  snapshots (`v_<epoch>-<n>` when
//!                                      several start in the same second)
//! ```

use std::path::{Path, PathBuf};

pub const ALIASES_DIR: &str = ".aliases";
pub const LOCKS_DIR: &str = ".locks";
pub const VERSIONED_DIR: &str = ".versioned";
pub const SNAPSHOT_PREFIX: &str = "v_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    root: PathBuf,
}

impl RepoLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn aliases_dir(&self) -> PathBuf {
        self.root.join(ALIASES_DIR)
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join(LOCKS_DIR)
    }

    pub fn versioned_root(&self) -> PathBuf {
        self.root.join(VERSIONED_DIR)
    }

    /// `<repos_root>/<repo_name>`
    pub fn master_path(&self, repo_name: &str) -> PathBuf {
        self.root.join(repo_name)
    }

    /// `<repos_root>/.versioned/<repo_name>`
    pub fn versioned_dir(&self, repo_name: &str) -> PathBuf {
        self.versioned_root().join(repo_name)
    }

    /// `true` for paths strictly inside `<repos_root>/.versioned`.
    pub fn is_versioned(&self, path: &Path) -> bool {
        let root = self.versioned_root();
        path != root && path.starts_with(&root)
    }
}

/// Epoch encoded in a snapshot directory name (`v_<epoch>` or `v_<epoch>-<n>`).
///
/// The epoch is the second the copy of master started, never later.
pub fn snapshot_epoch(path: &Path) -> Option<i64> {
    snapshot_version(path).map(|(epoch, _)| epoch)
}

/// `(epoch, sequence)` of a snapshot directory name; ordering matches creation order.
pub fn snapshot_version(path: &Path) -> Option<(i64, u32)> {
    let version = path.file_name()?.to_str()?.strip_prefix(SNAPSHOT_PREFIX)?;
    match version.split_once('-') {
        Some((epoch, seq)) => Some((epoch.parse().ok()?, seq.parse().ok()?)),
        None => Some((version.parse().ok()?, 0)),
    }
}
