//! Index detection and building for snapshots.
//!
//! Index kinds are the subdirectory names of `<repo>/<index_dir>`. Building
//! is delegated to an external command run inside the new snapshot.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::error::{io_err, RefreshError};
use crate::process::run_with_timeout;

/// Environment variable carrying the comma-separated index kinds to build.
pub const INDEX_KINDS_ENV: &str = "GOLDEN_INDEX_KINDS";

pub trait IndexBuilder: Send + Sync {
    /// Index kinds present under `path`, sorted.
    fn detect_existing_indexes(&self, path: &Path) -> Result<Vec<String>, RefreshError>;
    /// Build `indexes` inside `snapshot`.
    fn build_indexes(&self, snapshot: &Path, indexes: &[String]) -> Result<(), RefreshError>;
}

#[derive(Debug, Clone)]
pub struct CommandIndexBuilder {
    index_dir: String,
    command: Option<Vec<String>>,
    timeout: Duration,
}

impl CommandIndexBuilder {
    pub fn new(index_dir: impl Into<String>, command: Option<Vec<String>>, timeout: Duration) -> Self {
        Self {
            index_dir: index_dir.into(),
            command,
            timeout,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(
            config.index_dir.clone(),
            config.index_command.clone(),
            config.index_timeout(),
        )
    }

    pub fn index_root(&self, repo: &Path) -> PathBuf {
        repo.join(&self.index_dir)
    }
}

impl IndexBuilder for CommandIndexBuilder {
    fn detect_existing_indexes(&self, path: &Path) -> Result<Vec<String>, RefreshError> {
        let root = self.index_root(path);
        let entries = match std::fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(io_err(&root, err)),
        };
        let mut kinds = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&root, e))?;
            if entry.file_type().map_err(|e| io_err(entry.path(), e))?.is_dir() {
                kinds.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        kinds.sort();
        Ok(kinds)
    }

    fn build_indexes(&self, snapshot: &Path, indexes: &[String]) -> Result<(), RefreshError> {
        let Some((program, args)) = self.command.as_deref().and_then(<[String]>::split_first) else {
            tracing::debug!(snapshot = %snapshot.display(), "no index command configured; skipping build");
            return Ok(());
        };

        let mut command = Command::new(program);
        command.args(args).env(INDEX_KINDS_ENV, indexes.join(","));
        let output = run_with_timeout(command, snapshot, self.timeout, "index build")?;
        if !output.status.success() {
            return Err(RefreshError::Index {
                path: snapshot.to_path_buf(),
                message: output.failure_message(),
            });
        }
        tracing::info!(snapshot = %snapshot.display(), indexes = ?indexes, "indexes built");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn builder(command: Option<&[&str]>) -> CommandIndexBuilder {
        CommandIndexBuilder::new(
            ".golden-index",
            command.map(|c| c.iter().map(|s| s.to_string()).collect()),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn detects_index_kinds_sorted() {
        let repo = TempDir::new().unwrap();
        for kind in ["semantic", "fts"] {
            std::fs::create_dir_all(repo.path().join(".golden-index").join(kind)).unwrap();
        }
        std::fs::write(repo.path().join(".golden-index/notes.txt"), "").unwrap();

        let found = builder(None).detect_existing_indexes(repo.path()).unwrap();
        assert_eq!(found, vec!["fts".to_string(), "semantic".to_string()]);
    }

    #[test]
    fn no_index_dir_means_no_indexes() {
        let repo = TempDir::new().unwrap();
        assert!(builder(None).detect_existing_indexes(repo.path()).unwrap().is_empty());
    }

    #[test]
    fn build_without_command_is_a_noop() {
        let snap = TempDir::new().unwrap();
        builder(None)
            .build_indexes(snap.path(), &["fts".to_string()])
            .unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn command_runs_in_snapshot_with_kinds() {
        let snap = TempDir::new().unwrap();
        let b = builder(Some(&["sh", "-c", "echo \"$GOLDEN_INDEX_KINDS\" > built.txt"]));
        b.build_indexes(snap.path(), &["fts".to_string(), "semantic".to_string()])
            .unwrap();
        let built = std::fs::read_to_string(snap.path().join("built.txt")).unwrap();
        assert_eq!(built.trim(), "fts,semantic");
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_is_an_index_error() {
        let snap = TempDir::new().unwrap();
        let b = builder(Some(&["sh", "-c", "echo 'embedding service down' >&2; exit 1"]));
        let err = b.build_indexes(snap.path(), &[]).unwrap_err();
        assert!(matches!(err, RefreshError::Index { .. }));
        assert!(err.to_string().contains("embedding service down"));
    }
}
