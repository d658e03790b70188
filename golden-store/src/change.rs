//! Modification-time change detection for locally edited repositories.
//!
//! The baseline is the snapshot the alias currently points at: the epoch in its
//! `v_<epoch>` name is the second the copy of master started. Master has changed if any
//! entry under it (directories included, so deletions count) carries an mtime
//! at or after that epoch.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{io_err, StoreError};
use crate::layout::snapshot_epoch;

/// Decides whether a master directory needs a new snapshot.
pub trait ChangeDetector: Send + Sync {
    /// `current_target` is what the alias resolves to now, if it resolves at all.
    fn has_changes(&self, master: &Path, current_target: Option<&Path>)
        -> Result<bool, StoreError>;
}

/// [`ChangeDetector`] comparing master mtimes against the snapshot epoch.
#[derive(Debug, Clone)]
pub struct MtimeChangeDetector {
    ignored: Vec<String>,
}

impl Default for MtimeChangeDetector {
    fn default() -> Self {
        Self {
            ignored: vec![".git".to_string()],
        }
    }
}

impl MtimeChangeDetector {
    /// Detector that does not descend into directories named in `ignored`.
    pub fn ignoring(ignored: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            ignored: ignored.into_iter().map(Into::into).collect(),
        }
    }

    /// Newest mtime of `root` and everything beneath it.
    pub fn newest_mtime(&self, root: &Path) -> Result<SystemTime, StoreError> {
        let mut newest = modified(root)?;
        let mut dirs: Vec<PathBuf> = vec![root.to_path_buf()];
        while let Some(dir) = dirs.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(io_err(&dir, err)),
            };
            for entry in entries {
                let entry = entry.map_err(|e| io_err(&dir, e))?;
                let path = entry.path();
                let ty = entry.file_type().map_err(|e| io_err(&path, e))?;
                if ty.is_dir() {
                    let name = entry.file_name();
                    if self.ignored.iter().any(|i| name.to_string_lossy() == i.as_str()) {
                        continue;
                    }
                    dirs.push(path.clone());
                }
                let mtime = match entry.metadata() {
                    Ok(meta) => meta.modified().map_err(|e| io_err(&path, e))?,
                    // Vanished between read_dir and stat: a concurrent edit.
                    Err(err) if err.kind() == ErrorKind::NotFound => SystemTime::now(),
                    Err(err) => return Err(io_err(&path, err)),
                };
                newest = newest.max(mtime);
            }
        }
        Ok(newest)
    }
}

impl ChangeDetector for MtimeChangeDetector {
    fn has_changes(
        &self,
        master: &Path,
        current_target: Option<&Path>,
    ) -> Result<bool, StoreError> {
        let Some(target) = current_target else {
            tracing::debug!(master = %master.display(), "no alias target yet; treating as changed");
            return Ok(true);
        };
        if target == master {
            tracing::debug!(master = %master.display(), "alias points at master; treating as changed");
            return Ok(true);
        }

        let baseline = match snapshot_epoch(target) {
            Some(epoch) => UNIX_EPOCH + Duration::from_secs(epoch.max(0) as u64),
            None => modified(target)?,
        };
        let newest = self.newest_mtime(master)?;
        let changed = unix_secs(newest) >= unix_secs(baseline);
        tracing::debug!(
            master = %master.display(),
            baseline = unix_secs(baseline),
            newest = unix_secs(newest),
            changed,
            "mtime change check",
        );
        Ok(changed)
    }
}

fn modified(path: &Path) -> Result<SystemTime, StoreError> {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|e| io_err(path, e))
}

fn unix_secs(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
