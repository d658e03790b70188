//! Versioned snapshots: full copies of a master directory.
//!
//! A snapshot is built in `v_<epoch>.staging` and renamed to `v_<epoch>` once
//! every file is in place, so an existing `v_<epoch>` directory is always
//! complete and safe to point an alias at. The epoch is taken when the copy
//! starts; snapshots started in the same second get a `-<n>` suffix rather
//! than a later epoch, so the name never claims a start time in the future.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{io_err, StoreError};
use crate::layout::{snapshot_version, RepoLayout, SNAPSHOT_PREFIX};

/// Copy `source` into a new `<repos_root>/.versioned/<repo_name>/v_<epoch>`.
pub fn create_snapshot(
    layout: &RepoLayout,
    repo_name: &str,
    source: &Path,
) -> Result<PathBuf, StoreError> {
    if !source.is_dir() {
        return Err(StoreError::SnapshotSourceMissing {
            path: source.to_path_buf(),
        });
    }

    let parent = layout.versioned_dir(repo_name);
    std::fs::create_dir_all(&parent).map_err(|e| io_err(&parent, e))?;

    let epoch = Utc::now().timestamp();
    let (staging, target) = (0u32..)
        .map(|seq| {
            let name = match seq {
                0 => format!("{SNAPSHOT_PREFIX}{epoch}"),
                n => format!("{SNAPSHOT_PREFIX}{epoch}-{n}"),
            };
            (parent.join(format!("{name}.staging")), parent.join(name))
        })
        .find(|(staging, target)| !target.exists() && !staging.exists())
        .ok_or_else(|| {
            io_err(&parent, std::io::Error::new(ErrorKind::AlreadyExists, "no free snapshot name"))
        })?;

    if let Err(err) = copy_tree(source, &staging) {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(err);
    }
    if let Err(err) = std::fs::rename(&staging, &target) {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(io_err(&target, err));
    }

    tracing::info!(
        repo = repo_name,
        source = %source.display(),
        snapshot = %target.display(),
        "versioned snapshot created",
    );
    Ok(target)
}

/// Completed snapshots of `repo_name`, oldest first.
pub fn list_snapshots(layout: &RepoLayout, repo_name: &str) -> Result<Vec<PathBuf>, StoreError> {
    let dir = layout.versioned_dir(repo_name);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => return Err(io_err(&dir, err)),
    };

    let mut snapshots: Vec<((i64, u32), PathBuf)> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter_map(|p| snapshot_version(&p).map(|version| (version, p)))
        .collect();
    snapshots.sort_by_key(|(version, _)| *version);
    Ok(snapshots.into_iter().map(|(_, p)| p).collect())
}

/// Recursive copy of `source` into `dest` (which must not exist yet).
///
/// Symlinks are recreated as symlinks on unix; other special files are skipped.
pub fn copy_tree(source: &Path, dest: &Path) -> Result<(), StoreError> {
    let mut pending = vec![(source.to_path_buf(), dest.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        std::fs::create_dir(&to).map_err(|e| io_err(&to, e))?;
        let entries = std::fs::read_dir(&from).map_err(|e| io_err(&from, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&from, e))?;
            let src = entry.path();
            let dst = to.join(entry.file_name());
            let ty = entry.file_type().map_err(|e| io_err(&src, e))?;
            if ty.is_dir() {
                pending.push((src, dst));
            } else if ty.is_file() {
                std::fs::copy(&src, &dst).map_err(|e| io_err(&src, e))?;
            } else if ty.is_symlink() {
                copy_symlink(&src, &dst)?;
            } else {
                tracing::debug!(path = %src.display(), "skipping special file in snapshot copy");
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<(), StoreError> {
    let link = std::fs::read_link(src).map_err(|e| io_err(src, e))?;
    std::os::unix::fs::symlink(&link, dst).map_err(|e| io_err(dst, e))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, _dst: &Path) -> Result<(), StoreError> {
    tracing::debug!(path = %src.display(), "skipping symlink in snapshot copy");
    Ok(())
}
