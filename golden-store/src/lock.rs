//! Cross-process write lock, one file per repository.
//!
//! `<repos_root>/.locks/<base_name>.lock` exists exactly while a writer holds
//! the lock. Acquisition is an exclusive create, so among any number of racing
//! callers (threads or processes) for the same repository exactly one wins.
//! The JSON body only says who holds it.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use golden_core::{registry::validate_alias, RepoAlias};

use crate::error::{io_err, StoreError};
use crate::layout::RepoLayout;

/// Diagnostic content of a lock file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquired_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct WriteLockManager {
    dir: PathBuf,
}

impl WriteLockManager {
    pub fn new(layout: &RepoLayout) -> Self {
        Self {
            dir: layout.locks_dir(),
        }
    }

    /// Lock file for `alias`. Aliases sharing a base name share a lock.
    pub fn lock_path(&self, alias: &RepoAlias) -> PathBuf {
        self.dir.join(format!("{}.lock", alias.base_name()))
    }

    /// Try to take the lock. Never waits: `Ok(false)` means someone else holds it.
    pub fn acquire(&self, alias: &RepoAlias, owner: &str) -> Result<bool, StoreError> {
        validate_alias(&RepoAlias::from(alias.base_name()))?;
        std::fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;

        let path = self.lock_path(alias);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                tracing::debug!(alias = %alias, owner, "write lock already held");
                return Ok(false);
            }
            Err(err) => return Err(io_err(&path, err)),
        };

        let info = LockInfo {
            owner: owner.to_string(),
            pid: Some(std::process::id()),
            acquired_at: Some(Utc::now()),
        };
        let written = serde_json::to_vec(&info)
            .map_err(StoreError::from)
            .and_then(|bytes| {
                file.write_all(&bytes)
                    .and_then(|()| file.sync_all())
                    .map_err(|e| io_err(&path, e))
            });
        if let Err(err) = written {
            // We created the file, so removing it cannot drop someone else's lock.
            let _ = std::fs::remove_file(&path);
            return Err(err);
        }

        tracing::info!(alias = %alias, owner, "write lock acquired");
        Ok(true)
    }

    /// Release a lock held by `owner`.
    ///
    /// `Ok(false)` if no lock was held; [`StoreError::LockNotOwned`] (lock left
    /// in place) if another owner holds it.
    pub fn release(&self, alias: &RepoAlias, owner: &str) -> Result<bool, StoreError> {
        let Some(info) = self.lock_info(alias)? else {
            tracing::warn!(alias = %alias, owner, "release of a write lock that is not held");
            return Ok(false);
        };
        if info.owner != owner {
            return Err(StoreError::LockNotOwned {
                alias: alias.base_name().to_string(),
                owner: owner.to_string(),
                holder: info.owner,
            });
        }
        let released = self.remove_lock_file(alias)?;
        if released {
            tracing::info!(alias = %alias, owner, "write lock released");
        }
        Ok(released)
    }

    /// Remove the lock regardless of owner (operator recovery after a crashed writer).
    pub fn force_release(&self, alias: &RepoAlias) -> Result<bool, StoreError> {
        let released = self.remove_lock_file(alias)?;
        if released {
            tracing::warn!(alias = %alias, "write lock force-released");
        }
        Ok(released)
    }

    /// Non-blocking check: does a lock file exist for `alias`?
    pub fn is_locked(&self, alias: &RepoAlias) -> bool {
        self.lock_path(alias).exists()
    }

    /// Who holds the lock, if anyone. Unreadable content reports owner `"unknown"`.
    pub fn lock_info(&self, alias: &RepoAlias) -> Result<Option<LockInfo>, StoreError> {
        let path = self.lock_path(alias);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_err(&path, err)),
        };
        Ok(Some(serde_json::from_slice(&bytes).unwrap_or_else(|_| LockInfo {
            owner: "unknown".to_string(),
            pid: None,
            acquired_at: None,
        })))
    }

    fn remove_lock_file(&self, alias: &RepoAlias) -> Result<bool, StoreError> {
        let path = self.lock_path(alias);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_err(&path, err)),
        }
    }
}
