//! Alias pointers: the indirection readers resolve to find a repository's content.
//!
//! Persists one [`AliasPointer`] JSON document per alias at
//! `<repos_root>/.aliases/<alias>.json`. Swaps write a uniquely named `.tmp`
//! sibling and rename it over the pointer, so a concurrent reader sees either
//! the old target or the new one, never a partial file or a missing pointer.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use golden_core::{registry::validate_alias, RepoAlias};

use crate::error::{io_err, StoreError};
use crate::layout::RepoLayout;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// On-disk alias pointer payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AliasPointer {
    pub target_path: PathBuf,
    pub repo_name: String,
    pub updated_at: DateTime<Utc>,
    /// Upstream revision the target was built from, for remote repositories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_revision: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AliasManager {
    dir: PathBuf,
}

impl AliasManager {
    pub fn new(layout: &RepoLayout) -> Self {
        Self {
            dir: layout.aliases_dir(),
        }
    }

    /// `<repos_root>/.aliases/<alias>.json`: pure, no I/O.
    pub fn pointer_path(&self, alias: &RepoAlias) -> PathBuf {
        self.dir.join(format!("{}.json", alias.0))
    }

    /// Resolve the directory `alias` currently points at.
    pub fn read_alias(&self, alias: &RepoAlias) -> Result<PathBuf, StoreError> {
        Ok(self.read_pointer(alias)?.target_path)
    }

    pub fn read_pointer(&self, alias: &RepoAlias) -> Result<AliasPointer, StoreError> {
        let path = self.pointer_path(alias);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::AliasNotFound {
                    alias: alias.0.clone(),
                })
            }
            Err(err) => return Err(io_err(&path, err)),
        };
        serde_json::from_str(&contents).map_err(|source| StoreError::CorruptAlias { path, source })
    }

    /// Point `alias` at `new_target`, creating the pointer if needed.
    ///
    /// Returns the previous target. The caller decides what happens to it;
    /// nothing is deleted here.
    pub fn swap_alias(
        &self,
        alias: &RepoAlias,
        new_target: &Path,
    ) -> Result<Option<PathBuf>, StoreError> {
        self.swap_alias_with_revision(alias, new_target, None)
    }

    /// [`swap_alias`](Self::swap_alias), also recording the upstream revision
    /// `new_target` was built from.
    pub fn swap_alias_with_revision(
        &self,
        alias: &RepoAlias,
        new_target: &Path,
        source_revision: Option<&str>,
    ) -> Result<Option<PathBuf>, StoreError> {
        validate_alias(alias)?;
        if !new_target.is_dir() {
            return Err(StoreError::MissingTarget {
                path: new_target.to_path_buf(),
            });
        }

        let previous = match self.read_pointer(alias) {
            Ok(pointer) => Some(pointer.target_path),
            Err(StoreError::AliasNotFound { .. } | StoreError::CorruptAlias { .. }) => None,
            Err(err) => return Err(err),
        };

        std::fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;

        let pointer = AliasPointer {
            target_path: new_target.to_path_buf(),
            repo_name: alias.base_name().to_string(),
            updated_at: Utc::now(),
            source_revision: source_revision.map(str::to_string),
        };
        let json = serde_json::to_string_pretty(&pointer)?;

        let path = self.pointer_path(alias);
        let tmp = self.dir.join(format!(
            "{}.json.{}.{}.tmp",
            alias.0,
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&path, e));
        }

        tracing::info!(
            alias = %alias,
            target = %new_target.display(),
            revision = ?source_revision,
            previous = ?previous.as_ref().map(|p| p.display().to_string()),
            "alias swapped",
        );
        Ok(previous)
    }

    /// Drop the pointer for `alias`. Returns `false` if there was none.
    pub fn remove_alias(&self, alias: &RepoAlias) -> Result<bool, StoreError> {
        let path = self.pointer_path(alias);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_err(&path, err)),
        }
    }

    /// Every readable pointer, sorted by alias. Corrupt pointers are logged and skipped.
    pub fn list_aliases(&self) -> Result<Vec<(RepoAlias, AliasPointer)>, StoreError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(io_err(&self.dir, err)),
        };

        let mut aliases = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(alias) = name.strip_suffix(".json") else {
                continue;
            };
            let alias = RepoAlias::from(alias);
            match self.read_pointer(&alias) {
                Ok(pointer) => aliases.push((alias, pointer)),
                Err(err) => tracing::warn!(alias = %alias, error = %err, "skipping unreadable alias"),
            }
        }
        aliases.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(aliases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, RepoLayout, AliasManager) {
        let tmp = TempDir::new().unwrap();
        let layout = RepoLayout::new(tmp.path());
        let manager = AliasManager::new(&layout);
        (tmp, layout, manager)
    }

    #[test]
    fn read_unknown_alias_is_not_found() {
        let (_tmp, _layout, manager) = setup();
        let err = manager.read_alias(&RepoAlias::from("docs")).unwrap_err();
        assert!(matches!(err, StoreError::AliasNotFound { .. }));
    }

    #[test]
    fn swap_creates_then_replaces_pointer() {
        let (_tmp, layout, manager) = setup();
        let alias = RepoAlias::from("docs-global");
        let master = layout.master_path("docs");
        let snap = layout.versioned_dir("docs").join("v_1");
        std::fs::create_dir_all(&master).unwrap();
        std::fs::create_dir_all(&snap).unwrap();

        assert_eq!(manager.swap_alias(&alias, &master).unwrap(), None);
        assert_eq!(manager.read_alias(&alias).unwrap(), master);

        let previous = manager.swap_alias(&alias, &snap).unwrap();
        assert_eq!(previous, Some(master));
        assert_eq!(manager.read_alias(&alias).unwrap(), snap);
        assert_eq!(manager.read_pointer(&alias).unwrap().repo_name, "docs");
    }

    #[test]
    fn swap_records_source_revision_only_when_given() {
        let (_tmp, layout, manager) = setup();
        let alias = RepoAlias::from("docs");
        let snap = layout.versioned_dir("docs").join("v_1");
        std::fs::create_dir_all(&snap).unwrap();

        manager.swap_alias_with_revision(&alias, &snap, Some("abc123")).unwrap();
        let pointer = manager.read_pointer(&alias).unwrap();
        assert_eq!(pointer.source_revision.as_deref(), Some("abc123"));

        manager.swap_alias(&alias, &snap).unwrap();
        let raw = std::fs::read_to_string(manager.pointer_path(&alias)).unwrap();
        assert!(!raw.contains("source_revision"), "{raw}");
        assert_eq!(manager.read_pointer(&alias).unwrap().source_revision, None);
    }

    #[test]
    fn swap_refuses_missing_target_and_keeps_old_pointer() {
        let (_tmp, layout, manager) = setup();
        let alias = RepoAlias::from("docs");
        let master = layout.master_path("docs");
        std::fs::create_dir_all(&master).unwrap();
        manager.swap_alias(&alias, &master).unwrap();

        let err = manager
            .swap_alias(&alias, &layout.versioned_dir("docs").join("v_404"))
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingTarget { .. }));
        assert_eq!(manager.read_alias(&alias).unwrap(), master);
    }

    #[test]
    fn swap_leaves_no_tmp_files() {
        let (_tmp, layout, manager) = setup();
        let master = layout.master_path("docs");
        std::fs::create_dir_all(&master).unwrap();
        manager.swap_alias(&RepoAlias::from("docs"), &master).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(layout.aliases_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "tmp files left behind: {leftovers:?}");
    }

    #[test]
    fn list_skips_corrupt_pointers() {
        let (_tmp, layout, manager) = setup();
        let master = layout.master_path("docs");
        std::fs::create_dir_all(&master).unwrap();
        manager.swap_alias(&RepoAlias::from("docs"), &master).unwrap();
        std::fs::write(layout.aliases_dir().join("broken.json"), "{not json").unwrap();

        let listed = manager.list_aliases().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, RepoAlias::from("docs"));
    }

    #[test]
    fn remove_alias_reports_presence() {
        let (_tmp, layout, manager) = setup();
        let alias = RepoAlias::from("docs");
        let master = layout.master_path("docs");
        std::fs::create_dir_all(&master).unwrap();
        manager.swap_alias(&alias, &master).unwrap();

        assert!(manager.remove_alias(&alias).unwrap());
        assert!(!manager.remove_alias(&alias).unwrap());
    }
}
