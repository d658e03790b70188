//! Per-repository YAML registry.
//!
//! # Storage layout
//!
//! ```text
//! ~/.golden/
//!   registry/
//!     <alias>.yaml   (one file per repository: mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every operation has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.
//!
//! [`FileRegistry`] wraps the `_at` functions behind the [`Registry`] trait
//! consumed by the refresh scheduler.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::{io_err, RegistryError};
use crate::types::{RepoAlias, RepositoryRecord};

// ---------------------------------------------------------------------------
// 0. Collaborator contract
// ---------------------------------------------------------------------------

/// The persisted repository registry as seen by the refresh subsystem.
pub trait Registry: Send + Sync {
    /// All registered repositories, sorted by alias.
    fn list_repositories(&self) -> Result<Vec<RepositoryRecord>, RegistryError>;

    /// The record for `alias`, or [`RegistryError::RepositoryNotFound`].
    fn get_repository(&self, alias: &RepoAlias) -> Result<RepositoryRecord, RegistryError>;

    /// Set (or clear, with `None`) the next scheduled refresh.
    fn update_next_refresh(
        &self,
        alias: &RepoAlias,
        next_refresh: Option<DateTime<Utc>>,
    ) -> Result<(), RegistryError>;

    /// Replace the set of index kinds known to exist for `alias`.
    fn update_indexes(&self, alias: &RepoAlias, indexes: &[String]) -> Result<(), RegistryError>;

    /// Record a completed snapshot refresh.
    fn mark_refreshed(&self, alias: &RepoAlias, at: DateTime<Utc>) -> Result<(), RegistryError>;
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.golden/registry/`
///
/// Creates the directory (mode `0700`) if it does not yet exist.
pub fn registry_dir_at(home: &Path) -> Result<PathBuf, RegistryError> {
    let dir = home.join(".golden").join("registry");
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

/// `<home>/.golden/registry/<alias>.yaml`: pure, no I/O.
pub fn record_path_at(home: &Path, alias: &RepoAlias) -> PathBuf {
    home.join(".golden")
        .join("registry")
        .join(format!("{}.yaml", alias.0))
}

/// Reject aliases that cannot safely become a single file name.
pub fn validate_alias(alias: &RepoAlias) -> Result<(), RegistryError> {
    let reason = if alias.0.is_empty() {
        Some("alias is empty")
    } else if alias.0.contains(['/', '\\']) {
        Some("alias contains a path separator")
    } else if alias.0.starts_with('.') {
        Some("alias starts with '.'")
    } else if alias.0.chars().any(char::is_whitespace) {
        Some("alias contains whitespace")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(RegistryError::InvalidAlias {
            alias: alias.0.clone(),
            reason,
        }),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load one record from `<home>/.golden/registry/<alias>.yaml`.
///
/// Returns `RegistryError::RepositoryNotFound` if absent,
/// `RegistryError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path, alias: &RepoAlias) -> Result<RepositoryRecord, RegistryError> {
    let path = record_path_at(home, alias);
    if !path.exists() {
        return Err(RegistryError::RepositoryNotFound {
            alias: alias.0.clone(),
        });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| RegistryError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load(alias: &RepoAlias) -> Result<RepositoryRecord, RegistryError> {
    load_at(&home()?, alias)
}

/// Read every `*.yaml` under `<home>/.golden/registry/`, sorted by alias.
///
/// The first malformed record fails the whole listing. See [`scan_at`] for a
/// per-file view.
pub fn list_at(home: &Path) -> Result<Vec<RepositoryRecord>, RegistryError> {
    let mut records = scan_at(home)?.into_iter().collect::<Result<Vec<_>, _>>()?;
    records.sort_by(|a, b| a.alias.cmp(&b.alias));
    Ok(records)
}

/// Parse every `*.yaml` under `<home>/.golden/registry/` independently, in
/// file-name order. Only a failure to read the directory itself is an `Err`.
pub fn scan_at(home: &Path) -> Result<Vec<Result<RepositoryRecord, RegistryError>>, RegistryError> {
    let dir = home.join(".golden").join("registry");
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut entries: Vec<_> = std::fs::read_dir(&dir)
        .map_err(|e| io_err(&dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| e.file_name().to_string_lossy().ends_with(".yaml"))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    Ok(entries
        .into_iter()
        .map(|entry| -> Result<RepositoryRecord, RegistryError> {
            let path = entry.path();
            let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            serde_yaml::from_str(&contents).map_err(|e| RegistryError::Parse { path, source: e })
        })
        .collect())
}

/// `list_at` convenience wrapper.
pub fn list() -> Result<Vec<RepositoryRecord>, RegistryError> {
    list_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save a record to `<home>/.golden/registry/<alias>.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, record: &RepositoryRecord) -> Result<(), RegistryError> {
    validate_alias(&record.alias)?;
    registry_dir_at(home)?;
    let path = record_path_at(home, &record.alias);
    let tmp_path = path.with_file_name(format!("{}.yaml.tmp", record.alias.0));

    let yaml = serde_yaml::to_string(record)?;
    std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    if let Err(e) = std::fs::rename(&tmp_path, &path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(io_err(&path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 4. Register / remove
// ---------------------------------------------------------------------------

/// Register a new repository record.
///
/// Fails with [`RegistryError::AlreadyRegistered`] if the alias is taken.
pub fn register_at(home: &Path, record: &RepositoryRecord) -> Result<(), RegistryError> {
    validate_alias(&record.alias)?;
    if record_path_at(home, &record.alias).exists() {
        return Err(RegistryError::AlreadyRegistered {
            alias: record.alias.0.clone(),
        });
    }
    save_at(home, record)
}

/// `register_at` convenience wrapper.
pub fn register(record: &RepositoryRecord) -> Result<(), RegistryError> {
    register_at(&home()?, record)
}

/// Delete the record for `alias` (the external "unregister" operation).
pub fn remove_at(home: &Path, alias: &RepoAlias) -> Result<(), RegistryError> {
    let path = record_path_at(home, alias);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(RegistryError::RepositoryNotFound {
                alias: alias.0.clone(),
            })
        }
        Err(e) => Err(io_err(&path, e)),
    }
}

// ---------------------------------------------------------------------------
// 5. Trait-backed registry
// ---------------------------------------------------------------------------

/// [`Registry`] over the YAML files under `<home>/.golden/registry/`.
///
/// Read-modify-write updates are serialized in-process so that a job
/// recording `last_refreshed` and the loop rescheduling the same alias do not
/// overwrite each other.
#[derive(Debug)]
pub struct FileRegistry {
    home: PathBuf,
    write_guard: Mutex<()>,
}

impl FileRegistry {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            write_guard: Mutex::new(()),
        }
    }

    /// Registry rooted at `dirs::home_dir()`.
    pub fn from_home_dir() -> Result<Self, RegistryError> {
        Ok(Self::new(home()?))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    fn modify(
        &self,
        alias: &RepoAlias,
        apply: impl FnOnce(&mut RepositoryRecord),
    ) -> Result<(), RegistryError> {
        let _guard = self
            .write_guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut record = load_at(&self.home, alias)?;
        apply(&mut record);
        save_at(&self.home, &record)
    }
}

impl Registry for FileRegistry {
    /// Unreadable records are logged and left out so one bad file cannot
    /// stall every other repository.
    fn list_repositories(&self) -> Result<Vec<RepositoryRecord>, RegistryError> {
        let mut records = Vec::new();
        for scanned in scan_at(&self.home)? {
            match scanned {
                Ok(record) => records.push(record),
                Err(err) => tracing::warn!(error = %err, "skipping unreadable repository record"),
            }
        }
        records.sort_by(|a, b| a.alias.cmp(&b.alias));
        Ok(records)
    }

    fn get_repository(&self, alias: &RepoAlias) -> Result<RepositoryRecord, RegistryError> {
        load_at(&self.home, alias)
    }

    fn update_next_refresh(
        &self,
        alias: &RepoAlias,
        next_refresh: Option<DateTime<Utc>>,
    ) -> Result<(), RegistryError> {
        self.modify(alias, |record| record.next_refresh = next_refresh)
    }

    fn update_indexes(&self, alias: &RepoAlias, indexes: &[String]) -> Result<(), RegistryError> {
        self.modify(alias, |record| record.indexes = indexes.to_vec())
    }

    fn mark_refreshed(&self, alias: &RepoAlias, at: DateTime<Utc>) -> Result<(), RegistryError> {
        self.modify(alias, |record| record.last_refreshed = Some(at))
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, RegistryError> {
    dirs::home_dir().ok_or(RegistryError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
