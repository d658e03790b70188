//! Error types for golden-store.

use std::path::PathBuf;

use thiserror::Error;

use golden_core::RegistryError;

/// All errors that can arise from alias, lock, and snapshot operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (alias pointer / lock record).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Alias failed registry-level validation.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// `read_alias` on an alias that was never swapped in.
    #[error("alias '{alias}' not found")]
    AliasNotFound { alias: String },

    /// The pointer file exists but cannot be parsed.
    #[error("alias pointer at {path} is corrupt: {source}")]
    CorruptAlias {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Refused to point an alias at something that is not a directory.
    #[error("alias target {path} is not a directory")]
    MissingTarget { path: PathBuf },

    /// `release` by a caller that does not hold the lock.
    #[error("write lock for '{alias}' is held by '{holder}', not '{owner}'")]
    LockNotOwned {
        alias: String,
        owner: String,
        holder: String,
    },

    /// Snapshot source directory does not exist.
    #[error("snapshot source {path} does not exist")]
    SnapshotSourceMissing { path: PathBuf },
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
