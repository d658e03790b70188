use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use golden_core::RegistryError;
use golden_store::StoreError;

/// Error surface of the refresh pipeline, scheduler and daemon runtime.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("job error: {0}")]
    Job(#[from] JobError),

    #[error("config error at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("git pull failed in {path}: {message}")]
    Pull { path: PathBuf, message: String },

    #[error("index build failed in {path}: {message}")]
    Index { path: PathBuf, message: String },

    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: String,
        after: Duration,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Job tracker failures. These concern submission, never the work itself.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("no tokio runtime available for background jobs")]
    NoRuntime,

    #[error("job tracker is shut down")]
    Closed,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RefreshError {
    RefreshError::Io {
        path: path.into(),
        source,
    }
}
