//! Domain types for the golden repository registry.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! All types are serializable/deserializable via serde + serde_yaml.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pseudo-scheme marking a repository with no remote source.
pub const LOCAL_SCHEME: &str = "local://";

/// Suffix carried by the reader-facing alias of a repository.
pub const GLOBAL_SUFFIX: &str = "-global";

/// Branch assumed when a record does not name one.
pub const DEFAULT_BRANCH: &str = "main";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed repository alias: the stable external name of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoAlias(pub String);

impl RepoAlias {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The alias with any [`GLOBAL_SUFFIX`] removed.
    ///
    /// `docs-global` and `docs` name the same repository, the same master
    /// directory and the same write lock.
    pub fn base_name(&self) -> &str {
        self.0.strip_suffix(GLOBAL_SUFFIX).unwrap_or(&self.0)
    }
}

impl fmt::Display for RepoAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RepoAlias {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RepoAlias {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Where a repository's content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Edited in place by another subsystem; never pulled.
    Local,
    /// Fetched from a git remote.
    Remote,
}

impl SourceKind {
    pub fn of(source_url: &str) -> Self {
        if source_url.trim_start().starts_with(LOCAL_SCHEME) {
            SourceKind::Local
        } else {
            SourceKind::Remote
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Local => write!(f, "local"),
            SourceKind::Remote => write!(f, "remote"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// A golden repository known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub alias: RepoAlias,
    /// Remote locator, or `local://<name>` for in-place edited repositories.
    pub source_url: String,
    /// Canonical, never-versioned content directory (`<repos_root>/<repo_name>`).
    pub master_path: PathBuf,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// When absent the repository is never picked up by the scheduling loop.
    #[serde(
        default,
        with = "lenient_unix_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub next_refresh: Option<DateTime<Utc>>,
    /// Per-repository override of the global refresh interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval_secs: Option<u64>,
    /// Index kinds last seen on disk for this repository.
    #[serde(default)]
    pub indexes: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refreshed: Option<DateTime<Utc>>,
}

impl RepositoryRecord {
    /// A fresh, unscheduled record whose master lives at `<repos_root>/<base name>`.
    pub fn new(alias: RepoAlias, source_url: impl Into<String>, repos_root: &std::path::Path) -> Self {
        let master_path = repos_root.join(alias.base_name());
        Self {
            alias,
            source_url: source_url.into(),
            master_path,
            default_branch: default_branch(),
            next_refresh: None,
            refresh_interval_secs: None,
            indexes: vec![],
            created_at: Utc::now(),
            last_refreshed: None,
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        SourceKind::of(&self.source_url)
    }

    pub fn is_remote(&self) -> bool {
        self.source_kind() == SourceKind::Remote
    }

    /// Directory name of the master copy under the repos root.
    pub fn repo_name(&self) -> &str {
        self.alias.base_name()
    }

    /// `true` once `now` has reached `next_refresh`. Unscheduled records are never due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.next_refresh, Some(next) if now >= next)
    }
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

/// `next_refresh` is stored as unix seconds. Anything that is not a number
/// (hand-edited YAML, legacy strings) reads back as "unscheduled".
mod lenient_unix_seconds {
    use chrono::{DateTime, Utc};
    use serde::{de::IgnoredAny, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(i64),
        Fractional(f64),
        Other(IgnoredAny),
    }

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_some(&ts.timestamp()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Raw>::deserialize(deserializer)?;
        Ok(match raw {
            Some(Raw::Seconds(secs)) => DateTime::from_timestamp(secs, 0),
            Some(Raw::Fractional(secs)) if secs.is_finite() => {
                DateTime::from_timestamp_millis((secs * 1000.0) as i64)
            }
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
