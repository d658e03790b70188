//! Daemon configuration, read from `~/.golden/config.yaml`.
//!
//! Every key is optional. A missing file yields the defaults; an empty
//! `repos_root` resolves to `~/.golden/repos`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, RefreshError};
use crate::jitter::JITTER_PERCENTAGE;
use crate::paths::{config_path, default_repos_root};

pub const MAX_JITTER_PERCENTAGE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    pub repos_root: PathBuf,
    pub refresh_interval_secs: u64,
    pub tick_interval_secs: u64,
    pub jitter_percentage: f64,
    pub max_concurrent_jobs: usize,
    pub pull_timeout_secs: u64,
    pub index_timeout_secs: u64,
    pub cleanup_grace_secs: u64,
    /// Directory inside a repository that holds one subdirectory per index kind.
    pub index_dir: String,
    /// Program and arguments run inside a fresh snapshot to build its indexes.
    pub index_command: Option<Vec<String>>,
    /// `false` runs refreshes inline on the scheduler tick instead of as jobs.
    pub async_jobs: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            repos_root: PathBuf::new(),
            refresh_interval_secs: 3600,
            tick_interval_secs: 60,
            jitter_percentage: JITTER_PERCENTAGE,
            max_concurrent_jobs: 2,
            pull_timeout_secs: 600,
            index_timeout_secs: 3600,
            cleanup_grace_secs: 300,
            index_dir: ".golden-index".to_string(),
            index_command: None,
            async_jobs: true,
        }
    }
}

impl SchedulerConfig {
    /// Defaults rooted at `repos_root`.
    pub fn for_root(repos_root: impl Into<PathBuf>) -> Self {
        Self {
            repos_root: repos_root.into(),
            ..Self::default()
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }

    pub fn index_timeout(&self) -> Duration {
        Duration::from_secs(self.index_timeout_secs)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_secs(self.cleanup_grace_secs)
    }

    pub fn validate(&self) -> Result<(), RefreshError> {
        let zero = [
            ("refresh_interval_secs", self.refresh_interval_secs),
            ("tick_interval_secs", self.tick_interval_secs),
            ("pull_timeout_secs", self.pull_timeout_secs),
            ("index_timeout_secs", self.index_timeout_secs),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0);
        if let Some((key, _)) = zero {
            return Err(RefreshError::InvalidConfig(format!("{key} must be greater than zero")));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(RefreshError::InvalidConfig(
                "max_concurrent_jobs must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=MAX_JITTER_PERCENTAGE).contains(&self.jitter_percentage) {
            return Err(RefreshError::InvalidConfig(format!(
                "jitter_percentage must be between 0 and {MAX_JITTER_PERCENTAGE}, got {}",
                self.jitter_percentage
            )));
        }
        if matches!(&self.index_command, Some(cmd) if cmd.is_empty()) {
            return Err(RefreshError::InvalidConfig(
                "index_command must name a program".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load and validate the config under `home`.
pub fn load_at(home: &Path) -> Result<SchedulerConfig, RefreshError> {
    let path = config_path(home);
    let mut config = match std::fs::read_to_string(&path) {
        Ok(contents) if contents.trim().is_empty() => SchedulerConfig::default(),
        Ok(contents) => serde_yaml::from_str(&contents)
            .map_err(|source| RefreshError::ConfigParse { path: path.clone(), source })?,
        Err(err) if err.kind() == ErrorKind::NotFound => SchedulerConfig::default(),
        Err(err) => return Err(io_err(&path, err)),
    };
    if config.repos_root.as_os_str().is_empty() {
        config.repos_root = default_repos_root(home);
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn write_config(home: &Path, yaml: &str) {
        let path = config_path(home);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, yaml).unwrap();
    }

    #[test]
    fn missing_file_gives_defaults_under_home() {
        let home = TempDir::new().unwrap();
        let config = load_at(home.path()).unwrap();
        assert_eq!(config.repos_root, home.path().join(".golden/repos"));
        assert_eq!(config.refresh_interval(), Duration::from_secs(3600));
        assert_eq!(config.jitter_percentage, 0.1);
        assert!(config.async_jobs);
        assert!(config.index_command.is_none());
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let home = TempDir::new().unwrap();
        write_config(
            home.path(),
            "refresh_interval_secs: 120\nindex_command: [\"indexer\", \"--all\"]\nasync_jobs: false\n",
        );
        let config = load_at(home.path()).unwrap();
        assert_eq!(config.refresh_interval_secs, 120);
        assert_eq!(config.tick_interval_secs, 60);
        assert_eq!(
            config.index_command,
            Some(vec!["indexer".to_string(), "--all".to_string()])
        );
        assert!(!config.async_jobs);
    }

    #[test]
    fn unknown_key_is_a_parse_error_naming_the_file() {
        let home = TempDir::new().unwrap();
        write_config(home.path(), "refresh_every: 5\n");
        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, RefreshError::ConfigParse { .. }));
        assert!(err.to_string().contains("config.yaml"), "{err}");
    }

    #[rstest]
    #[case("refresh_interval_secs: 0\n", "refresh_interval_secs")]
    #[case("tick_interval_secs: 0\n", "tick_interval_secs")]
    #[case("max_concurrent_jobs: 0\n", "max_concurrent_jobs")]
    #[case("jitter_percentage: 0.9\n", "jitter_percentage")]
    #[case("jitter_percentage: -0.1\n", "jitter_percentage")]
    #[case("index_command: []\n", "index_command")]
    fn invalid_values_are_rejected(#[case] yaml: &str, #[case] key: &str) {
        let home = TempDir::new().unwrap();
        write_config(home.path(), yaml);
        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, RefreshError::InvalidConfig(_)));
        assert!(err.to_string().contains(key), "{err}");
    }
}
