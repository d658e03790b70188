//! Pulling upstream changes into a master checkout.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::error::RefreshError;
use crate::process::{run_with_timeout, CommandOutput};

/// An open handle on one checkout.
pub trait RemotePull: Send {
    /// Fetch and report whether upstream is ahead of the checkout.
    fn has_changes(&mut self) -> Result<bool, RefreshError>;
    /// Bring the checkout up to date with upstream.
    fn update(&mut self) -> Result<(), RefreshError>;
    /// Revision the checkout is at. `None` when the source has no revisions.
    fn revision(&mut self) -> Result<Option<String>, RefreshError> {
        Ok(None)
    }
    fn source_path(&self) -> &Path;
}

pub trait RemotePullFactory: Send + Sync {
    fn open(&self, path: &Path) -> Box<dyn RemotePull>;
}

#[derive(Debug, Clone)]
pub struct GitPullFactory {
    program: PathBuf,
    timeout: Duration,
}

impl GitPullFactory {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("git"),
            timeout,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }
}

impl RemotePullFactory for GitPullFactory {
    fn open(&self, path: &Path) -> Box<dyn RemotePull> {
        Box::new(GitPuller {
            program: self.program.clone(),
            path: path.to_path_buf(),
            timeout: self.timeout,
        })
    }
}

#[derive(Debug)]
pub struct GitPuller {
    program: PathBuf,
    path: PathBuf,
    timeout: Duration,
}

impl GitPuller {
    fn git(&self, args: &[&str]) -> Result<CommandOutput, RefreshError> {
        let mut command = Command::new(&self.program);
        command.args(args).env("GIT_TERMINAL_PROMPT", "0");
        let label = format!("git {}", args.first().copied().unwrap_or_default());
        let output = run_with_timeout(command, &self.path, self.timeout, &label)?;
        if !output.status.success() {
            return Err(RefreshError::Pull {
                path: self.path.clone(),
                message: format!("{label}: {}", output.failure_message()),
            });
        }
        Ok(output)
    }

    fn rev(&self, rev: &str) -> Result<String, RefreshError> {
        Ok(self.git(&["rev-parse", rev])?.stdout.trim().to_string())
    }
}

impl RemotePull for GitPuller {
    fn has_changes(&mut self) -> Result<bool, RefreshError> {
        self.git(&["fetch", "--quiet"])?;
        let local = self.rev("HEAD")?;
        let upstream = self.rev("@{upstream}")?;
        if local == upstream {
            return Ok(false);
        }
        // Upstream counts as changed only if it has commits HEAD lacks.
        let ahead = self.git(&["rev-list", "--count", "HEAD..@{upstream}"])?;
        let ahead: u64 = ahead.stdout.trim().parse().unwrap_or(1);
        tracing::debug!(path = %self.path.display(), local, upstream, ahead, "upstream compared");
        Ok(ahead > 0)
    }

    fn update(&mut self) -> Result<(), RefreshError> {
        self.git(&["pull", "--ff-only", "--quiet"])?;
        tracing::info!(path = %self.path.display(), "master updated from upstream");
        Ok(())
    }

    fn revision(&mut self) -> Result<Option<String>, RefreshError> {
        self.rev("HEAD").map(Some)
    }

    fn source_path(&self) -> &Path {
        &self.path
    }
}
