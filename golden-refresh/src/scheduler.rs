//! Refresh scheduling loop and the execute-refresh pipeline.
//!
//! Each tick the loop walks the registry and submits one refresh per due
//! remote repository, then pushes that repository's `next_refresh` forward by
//! its interval plus jitter. A refresh either skips (write in progress), does
//! nothing (no changes), or builds a new versioned snapshot from master,
//! indexes it, and swaps the alias onto it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use golden_core::{Registry, RepoAlias, RepositoryRecord, SourceKind};
use golden_store::{snapshot, AliasManager, ChangeDetector, RepoLayout, StoreError, WriteLockManager};

use crate::cleanup::CleanupScheduler;
use crate::config::SchedulerConfig;
use crate::error::RefreshError;
use crate::git::RemotePullFactory;
use crate::index::IndexBuilder;
use crate::jitter;
use crate::jobs::{JobId, JobTracker, JobWork};

pub const REFRESH_OPERATION: &str = "refresh_golden_repo";
pub const SYSTEM_SUBMITTER: &str = "system";

/// Everything the scheduler talks to outside its own repos root.
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn Registry>,
    /// `None` runs refreshes synchronously.
    pub jobs: Option<Arc<dyn JobTracker>>,
    pub puller: Arc<dyn RemotePullFactory>,
    pub indexer: Arc<dyn IndexBuilder>,
    pub cleanup: Arc<dyn CleanupScheduler>,
    pub change_detector: Arc<dyn ChangeDetector>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RefreshAction {
    SkippedWriteInProgress { holder: String },
    NoChanges,
    Refreshed {
        snapshot: PathBuf,
        previous: Option<PathBuf>,
    },
}

/// Result of a refresh that did not fail. Failures are `Err(RefreshError)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub alias: String,
    pub success: bool,
    pub message: String,
    pub action: RefreshAction,
}

impl RefreshOutcome {
    fn new(alias: &RepoAlias, action: RefreshAction) -> Self {
        let message = match &action {
            RefreshAction::SkippedWriteInProgress { holder } => {
                format!("refresh skipped: write lock held by {holder}")
            }
            RefreshAction::NoChanges => "no changes detected".to_string(),
            RefreshAction::Refreshed { snapshot, .. } => {
                format!("refreshed {alias} into {}", snapshot.display())
            }
        };
        Self {
            alias: alias.to_string(),
            success: true,
            message,
            action,
        }
    }
}

/// What one pass of the loop did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub submitted: Vec<RepoAlias>,
    pub jobs: Vec<JobId>,
    pub failed: Vec<RepoAlias>,
    pub skipped_local: usize,
    pub skipped_unscheduled: usize,
    pub not_due: usize,
}

#[derive(Clone)]
pub struct RefreshScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    layout: RepoLayout,
    aliases: AliasManager,
    locks: WriteLockManager,
    collab: Collaborators,
}

pub struct SchedulerHandle {
    shutdown_tx: broadcast::Sender<()>,
    join: JoinHandle<Result<(), RefreshError>>,
}

impl SchedulerHandle {
    /// Stop the loop and wait for it. Jobs already submitted keep running.
    pub async fn shutdown(self) -> Result<(), RefreshError> {
        let _ = self.shutdown_tx.send(());
        self.join
            .await
            .map_err(|err| RefreshError::Runtime(format!("scheduler join error: {err}")))?
    }
}

impl RefreshScheduler {
    pub fn new(config: SchedulerConfig, collab: Collaborators) -> Self {
        let layout = RepoLayout::new(&config.repos_root);
        Self {
            inner: Arc::new(Inner {
                aliases: AliasManager::new(&layout),
                locks: WriteLockManager::new(&layout),
                layout,
                config,
                collab,
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn layout(&self) -> &RepoLayout {
        &self.inner.layout
    }

    fn registry(&self) -> &dyn Registry {
        self.inner.collab.registry.as_ref()
    }

    // -- scheduling loop ----------------------------------------------------

    /// Spawn the loop on the current runtime.
    pub fn start(&self) -> SchedulerHandle {
        let (shutdown_tx, _) = broadcast::channel(4);
        let join = tokio::spawn(self.clone().run(shutdown_tx.subscribe()));
        SchedulerHandle { shutdown_tx, join }
    }

    /// Tick until `shutdown_rx` fires. A failed tick is logged, not fatal.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), RefreshError> {
        let mut ticker = tokio::time::interval(self.config().tick_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(
            repos_root = %self.layout().root().display(),
            tick_secs = self.config().tick_interval_secs,
            async_jobs = self.inner.collab.jobs.is_some(),
            "refresh scheduler started",
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    let scheduler = self.clone();
                    let tick = tokio::task::spawn_blocking(move || scheduler.process_tick(Utc::now()))
                        .await
                        .map_err(|err| RefreshError::Runtime(format!("scheduler tick join error: {err}")))?;
                    match tick {
                        Ok(report) if !report.submitted.is_empty() || !report.failed.is_empty() => {
                            tracing::info!(
                                submitted = report.submitted.len(),
                                failed = report.failed.len(),
                                not_due = report.not_due,
                                "scheduler tick",
                            );
                        }
                        Ok(_) => tracing::debug!("scheduler tick: nothing due"),
                        Err(err) => tracing::error!(error = %err, "scheduler tick failed"),
                    }
                }
            }
        }

        tracing::info!("refresh scheduler stopped");
        Ok(())
    }

    /// One pass over the registry as of `now`.
    pub fn process_tick(&self, now: DateTime<Utc>) -> Result<TickReport, RefreshError> {
        let mut report = TickReport::default();
        for record in self.registry().list_repositories()? {
            if !record.is_remote() {
                report.skipped_local += 1;
                continue;
            }
            let Some(due_at) = record.next_refresh else {
                report.skipped_unscheduled += 1;
                continue;
            };
            if now < due_at {
                report.not_due += 1;
                continue;
            }

            match self.submit_refresh(&record.alias, SYSTEM_SUBMITTER) {
                Ok(job) => {
                    report.submitted.push(record.alias.clone());
                    report.jobs.extend(job);
                }
                Err(err) => {
                    tracing::error!(alias = %record.alias, error = %err, "refresh submission failed");
                    report.failed.push(record.alias.clone());
                }
            }

            let next = self.next_refresh_for(&record, now);
            match self.registry().update_next_refresh(&record.alias, Some(next)) {
                Ok(()) => tracing::debug!(alias = %record.alias, next_refresh = %next, "rescheduled"),
                Err(err) => {
                    tracing::error!(alias = %record.alias, error = %err, "could not persist next refresh")
                }
            }
        }
        Ok(report)
    }

    /// `now + interval + jitter` using the record's interval override if set.
    pub fn next_refresh_for(&self, record: &RepositoryRecord, now: DateTime<Utc>) -> DateTime<Utc> {
        let interval = record
            .refresh_interval_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config().refresh_interval());
        jitter::next_refresh_at(
            now,
            interval,
            self.config().jitter_percentage,
            &mut rand::thread_rng(),
        )
    }

    /// Refresh `alias` on behalf of the system, through the job tracker when
    /// there is one. Returns the job id, or `None` after a synchronous run.
    pub fn trigger_refresh_for_repo(&self, alias: &RepoAlias) -> Result<Option<JobId>, RefreshError> {
        self.registry().get_repository(alias)?;
        self.submit_refresh(alias, SYSTEM_SUBMITTER)
    }

    fn submit_refresh(&self, alias: &RepoAlias, submitter: &str) -> Result<Option<JobId>, RefreshError> {
        let Some(jobs) = &self.inner.collab.jobs else {
            let outcome = self.execute_refresh(alias)?;
            tracing::info!(alias = %alias, message = %outcome.message, "refresh finished");
            return Ok(None);
        };

        let scheduler = self.clone();
        let target = alias.clone();
        let work: JobWork = Box::new(move || {
            let outcome = scheduler.execute_refresh(&target)?;
            Ok(serde_json::to_value(outcome)?)
        });
        let id = jobs.submit_job(REFRESH_OPERATION, work, submitter, true, alias.as_str())?;
        Ok(Some(id))
    }

    // -- execute-refresh pipeline -------------------------------------------

    pub fn execute_refresh(&self, alias: &RepoAlias) -> Result<RefreshOutcome, RefreshError> {
        let record = self.registry().get_repository(alias)?;
        let master = self.layout().master_path(record.repo_name());
        if record.master_path != master {
            tracing::debug!(
                alias = %alias,
                recorded = %record.master_path.display(),
                master = %master.display(),
                "registry master path differs from layout; using layout",
            );
        }

        let outcome = match record.source_kind() {
            SourceKind::Local => self.refresh_local(&record, &master)?,
            SourceKind::Remote => self.refresh_remote(&record, &master)?,
        };
        tracing::info!(alias = %alias, source = %record.source_kind(), message = %outcome.message, "refresh outcome");
        Ok(outcome)
    }

    fn refresh_local(&self, record: &RepositoryRecord, master: &Path) -> Result<RefreshOutcome, RefreshError> {
        if self.inner.locks.is_locked(&record.alias) {
            let holder = match self.inner.locks.lock_info(&record.alias) {
                Ok(Some(info)) => info.owner,
                _ => "unknown".to_string(),
            };
            return Ok(RefreshOutcome::new(
                &record.alias,
                RefreshAction::SkippedWriteInProgress { holder },
            ));
        }

        let current = self.current_target(&record.alias)?;
        if !self
            .inner
            .collab
            .change_detector
            .has_changes(master, current.as_deref())?
        {
            return Ok(RefreshOutcome::new(&record.alias, RefreshAction::NoChanges));
        }
        self.rebuild(record, master, None)
    }

    /// The write lock is not consulted: content only changes through the pull.
    ///
    /// With upstream unchanged this is a no-op only when the alias already
    /// serves a snapshot of master's current revision. A never-aliased
    /// repository, or one whose last rebuild failed after the pull, is
    /// rebuilt from master as it stands.
    fn refresh_remote(&self, record: &RepositoryRecord, master: &Path) -> Result<RefreshOutcome, RefreshError> {
        let mut puller = self.inner.collab.puller.open(master);
        let upstream_ahead = puller.has_changes()?;
        if upstream_ahead {
            puller.update()?;
        }
        let revision = puller.revision()?;
        if !upstream_ahead {
            if self.serves_revision(&record.alias, revision.as_deref())? {
                return Ok(RefreshOutcome::new(&record.alias, RefreshAction::NoChanges));
            }
            tracing::info!(
                alias = %record.alias,
                revision = ?revision,
                "alias does not serve master's revision; rebuilding",
            );
        }
        self.rebuild(record, master, revision.as_deref())
    }

    /// `true` when `alias` points at an existing snapshot built from `revision`.
    fn serves_revision(&self, alias: &RepoAlias, revision: Option<&str>) -> Result<bool, RefreshError> {
        match self.inner.aliases.read_pointer(alias) {
            Ok(pointer) => Ok(self.layout().is_versioned(&pointer.target_path)
                && pointer.target_path.is_dir()
                && pointer.source_revision.as_deref() == revision),
            Err(StoreError::AliasNotFound { .. } | StoreError::CorruptAlias { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn rebuild(
        &self,
        record: &RepositoryRecord,
        master: &Path,
        revision: Option<&str>,
    ) -> Result<RefreshOutcome, RefreshError> {
        let indexes = self.reconcile_indexes(record, master)?;
        let snapshot = self.create_new_index(record, master, &indexes)?;

        let previous = self
            .inner
            .aliases
            .swap_alias_with_revision(&record.alias, &snapshot, revision)?;
        self.registry().mark_refreshed(&record.alias, Utc::now())?;

        if let Some(old) = previous.as_deref() {
            if old != snapshot && self.layout().is_versioned(old) {
                self.inner.collab.cleanup.schedule_cleanup(old);
            }
        }
        Ok(RefreshOutcome::new(
            &record.alias,
            RefreshAction::Refreshed { snapshot, previous },
        ))
    }

    /// Bring the registry's index list in line with what exists under master.
    fn reconcile_indexes(&self, record: &RepositoryRecord, master: &Path) -> Result<Vec<String>, RefreshError> {
        let detected = self.inner.collab.indexer.detect_existing_indexes(master)?;
        let mut known = record.indexes.clone();
        known.sort();
        if detected != known {
            tracing::info!(alias = %record.alias, from = ?known, to = ?detected, "reconciling registered indexes");
            self.registry().update_indexes(&record.alias, &detected)?;
        }
        Ok(detected)
    }

    /// Snapshot `source` and build `indexes` in it. Always copies from master.
    fn create_new_index(
        &self,
        record: &RepositoryRecord,
        source: &Path,
        indexes: &[String],
    ) -> Result<PathBuf, RefreshError> {
        let snapshot = snapshot::create_snapshot(self.layout(), record.repo_name(), source)?;
        if let Err(err) = self.inner.collab.indexer.build_indexes(&snapshot, indexes) {
            // Never aliased, so no reader can be inside it.
            self.inner.collab.cleanup.schedule_cleanup(&snapshot);
            return Err(err);
        }
        Ok(snapshot)
    }

    fn current_target(&self, alias: &RepoAlias) -> Result<Option<PathBuf>, RefreshError> {
        match self.inner.aliases.read_alias(alias) {
            Ok(target) => Ok(Some(target)),
            Err(StoreError::AliasNotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
