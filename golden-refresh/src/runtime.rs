use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use golden_core::FileRegistry;
use golden_store::{MtimeChangeDetector, RepoLayout};

use crate::cleanup::{CleanupQueueFile, DeferredCleanup};
use crate::config::{self, SchedulerConfig};
use crate::error::{io_err, RefreshError};
use crate::git::GitPullFactory;
use crate::index::CommandIndexBuilder;
use crate::jobs::{BackgroundJobManager, JobTracker};
use crate::scheduler::{Collaborators, RefreshScheduler};

/// How long in-flight refresh jobs get to finish once the loop has stopped.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Start the refresh daemon and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), RefreshError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    let result = runtime.block_on(run(home.to_path_buf()));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

/// Run the scheduler loop and deferred cleanup until ctrl-c.
pub async fn run(home: PathBuf) -> Result<(), RefreshError> {
    let config = config::load_at(&home)?;
    let layout = RepoLayout::new(&config.repos_root);
    ensure_runtime_dirs(&layout)?;

    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let (cleanup, cleanup_handle) =
        DeferredCleanup::spawn(layout.clone(), config.cleanup_grace(), shutdown_tx.subscribe());

    let jobs = if config.async_jobs {
        Some(Arc::new(BackgroundJobManager::new(config.max_concurrent_jobs)?))
    } else {
        None
    };
    let collaborators = Collaborators {
        registry: Arc::new(FileRegistry::new(&home)),
        jobs: jobs.clone().map(|j| j as Arc<dyn JobTracker>),
        puller: Arc::new(GitPullFactory::new(config.pull_timeout())),
        indexer: Arc::new(CommandIndexBuilder::from_config(&config)),
        cleanup: Arc::new(cleanup),
        change_detector: Arc::new(MtimeChangeDetector::default()),
    };
    let scheduler = RefreshScheduler::new(config, collaborators);

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = scheduler.run(rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down refresh daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(RefreshError::Runtime(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (scheduler_result, cleanup_result, signal_result) =
        tokio::join!(scheduler_handle, cleanup_handle, signal_handle);
    if let Some(jobs) = jobs {
        jobs.close();
    }

    handle_join("scheduler", scheduler_result)?;
    handle_join("cleanup", cleanup_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Scheduler for one-shot use outside the daemon: refreshes run inline and
/// superseded snapshots are queued on disk for the daemon to delete.
pub fn standalone_scheduler(home: &Path) -> Result<RefreshScheduler, RefreshError> {
    let config = config::load_at(home)?;
    Ok(standalone_with_config(home, config))
}

fn standalone_with_config(home: &Path, config: SchedulerConfig) -> RefreshScheduler {
    let layout = RepoLayout::new(&config.repos_root);
    let collaborators = Collaborators {
        registry: Arc::new(FileRegistry::new(home)),
        jobs: None,
        puller: Arc::new(GitPullFactory::new(config.pull_timeout())),
        indexer: Arc::new(CommandIndexBuilder::from_config(&config)),
        cleanup: Arc::new(CleanupQueueFile::new(layout)),
        change_detector: Arc::new(MtimeChangeDetector::default()),
    };
    RefreshScheduler::new(config, collaborators)
}

fn ensure_runtime_dirs(layout: &RepoLayout) -> Result<(), RefreshError> {
    for dir in [layout.root().to_path_buf(), layout.aliases_dir(), layout.locks_dir(), layout.versioned_root()] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), RefreshError>, tokio::task::JoinError>,
) -> Result<(), RefreshError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(RefreshError::Runtime(format!("{task} task join failure: {err}"))),
    }
}

/// Install the fmt subscriber once; `RUST_LOG` overrides the `info` default.
/// Logs go to stderr so command output on stdout stays parseable.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use golden_core::registry::register_at;
    use golden_core::{RepoAlias, RepositoryRecord};
    use golden_store::AliasManager;
    use tempfile::TempDir;

    #[test]
    fn runtime_dirs_are_created() {
        let tmp = TempDir::new().unwrap();
        let layout = RepoLayout::new(tmp.path().join("repos"));
        ensure_runtime_dirs(&layout).unwrap();
        assert!(layout.aliases_dir().is_dir());
        assert!(layout.locks_dir().is_dir());
        assert!(layout.versioned_root().is_dir());
    }

    #[test]
    fn standalone_refresh_queues_superseded_snapshot() {
        let home = TempDir::new().unwrap();
        let scheduler = standalone_scheduler(home.path()).unwrap();
        let layout = scheduler.layout().clone();
        let alias = RepoAlias::from("notes");
        register_at(
            home.path(),
            &RepositoryRecord::new(alias.clone(), "local://notes", layout.root()),
        )
        .unwrap();
        let master = layout.master_path("notes");
        fs::create_dir_all(&master).unwrap();
        fs::write(master.join("a.md"), "a").unwrap();

        // No alias yet: first refresh always snapshots.
        scheduler.trigger_refresh_for_repo(&alias).unwrap();
        let first = AliasManager::new(&layout).read_alias(&alias).unwrap();

        // An edit stamped far in the future is newer than any snapshot epoch.
        fs::write(master.join("b.md"), "b").unwrap();
        filetime::set_file_mtime(
            master.join("b.md"),
            filetime::FileTime::from_unix_time(i64::from(u32::MAX), 0),
        )
        .unwrap();
        scheduler.trigger_refresh_for_repo(&alias).unwrap();

        let queued = fs::read_to_string(crate::paths::cleanup_queue_path(layout.root())).unwrap();
        assert!(queued.contains(&*first.to_string_lossy()), "{queued}");
        assert!(first.exists(), "one-shot refresh must not delete inline");
    }

    #[test]
    fn handle_join_maps_join_errors() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let err = rt.block_on(async {
            let handle = tokio::spawn(async { panic!("task died") });
            handle_join("worker", handle.await)
        });
        assert!(err.unwrap_err().to_string().contains("worker task join failure"));
    }
}
