//! Deferred deletion of superseded snapshots.
//!
//! A reader that resolved an alias just before a swap may still be using the
//! old target, so deletion waits out a grace period. Only paths inside
//! `<repos_root>/.versioned` are ever deleted; the master is never touched.

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use golden_store::RepoLayout;

use crate::error::{io_err, RefreshError};
use crate::paths::cleanup_queue_path;

pub trait CleanupScheduler: Send + Sync {
    /// Queue `path` for deletion. Best effort: never fails the caller.
    fn schedule_cleanup(&self, path: &Path);
}

/// Grace-delayed deletion on a background tokio task.
///
/// Once the task has stopped, paths go straight to the on-disk queue so jobs
/// still finishing during shutdown do not leak their superseded snapshots.
#[derive(Debug, Clone)]
pub struct DeferredCleanup {
    tx: mpsc::UnboundedSender<PathBuf>,
    queue: CleanupQueueFile,
}

impl DeferredCleanup {
    /// Start the cleanup task. Paths left in the on-disk queue by earlier
    /// processes are picked up first; paths still pending at shutdown are
    /// written back to it.
    pub fn spawn(
        layout: RepoLayout,
        grace: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<Result<(), RefreshError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = CleanupQueueFile::new(layout.clone());
        let handle = tokio::spawn(cleanup_task(layout, grace, rx, shutdown_rx));
        (Self { tx, queue }, handle)
    }
}

impl CleanupScheduler for DeferredCleanup {
    fn schedule_cleanup(&self, path: &Path) {
        if self.tx.send(path.to_path_buf()).is_err() {
            tracing::debug!(path = %path.display(), "cleanup task stopped; queueing on disk");
            self.queue.schedule_cleanup(path);
        }
    }
}

/// Appends paths to the on-disk queue for a later [`DeferredCleanup`] to delete.
///
/// Used by short-lived processes (the CLI) that cannot wait out the grace period.
#[derive(Debug, Clone)]
pub struct CleanupQueueFile {
    layout: RepoLayout,
}

impl CleanupQueueFile {
    pub fn new(layout: RepoLayout) -> Self {
        Self { layout }
    }

    fn append(&self, path: &Path) -> Result<(), RefreshError> {
        append_queue(self.layout.root(), [path])
    }
}

impl CleanupScheduler for CleanupQueueFile {
    fn schedule_cleanup(&self, path: &Path) {
        if !self.layout.is_versioned(path) {
            tracing::warn!(path = %path.display(), "refusing to queue non-versioned path for cleanup");
            return;
        }
        match self.append(path) {
            Ok(()) => tracing::info!(path = %path.display(), "snapshot queued for deferred cleanup"),
            Err(err) => tracing::warn!(path = %path.display(), error = %err, "could not queue snapshot cleanup"),
        }
    }
}

async fn cleanup_task(
    layout: RepoLayout,
    grace: Duration,
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), RefreshError> {
    let mut pending: Vec<(Instant, PathBuf)> = Vec::new();
    let root = layout.root().to_path_buf();
    let queued = tokio::task::spawn_blocking(move || take_queue(&root))
        .await
        .map_err(|err| RefreshError::Runtime(format!("cleanup queue join error: {err}")))??;
    for path in queued {
        pending.push((Instant::now() + grace, path));
    }

    let mut open = true;
    loop {
        let next_due = pending.iter().map(|(due, _)| *due).min();
        if !open && next_due.is_none() {
            break;
        }
        tokio::select! {
            _ = shutdown_rx.recv() => {
                // Later sends fail and fall back to the queue file; take what is buffered.
                rx.close();
                let mut leftover: Vec<PathBuf> = pending.drain(..).map(|(_, p)| p).collect();
                while let Ok(path) = rx.try_recv() {
                    leftover.push(path);
                }
                leftover.retain(|path| layout.is_versioned(path));
                if !leftover.is_empty() {
                    let root = layout.root().to_path_buf();
                    tokio::task::spawn_blocking(move || append_queue(&root, &leftover))
                        .await
                        .map_err(|err| RefreshError::Runtime(format!("cleanup queue join error: {err}")))??;
                }
                break;
            }
            received = rx.recv(), if open => match received {
                Some(path) => {
                    tracing::debug!(path = %path.display(), grace_secs = grace.as_secs(), "cleanup scheduled");
                    pending.push((Instant::now() + grace, path));
                }
                None => open = false,
            },
            _ = tokio::time::sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                let now = Instant::now();
                let (due, later): (Vec<_>, Vec<_>) =
                    pending.drain(..).partition(|(at, _)| *at <= now);
                pending = later;
                let layout = layout.clone();
                tokio::task::spawn_blocking(move || {
                    for (_, path) in due {
                        remove_snapshot(&layout, &path);
                    }
                })
                .await
                .map_err(|err| RefreshError::Runtime(format!("cleanup join error: {err}")))?;
            }
        }
    }
    Ok(())
}

fn remove_snapshot(layout: &RepoLayout, path: &Path) {
    if !layout.is_versioned(path) {
        tracing::warn!(path = %path.display(), "refusing to delete non-versioned path");
        return;
    }
    match std::fs::remove_dir_all(path) {
        Ok(()) => tracing::info!(path = %path.display(), "superseded snapshot removed"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(path = %path.display(), error = %err, "snapshot cleanup failed"),
    }
}

fn append_queue<P: AsRef<Path>>(
    repos_root: &Path,
    paths: impl IntoIterator<Item = P>,
) -> Result<(), RefreshError> {
    let queue = cleanup_queue_path(repos_root);
    std::fs::create_dir_all(repos_root).map_err(|e| io_err(repos_root, e))?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&queue)
        .map_err(|e| io_err(&queue, e))?;
    let mut lines = String::new();
    for path in paths {
        lines.push_str(&path.as_ref().to_string_lossy());
        lines.push('\n');
    }
    file.write_all(lines.as_bytes()).map_err(|e| io_err(&queue, e))
}

/// Read and clear the on-disk queue.
fn take_queue(repos_root: &Path) -> Result<BTreeSet<PathBuf>, RefreshError> {
    let queue = cleanup_queue_path(repos_root);
    let contents = match std::fs::read_to_string(&queue) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(err) => return Err(io_err(&queue, err)),
    };
    std::fs::remove_file(&queue).map_err(|e| io_err(&queue, e))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect())
}
