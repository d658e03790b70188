//! Background job tracking.
//!
//! [`BackgroundJobManager`] runs each submitted closure on the blocking pool,
//! at most `max_concurrent` at a time, and keeps a status record per job.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

use crate::error::JobError;

pub type JobFailure = Box<dyn std::error::Error + Send + Sync>;
pub type JobWork = Box<dyn FnOnce() -> Result<Value, JobFailure> + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub operation: String,
    pub repo_alias: String,
    pub submitter: String,
    pub is_admin: bool,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Accepts work and runs it asynchronously.
///
/// `Err` from the work marks the job failed with the error's text; any `Ok`
/// marks it completed.
pub trait JobTracker: Send + Sync {
    fn submit_job(
        &self,
        operation: &str,
        work: JobWork,
        submitter: &str,
        is_admin: bool,
        repo_alias: &str,
    ) -> Result<JobId, JobError>;
}

#[derive(Clone)]
pub struct BackgroundJobManager {
    handle: Handle,
    shared: Arc<Shared>,
}

struct Shared {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
    permits: Arc<Semaphore>,
    changed: Notify,
}

impl BackgroundJobManager {
    /// Must be called from within a tokio runtime.
    pub fn new(max_concurrent: usize) -> Result<Self, JobError> {
        let handle = Handle::try_current().map_err(|_| JobError::NoRuntime)?;
        Ok(Self::with_handle(handle, max_concurrent))
    }

    pub fn with_handle(handle: Handle, max_concurrent: usize) -> Self {
        Self {
            handle,
            shared: Arc::new(Shared {
                jobs: Mutex::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
                changed: Notify::new(),
            }),
        }
    }

    pub fn get_job(&self, id: &JobId) -> Option<JobRecord> {
        self.shared.lock().get(id).cloned()
    }

    /// All jobs, oldest first.
    pub fn list_jobs(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<_> = self.shared.lock().values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Resolves once the job is completed or failed. `None` for unknown ids.
    pub async fn wait_for_job(&self, id: &JobId) -> Option<JobRecord> {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.get_job(id) {
                None => return None,
                Some(job) if job.status.is_terminal() => return Some(job),
                Some(_) => notified.await,
            }
        }
    }

    /// Stop handing out worker slots. Queued jobs fail; running ones finish.
    pub fn close(&self) {
        self.shared.permits.close();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, JobRecord>> {
        // A panic while holding the guard cannot leave a record half-written.
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update(&self, id: &JobId, apply: impl FnOnce(&mut JobRecord)) {
        if let Some(job) = self.lock().get_mut(id) {
            apply(job);
        }
        self.changed.notify_waiters();
    }

    fn finish(&self, id: &JobId, outcome: Result<Value, String>) {
        self.update(id, |job| {
            job.completed_at = Some(Utc::now());
            match outcome {
                Ok(value) => {
                    job.status = JobStatus::Completed;
                    job.result = Some(value);
                }
                Err(message) => {
                    job.status = JobStatus::Failed;
                    job.error = Some(message);
                }
            }
        });
    }
}

impl JobTracker for BackgroundJobManager {
    fn submit_job(
        &self,
        operation: &str,
        work: JobWork,
        submitter: &str,
        is_admin: bool,
        repo_alias: &str,
    ) -> Result<JobId, JobError> {
        if self.shared.permits.is_closed() {
            return Err(JobError::Closed);
        }

        let id = JobId::generate();
        self.shared.lock().insert(
            id.clone(),
            JobRecord {
                id: id.clone(),
                operation: operation.to_string(),
                repo_alias: repo_alias.to_string(),
                submitter: submitter.to_string(),
                is_admin,
                status: JobStatus::Pending,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
                result: None,
                error: None,
            },
        );
        tracing::info!(job = %id, operation, alias = repo_alias, submitter, "job submitted");

        let shared = self.shared.clone();
        let job_id = id.clone();
        self.handle.spawn(async move {
            let Ok(_permit) = shared.permits.clone().acquire_owned().await else {
                shared.finish(&job_id, Err(JobError::Closed.to_string()));
                return;
            };
            shared.update(&job_id, |job| {
                job.status = JobStatus::Running;
                job.started_at = Some(Utc::now());
            });

            let outcome = match tokio::task::spawn_blocking(work).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(err.to_string()),
                Err(join) => Err(format!("job panicked: {join}")),
            };
            match &outcome {
                Ok(_) => tracing::info!(job = %job_id, "job completed"),
                Err(message) => tracing::error!(job = %job_id, error = %message, "job failed"),
            }
            shared.finish(&job_id, outcome);
        });

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ok_work(value: Value) -> JobWork {
        Box::new(move || Ok(value))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn successful_work_completes_with_result() {
        let jobs = BackgroundJobManager::new(2).unwrap();
        let id = jobs
            .submit_job("op", ok_work(serde_json::json!({"n": 1})), "system", true, "docs")
            .unwrap();

        let job = jobs.wait_for_job(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(serde_json::json!({"n": 1})));
        assert_eq!(job.repo_alias, "docs");
        assert!(job.is_admin);
        assert!(job.started_at.is_some() && job.completed_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failing_work_is_failed_with_error_text() {
        let jobs = BackgroundJobManager::new(2).unwrap();
        let id = jobs
            .submit_job(
                "op",
                Box::new(|| Err("remote unreachable".into())),
                "system",
                true,
                "docs",
            )
            .unwrap();

        let job = jobs.wait_for_job(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("remote unreachable"));
        assert!(job.result.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_work_is_failed() {
        let jobs = BackgroundJobManager::new(1).unwrap();
        let id = jobs
            .submit_job("op", Box::new(|| panic!("boom")), "system", true, "docs")
            .unwrap();
        let job = jobs.wait_for_job(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("panicked"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_is_bounded_by_permits() {
        let jobs = BackgroundJobManager::new(2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let ids: Vec<_> = (0..6)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                jobs.submit_job(
                    "op",
                    Box::new(move || {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(30));
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(Value::from(i))
                    }),
                    "system",
                    true,
                    "docs",
                )
                .unwrap()
            })
            .collect();

        for id in &ids {
            assert_eq!(jobs.wait_for_job(id).await.unwrap().status, JobStatus::Completed);
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(jobs.list_jobs().len(), 6);
    }

    #[tokio::test]
    async fn unknown_job_waits_resolve_to_none() {
        let jobs = BackgroundJobManager::new(1).unwrap();
        assert!(jobs.wait_for_job(&JobId("missing".into())).await.is_none());
    }

    #[tokio::test]
    async fn closed_manager_rejects_submissions() {
        let jobs = BackgroundJobManager::new(1).unwrap();
        jobs.close();
        let err = jobs
            .submit_job("op", ok_work(Value::Null), "system", true, "docs")
            .unwrap_err();
        assert!(matches!(err, JobError::Closed));
    }

    #[test]
    fn construction_outside_runtime_is_an_error() {
        assert!(matches!(BackgroundJobManager::new(1), Err(JobError::NoRuntime)));
    }
}
