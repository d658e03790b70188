//! Golden repository refresh: the scheduling loop, the execute-refresh
//! pipeline, and the collaborators it drives (jobs, git, indexing, cleanup).

pub mod cleanup;
pub mod config;
mod error;
pub mod git;
pub mod index;
pub mod jitter;
pub mod jobs;
pub mod paths;
mod process;
mod runtime;
pub mod scheduler;

pub use cleanup::{CleanupQueueFile, CleanupScheduler, DeferredCleanup};
pub use config::SchedulerConfig;
pub use error::{JobError, RefreshError};
pub use git::{GitPullFactory, RemotePull, RemotePullFactory};
pub use index::{CommandIndexBuilder, IndexBuilder};
pub use jitter::{calculate_jitter, JITTER_PERCENTAGE};
pub use jobs::{BackgroundJobManager, JobId, JobRecord, JobStatus, JobTracker, JobWork};
pub use runtime::{init_tracing, run, standalone_scheduler, start_blocking};
pub use scheduler::{
    Collaborators, RefreshAction, RefreshOutcome, RefreshScheduler, SchedulerHandle, TickReport,
    REFRESH_OPERATION, SYSTEM_SUBMITTER,
};
