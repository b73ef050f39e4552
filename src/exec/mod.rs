// src/exec/mod.rs

//! Pluggable execution backends.
//!
//! An [`Executor`] can launch, poll, and reap one job per (task, job id)
//! pair, drawing admission from its bound
//! [`QuotaManager`](crate::quota::QuotaManager). All backends honor the same
//! contract; only manifest shape and transport differ. The crate ships the
//! local-process backend in [`local`]; remote variants plug in through the
//! config registry.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::quota::Quota;

pub mod local;

pub use local::{LocalExecutor, WorkDir};

/// Backend-reported job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// The backend does not know this job (never launched, or reaped).
    NotFound,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// Why a launch was rejected. Not an error: the candidate stays pending and
/// is retried on a later tick as capacity frees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    QuotaExceeded { resource: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Admitted,
    Rejected(RejectReason),
}

/// What to run for one job: an argv, environment, and the resource requests
/// that admission is computed from.
#[derive(Debug, Clone, Default)]
pub struct JobManifest {
    pub command: Vec<String>,
    pub environ: BTreeMap<String, String>,
    pub resources: Quota,
}

/// Filter for [`Executor::query`], matching the `app`/`task`/`job` label
/// convention (`app` is implied by the executor itself).
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub task: Option<String>,
    pub job: Option<String>,
}

/// A job known to an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub task: String,
    pub job: String,
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    /// The backend mutation failed outright; the job is recorded as failed.
    #[error("failed to launch job {job:?} for task {task:?}: {reason}")]
    LaunchFailed {
        task: String,
        job: String,
        reason: String,
    },

    /// Transient; retried next tick with the warning deduplicated per task.
    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),

    /// During usage reconciliation this degrades to zero usage instead of
    /// aborting the tick.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

/// An environment in which jobs run.
///
/// Implementations keep a private record of which jobs they believe are
/// running (the double-admission guard) together with each job's reserved
/// quota, so that `reap` releases exactly what `launch` took.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Application identifier; namespaces this executor's jobs on the
    /// backend.
    fn app(&self) -> &str;

    /// Attempt admission and, if granted, create the backend job.
    ///
    /// Rejection makes no backend mutation and leaves quota untouched.
    /// Launching a job that is already running is a no-op `Admitted`.
    async fn launch(
        &self,
        task: &str,
        job: &str,
        manifest: &JobManifest,
    ) -> Result<LaunchOutcome, ExecutorError>;

    async fn status(&self, task: &str, job: &str) -> Result<JobStatus, ExecutorError>;

    /// Best-effort job output; backend-dependent.
    async fn logs(&self, task: &str, job: &str) -> Result<Vec<u8>, ExecutorError>;

    /// Delete the backend job and release its quota. Reaping an
    /// already-gone job is a no-op.
    async fn reap(&self, task: &str, job: &str) -> Result<(), ExecutorError>;

    /// List known jobs under this executor's namespace, for reconciliation
    /// after a restart.
    async fn query(&self, filter: &JobFilter) -> Result<Vec<JobHandle>, ExecutorError>;
}
