// src/exec/local.rs

//! Local process executor.
//!
//! Jobs run as child processes of the scheduler. Each job gets its own
//! directory under the executor's working root, with stdout/stderr captured
//! to files there (the source for `logs`).

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::quota::{Admission, Quota, QuotaManager};
use crate::session::{Handle, SessionError};

use super::{
    Executor, ExecutorError, JobFilter, JobHandle, JobManifest, JobStatus, LaunchOutcome,
    RejectReason,
};

/// Where this executor puts per-job directories.
///
/// The ephemeral variant resolves through a session handle, so an executor
/// can be constructed before the session opens and still land its jobs in a
/// session-scoped scratch directory.
#[derive(Debug, Clone)]
pub enum WorkDir {
    Fixed(PathBuf),
    Ephemeral(Handle<PathBuf>),
}

impl WorkDir {
    fn resolve(&self) -> Result<PathBuf, SessionError> {
        match self {
            WorkDir::Fixed(path) => Ok(path.clone()),
            WorkDir::Ephemeral(handle) => Ok((*handle.get()?).clone()),
        }
    }
}

struct LocalJob {
    child: Option<Child>,
    reserved: Quota,
    status: JobStatus,
}

type JobKey = (String, String);

pub struct LocalExecutor {
    app: String,
    workdir: WorkDir,
    quota: Arc<QuotaManager>,
    running: Mutex<HashMap<JobKey, LocalJob>>,
}

impl std::fmt::Debug for LocalExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalExecutor")
            .field("app", &self.app)
            .field("workdir", &self.workdir)
            .finish_non_exhaustive()
    }
}

impl LocalExecutor {
    pub fn new(app: impl Into<String>, workdir: WorkDir, quota: Arc<QuotaManager>) -> Self {
        Self {
            app: app.into(),
            workdir,
            quota,
            running: Mutex::new(HashMap::new()),
        }
    }

    fn job_dir(&self, task: &str, job: &str) -> Result<PathBuf, ExecutorError> {
        let base = self
            .workdir
            .resolve()
            .map_err(|err| ExecutorError::BackendUnreachable(err.to_string()))?;
        Ok(base.join(&self.app).join(format!("{task}-{job}")))
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn app(&self) -> &str {
        &self.app
    }

    async fn launch(
        &self,
        task: &str,
        job: &str,
        manifest: &JobManifest,
    ) -> Result<LaunchOutcome, ExecutorError> {
        let key = (task.to_string(), job.to_string());
        if self.running.lock().unwrap().contains_key(&key) {
            warn!(task, job, "launch requested for a job already running; ignoring");
            return Ok(LaunchOutcome::Admitted);
        }

        if manifest.command.is_empty() {
            return Err(ExecutorError::LaunchFailed {
                task: task.to_string(),
                job: job.to_string(),
                reason: "manifest has an empty command".to_string(),
            });
        }

        match self.quota.reserve(&manifest.resources).await {
            Admission::Denied { resource } => {
                return Ok(LaunchOutcome::Rejected(RejectReason::QuotaExceeded {
                    resource,
                }));
            }
            Admission::Granted => {}
        }

        // From here on, any failure must hand the reservation back.
        let spawned = self.spawn(task, job, manifest).await;
        let child = match spawned {
            Ok(child) => child,
            Err(err) => {
                self.quota.release(&manifest.resources);
                return Err(err);
            }
        };

        info!(task, job, app = %self.app, "launched local job");
        self.running.lock().unwrap().insert(
            key,
            LocalJob {
                child: Some(child),
                reserved: manifest.resources.clone(),
                status: JobStatus::Running,
            },
        );
        Ok(LaunchOutcome::Admitted)
    }

    async fn status(&self, task: &str, job: &str) -> Result<JobStatus, ExecutorError> {
        let key = (task.to_string(), job.to_string());
        let mut running = self.running.lock().unwrap();
        let record = match running.get_mut(&key) {
            Some(record) => record,
            None => return Ok(JobStatus::NotFound),
        };

        if let Some(child) = record.child.as_mut() {
            match child.try_wait() {
                Ok(Some(exit)) => {
                    record.status = if exit.success() {
                        JobStatus::Succeeded
                    } else {
                        JobStatus::Failed
                    };
                    debug!(task, job, code = exit.code(), "local job exited");
                    record.child = None;
                }
                Ok(None) => {}
                Err(err) => {
                    return Err(ExecutorError::BackendUnreachable(err.to_string()));
                }
            }
        }
        Ok(record.status)
    }

    async fn logs(&self, task: &str, job: &str) -> Result<Vec<u8>, ExecutorError> {
        let dir = self.job_dir(task, job)?;
        let mut out = Vec::new();
        for name in ["stdout", "stderr"] {
            match tokio::fs::read(dir.join(name)).await {
                Ok(bytes) => out.extend_from_slice(&bytes),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(ExecutorError::BackendUnreachable(err.to_string())),
            }
        }
        Ok(out)
    }

    async fn reap(&self, task: &str, job: &str) -> Result<(), ExecutorError> {
        let key = (task.to_string(), job.to_string());
        let record = self.running.lock().unwrap().remove(&key);
        let Some(mut record) = record else {
            // Already gone.
            return Ok(());
        };

        if let Some(mut child) = record.child.take() {
            if let Err(err) = child.start_kill() {
                warn!(task, job, error = %err, "failed to signal local job; releasing quota anyway");
            }
            // Collect the exit status off-loop so the child doesn't linger
            // as a zombie.
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
        }

        self.quota.release(&record.reserved);
        debug!(task, job, "reaped local job");
        Ok(())
    }

    async fn query(&self, filter: &JobFilter) -> Result<Vec<JobHandle>, ExecutorError> {
        let running = self.running.lock().unwrap();
        let mut handles: Vec<JobHandle> = running
            .keys()
            .filter(|(task, job)| {
                filter.task.as_deref().is_none_or(|t| t == task)
                    && filter.job.as_deref().is_none_or(|j| j == job)
            })
            .map(|(task, job)| JobHandle {
                task: task.clone(),
                job: job.clone(),
            })
            .collect();
        handles.sort_by(|a, b| (&a.task, &a.job).cmp(&(&b.task, &b.job)));
        Ok(handles)
    }
}

impl LocalExecutor {
    async fn spawn(
        &self,
        task: &str,
        job: &str,
        manifest: &JobManifest,
    ) -> Result<Child, ExecutorError> {
        let launch_failed = |reason: String| ExecutorError::LaunchFailed {
            task: task.to_string(),
            job: job.to_string(),
            reason,
        };

        let dir = self.job_dir(task, job)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| launch_failed(format!("creating job dir: {err}")))?;

        let stdout = std::fs::File::create(dir.join("stdout"))
            .map_err(|err| launch_failed(format!("creating stdout capture: {err}")))?;
        let stderr = std::fs::File::create(dir.join("stderr"))
            .map_err(|err| launch_failed(format!("creating stderr capture: {err}")))?;

        let mut cmd = Command::new(&manifest.command[0]);
        cmd.args(&manifest.command[1..])
            .envs(&manifest.environ)
            .env("DATAPIPE_APP", &self.app)
            .env("DATAPIPE_TASK", task)
            .env("DATAPIPE_JOB", job)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);

        cmd.spawn()
            .map_err(|err| launch_failed(format!("spawning process: {err}")))
    }
}
