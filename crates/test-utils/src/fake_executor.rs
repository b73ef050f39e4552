use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use datapipe::exec::{
    Executor, ExecutorError, JobFilter, JobHandle, JobManifest, JobStatus, LaunchOutcome,
    RejectReason,
};
use datapipe::quota::{Admission, Quota, QuotaManager};

struct FakeJob {
    status: JobStatus,
    reserved: Quota,
}

#[derive(Default)]
struct Inner {
    jobs: BTreeMap<(String, String), FakeJob>,
    launches: Vec<(String, String)>,
    reaped: Vec<(String, String)>,
    logs: BTreeMap<(String, String), Vec<u8>>,
}

/// An in-memory executor that:
/// - records every launch and reap
/// - holds launched jobs in `Running` until a test calls `complete()`
/// - optionally draws admission from a real `QuotaManager`.
pub struct FakeExecutor {
    app: String,
    quota: Option<Arc<QuotaManager>>,
    inner: Mutex<Inner>,
}

impl FakeExecutor {
    /// An executor that admits everything.
    pub fn new(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            quota: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// An executor whose launches go through real quota admission.
    pub fn with_quota(app: impl Into<String>, quota: Arc<QuotaManager>) -> Self {
        Self {
            app: app.into(),
            quota: Some(quota),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Drive a running job to a terminal status.
    pub fn complete(&self, task: &str, job: &str, status: JobStatus) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.jobs.get_mut(&(task.to_string(), job.to_string())) {
            entry.status = status;
        }
    }

    pub fn set_logs(&self, task: &str, job: &str, logs: impl Into<Vec<u8>>) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .logs
            .insert((task.to_string(), job.to_string()), logs.into());
    }

    /// Every `(task, job)` ever admitted, in launch order.
    pub fn launches(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().launches.clone()
    }

    /// Every `(task, job)` reaped, in reap order.
    pub fn reaped(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().reaped.clone()
    }

    pub fn running_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .count()
    }
}

#[async_trait]
impl Executor for FakeExecutor {
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
        if self.inner.lock().unwrap().jobs.contains_key(&key) {
            return Ok(LaunchOutcome::Admitted);
        }

        if let Some(quota) = &self.quota {
            if let Admission::Denied { resource } = quota.reserve(&manifest.resources).await {
                return Ok(LaunchOutcome::Rejected(RejectReason::QuotaExceeded {
                    resource,
                }));
            }
        }

        let mut inner = self.inner.lock().unwrap();
        inner.jobs.insert(
            key.clone(),
            FakeJob {
                status: JobStatus::Running,
                reserved: manifest.resources.clone(),
            },
        );
        inner.launches.push(key);
        Ok(LaunchOutcome::Admitted)
    }

    async fn status(&self, task: &str, job: &str) -> Result<JobStatus, ExecutorError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .jobs
            .get(&(task.to_string(), job.to_string()))
            .map(|j| j.status)
            .unwrap_or(JobStatus::NotFound))
    }

    async fn logs(&self, task: &str, job: &str) -> Result<Vec<u8>, ExecutorError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .logs
            .get(&(task.to_string(), job.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn reap(&self, task: &str, job: &str) -> Result<(), ExecutorError> {
        let key = (task.to_string(), job.to_string());
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            let removed = inner.jobs.remove(&key);
            if removed.is_some() {
                inner.reaped.push(key);
            }
            removed
        };
        if let (Some(job), Some(quota)) = (removed, &self.quota) {
            quota.release(&job.reserved);
        }
        Ok(())
    }

    async fn query(&self, filter: &JobFilter) -> Result<Vec<JobHandle>, ExecutorError> {
        let inner = self.inner.lock().unwrap();
        let mut handles: Vec<JobHandle> = inner
            .jobs
            .keys()
            .filter(|(task, job)| {
                filter.task.as_deref().is_none_or(|t| t == task.as_str())
                    && filter.job.as_deref().is_none_or(|j| j == job.as_str())
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
