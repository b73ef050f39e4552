// src/sched/pipeline.rs

//! The pipeline control loop.
//!
//! One tick walks every task in the fixed evaluation order and, per task:
//! polls in-flight jobs, flushes output-gated terminal results into the
//! `done` repository, then discovers and admits new candidates. All backend
//! I/O happens at await points; admission is re-evaluated each tick rather
//! than cached across one.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::signal;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::errors::{DatapipeError, Result};
use crate::exec::{ExecutorError, JobStatus, LaunchOutcome, RejectReason};
use crate::link::evaluate;
use crate::repo::RepositoryError;
use crate::session::Session;
use crate::task::{epoch_ms, DoneRecord, Launched, Task};

use super::order_tasks;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Exit the run loop once no job is in flight and no candidate is
    /// pending (`--once`).
    pub exit_when_idle: bool,
}

/// A built pipeline: the task set, its fixed evaluation order, and the
/// session supplying live backend connections.
pub struct Pipeline {
    tasks: BTreeMap<String, Task>,
    order: Vec<String>,
    session: Session,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(tasks: Vec<Task>, session: Session) -> Result<Self> {
        let mut map = BTreeMap::new();
        for task in tasks {
            let name = task.name.clone();
            if map.insert(name.clone(), task).is_some() {
                return Err(DatapipeError::Config(format!(
                    "duplicate task name {name:?}"
                )));
            }
        }
        let order = order_tasks(&map)?;
        Ok(Self {
            tasks: map,
            order,
            session,
        })
    }

    /// Fixed evaluation order (topological over link dataflow, then name).
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    pub async fn open(&mut self) -> Result<()> {
        self.session.open().await?;
        Ok(())
    }

    pub async fn close(&mut self) {
        self.session.close().await;
    }

    /// One scheduler tick. Returns `true` while work remains (jobs in
    /// flight, held results, or candidates waiting on quota).
    pub async fn update(&mut self) -> Result<bool> {
        let mut busy = false;
        for name in self.order.clone() {
            let task = self.tasks.get_mut(&name).expect("order matches tasks");
            match step_task(task).await {
                Ok(task_busy) => busy |= task_busy,
                Err(err) if is_transient(&err) => {
                    if !task.backend_warned {
                        warn!(task = %name, error = %err, "backend trouble; retrying next tick");
                        task.backend_warned = true;
                    }
                    busy = true;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(busy)
    }

    /// Drive the pipeline: open the session, tick until shutdown (or until
    /// idle with `exit_when_idle`), then reap stragglers and close the
    /// session on every exit path.
    pub async fn run(mut self, opts: RunOptions) -> Result<()> {
        self.open().await?;
        let result = self.run_loop(opts).await;
        self.shutdown().await;
        self.close().await;
        result
    }

    async fn run_loop(&mut self, opts: RunOptions) -> Result<()> {
        let window = self
            .tasks
            .values()
            .map(|t| t.window)
            .min()
            .unwrap_or(Duration::from_secs(1));

        info!(order = ?self.order, "pipeline started");
        loop {
            let busy = self.update().await?;
            if !busy && opts.exit_when_idle {
                info!("pipeline idle; exiting");
                return Ok(());
            }

            tokio::select! {
                _ = sleep(window) => {}
                res = signal::ctrl_c() => {
                    if let Err(err) = res {
                        warn!(error = %err, "failed to listen for Ctrl+C");
                    }
                    info!("shutdown requested");
                    return Ok(());
                }
            }
        }
    }

    /// Best-effort reap of everything still in flight, releasing quota even
    /// if a backend reports the job as still transitioning.
    async fn shutdown(&mut self) {
        for task in self.tasks.values_mut() {
            let jobs: Vec<String> = task.live.keys().cloned().collect();
            for job in jobs {
                if let Err(err) = task.executor.reap(&task.name, &job).await {
                    warn!(task = %task.name, job = %job, error = %err, "reap failed during shutdown");
                }
                task.live.remove(&job);
            }
        }
    }
}

fn is_transient(err: &DatapipeError) -> bool {
    matches!(
        err,
        DatapipeError::Repository(RepositoryError::Unavailable(_))
            | DatapipeError::Executor(ExecutorError::BackendUnreachable(_))
    )
}

/// Evaluate one task for one tick.
async fn step_task(task: &mut Task) -> Result<bool> {
    let mut busy = false;

    // Poll in-flight jobs.
    let live: Vec<(String, Launched)> = task
        .live
        .iter()
        .map(|(job, launched)| (job.clone(), *launched))
        .collect();
    for (job, launched) in live {
        let status = task.executor.status(&task.name, &job).await?;
        let timed_out = !task.long_running
            && task.timeout.is_some_and(|limit| launched.at.elapsed() > limit);

        let record = match status {
            JobStatus::Succeeded | JobStatus::Failed => Some(DoneRecord {
                success: status == JobStatus::Succeeded,
                timeout: false,
                started_ms: launched.wall_ms,
                finished_ms: epoch_ms(),
            }),
            JobStatus::Pending | JobStatus::Running if timed_out => {
                warn!(task = %task.name, job = %job, "job exceeded timeout; failing");
                Some(DoneRecord {
                    success: false,
                    timeout: true,
                    started_ms: launched.wall_ms,
                    finished_ms: epoch_ms(),
                })
            }
            JobStatus::NotFound => {
                warn!(task = %task.name, job = %job, "backend no longer knows this job; failing");
                Some(DoneRecord {
                    success: false,
                    timeout: false,
                    started_ms: launched.wall_ms,
                    finished_ms: epoch_ms(),
                })
            }
            JobStatus::Pending | JobStatus::Running => None,
        };

        match record {
            Some(record) => {
                task.executor.reap(&task.name, &job).await?;
                task.live.remove(&job);
                debug!(task = %task.name, job = %job, success = record.success, "job terminal");
                task.held.insert(job, record);
            }
            None => busy = true,
        }
    }

    // Flush terminal results whose output gates pass.
    for job in task.held.keys().cloned().collect::<Vec<_>>() {
        let readiness = evaluate(task.links.values(), &job).await?;
        if readiness.can_publish() {
            let record = task.held.get(&job).expect("held entry").clone();
            task.done.put(&job, record.to_artifact()).await?;
            task.held.remove(&job);
            info!(task = %task.name, job = %job, success = record.success, "job done");
        } else {
            debug!(task = %task.name, job = %job, "result held; output gate not passed");
            busy = true;
        }
    }

    // Discover and admit new candidates.
    for job in task.candidates().await? {
        if task.live.contains_key(&job) || task.held.contains_key(&job) {
            continue;
        }
        if task.done.contains(&job).await? {
            continue;
        }
        let readiness = evaluate(task.links.values(), &job).await?;
        if !readiness.can_start() {
            debug!(task = %task.name, job = %job, "candidate not eligible to start");
            continue;
        }

        let manifest = task.manifest(&job);
        match task.executor.launch(&task.name, &job, &manifest).await {
            Ok(LaunchOutcome::Admitted) => {
                info!(task = %task.name, job = %job, "job launched");
                task.live.insert(job, Launched::now());
                task.quota_warned = false;
                busy = true;
            }
            Ok(LaunchOutcome::Rejected(RejectReason::QuotaExceeded { resource })) => {
                if !task.quota_warned {
                    info!(task = %task.name, resource = %resource, "admission denied; waiting for capacity");
                    task.quota_warned = true;
                }
                busy = true;
                // Retried next tick as capacity frees, not within this one.
                break;
            }
            Err(ExecutorError::LaunchFailed { reason, .. }) => {
                warn!(task = %task.name, job = %job, reason = %reason, "launch failed; recording failure");
                let now = epoch_ms();
                task.held.insert(
                    job,
                    DoneRecord {
                        success: false,
                        timeout: false,
                        started_ms: now,
                        finished_ms: now,
                    },
                );
                busy = true;
            }
            Err(err) => return Err(err.into()),
        }
    }

    busy |= !task.live.is_empty() || !task.held.is_empty();
    task.backend_warned = false;
    Ok(busy)
}
