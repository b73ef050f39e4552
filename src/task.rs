// src/task.rs

//! Task definition and per-run bookkeeping.
//!
//! A task is the static description (executor binding, job quota, links,
//! job template) plus the runtime state the scheduler mutates: the
//! in-flight job set and terminal results held back by output gating.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::exec::{Executor, JobManifest};
use crate::link::Link;
use crate::quota::Quota;
use crate::repo::{Repository, RepositoryError};

/// Terminal record written to a task's `done` repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneRecord {
    pub success: bool,
    /// Whether the job was failed by exceeding the task's timeout.
    pub timeout: bool,
    pub started_ms: u64,
    pub finished_ms: u64,
}

impl DoneRecord {
    pub fn to_artifact(&self) -> crate::repo::Artifact {
        // DoneRecord serializes to plain scalars; this cannot fail.
        crate::repo::Artifact::Metadata(
            serde_json::to_value(self).expect("done record serializes"),
        )
    }
}

/// An in-flight job's launch bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct Launched {
    pub at: Instant,
    pub wall_ms: u64,
}

impl Launched {
    pub fn now() -> Self {
        Self {
            at: Instant::now(),
            wall_ms: epoch_ms(),
        }
    }
}

pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A named unit of work: one job per discovered work item.
pub struct Task {
    pub name: String,
    pub executor: Arc<dyn Executor>,
    /// Resource requests declared for each job of this task.
    pub job_quota: Quota,
    /// Job argv template; `{task}` and `{job}` placeholders are substituted.
    pub template: Vec<String>,
    /// Poll interval.
    pub window: Duration,
    /// Max job duration; exceeding it fails and reaps the job. Ignored for
    /// long-running tasks.
    pub timeout: Option<Duration>,
    pub long_running: bool,
    pub environ: BTreeMap<String, String>,
    /// Terminal-state repository: a job id present here is finished and is
    /// never admitted again.
    pub done: Arc<dyn Repository>,
    pub links: BTreeMap<String, Link>,

    // Runtime bookkeeping, owned by the scheduler tick.
    pub(crate) live: HashMap<String, Launched>,
    pub(crate) held: HashMap<String, DoneRecord>,
    pub(crate) quota_warned: bool,
    pub(crate) backend_warned: bool,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("links", &self.links.keys().collect::<Vec<_>>())
            .field("live", &self.live.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        executor: Arc<dyn Executor>,
        done: Arc<dyn Repository>,
    ) -> Self {
        Self {
            name: name.into(),
            executor,
            job_quota: Quota::new(),
            template: Vec::new(),
            window: Duration::from_secs(5),
            timeout: None,
            long_running: false,
            environ: BTreeMap::new(),
            done,
            links: BTreeMap::new(),
            live: HashMap::new(),
            held: HashMap::new(),
            quota_warned: false,
            backend_warned: false,
        }
    }

    /// Attach a named link.
    pub fn link(mut self, name: impl Into<String>, link: Link) -> Self {
        self.links.insert(name.into(), link);
        self
    }

    pub fn job_quota(mut self, quota: Quota) -> Self {
        self.job_quota = quota;
        self
    }

    pub fn template(mut self, argv: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.template = argv.into_iter().map(Into::into).collect();
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn long_running(mut self, yes: bool) -> Self {
        self.long_running = yes;
        self
    }

    pub fn environ(mut self, environ: BTreeMap<String, String>) -> Self {
        self.environ = environ;
        self
    }

    /// Job ids currently believed to be running.
    pub fn live_jobs(&self) -> impl Iterator<Item = &str> {
        self.live.keys().map(String::as_str)
    }

    /// The manifest handed to the executor for one job.
    pub fn manifest(&self, job: &str) -> JobManifest {
        let command = self
            .template
            .iter()
            .map(|part| part.replace("{task}", &self.name).replace("{job}", job))
            .collect();
        JobManifest {
            command,
            environ: self.environ.clone(),
            resources: self.job_quota.clone(),
        }
    }

    /// Candidate job ids: the union of all input-link repository ids.
    ///
    /// A job's existence is inferred, never stored: it is the join of "id
    /// present in an input repository" and "id absent from `done`".
    pub async fn candidates(&self) -> Result<BTreeSet<String>, RepositoryError> {
        let mut out = BTreeSet::new();
        for link in self.links.values() {
            if !link.is_input {
                continue;
            }
            for id in link.repo.ids().await? {
                out.insert(id);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkKind;
    use crate::repo::{Artifact, MemoryRepository};
    use crate::fake_executor::FakeExecutor;

    #[tokio::test]
    async fn manifest_substitutes_placeholders() {
        let exec = Arc::new(FakeExecutor::new("app"));
        let done = Arc::new(MemoryRepository::new());
        let task = Task::new("render", exec, done)
            .template(["convert", "in/{job}", "out/{task}-{job}"])
            .job_quota(Quota::new().with("cpu", 100));

        let manifest = task.manifest("j1");
        assert_eq!(manifest.command, vec!["convert", "in/j1", "out/render-j1"]);
        assert_eq!(manifest.resources.get("cpu"), 100);
    }

    #[tokio::test]
    async fn candidates_are_the_union_of_input_links() {
        let exec = Arc::new(FakeExecutor::new("app"));
        let done = Arc::new(MemoryRepository::new());

        let a = Arc::new(MemoryRepository::new());
        a.put("j1", Artifact::Blob(Vec::new())).await.unwrap();
        let b = Arc::new(MemoryRepository::new());
        b.put("j2", Artifact::Blob(Vec::new())).await.unwrap();
        b.put("j1", Artifact::Blob(Vec::new())).await.unwrap();
        let out = Arc::new(MemoryRepository::new());

        let task = Task::new("t", exec, done)
            .link("a", Link::new(a, LinkKind::Input))
            .link("b", {
                let mut l = Link::new(b, LinkKind::Input);
                l.required_for_start = false;
                l
            })
            .link("out", Link::new(out, LinkKind::Output));

        let ids: Vec<String> = task.candidates().await.unwrap().into_iter().collect();
        assert_eq!(ids, vec!["j1".to_string(), "j2".to_string()]);
    }
}
