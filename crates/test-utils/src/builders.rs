#![allow(dead_code)]

use std::sync::Arc;

use datapipe::link::{Link, LinkKind};
use datapipe::quota::Quota;
use datapipe::repo::{Artifact, MemoryRepository, Repository};
use datapipe::task::Task;

use crate::fake_executor::FakeExecutor;

/// A task wired over in-memory repositories and a [`FakeExecutor`], keeping
/// handles to every piece so tests can seed inputs and assert on state.
pub struct MemoryTask {
    pub inputs: Arc<MemoryRepository>,
    pub output: Arc<MemoryRepository>,
    pub done: Arc<MemoryRepository>,
    pub executor: Arc<FakeExecutor>,
    pub task: Task,
}

/// Builder for [`MemoryTask`].
pub struct MemoryTaskBuilder {
    name: String,
    executor: Arc<FakeExecutor>,
    inputs: Arc<MemoryRepository>,
    output: Arc<MemoryRepository>,
    done: Arc<MemoryRepository>,
    with_output_link: bool,
    job_quota: Quota,
}

impl MemoryTaskBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            executor: Arc::new(FakeExecutor::new("test")),
            inputs: Arc::new(MemoryRepository::new()),
            output: Arc::new(MemoryRepository::new()),
            done: Arc::new(MemoryRepository::new()),
            with_output_link: true,
            job_quota: Quota::new(),
        }
    }

    pub fn executor(mut self, executor: Arc<FakeExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Share a repository with another task (dataflow edges in tests).
    pub fn inputs(mut self, repo: Arc<MemoryRepository>) -> Self {
        self.inputs = repo;
        self
    }

    pub fn output(mut self, repo: Arc<MemoryRepository>) -> Self {
        self.output = repo;
        self
    }

    pub fn without_output_link(mut self) -> Self {
        self.with_output_link = false;
        self
    }

    pub fn job_quota(mut self, quota: Quota) -> Self {
        self.job_quota = quota;
        self
    }

    pub fn build(self) -> MemoryTask {
        let mut task = Task::new(
            self.name.clone(),
            Arc::clone(&self.executor) as Arc<dyn datapipe::exec::Executor>,
            Arc::clone(&self.done) as Arc<dyn Repository>,
        )
        .job_quota(self.job_quota)
        .link(
            "inputs",
            Link::new(Arc::clone(&self.inputs) as Arc<dyn Repository>, LinkKind::Input),
        );
        if self.with_output_link {
            task = task.link(
                "out",
                Link::new(Arc::clone(&self.output) as Arc<dyn Repository>, LinkKind::Output),
            );
        }
        MemoryTask {
            inputs: self.inputs,
            output: self.output,
            done: self.done,
            executor: self.executor,
            task,
        }
    }
}

/// Seed a repository with empty blob artifacts under the given ids.
pub async fn seed(repo: &MemoryRepository, ids: &[&str]) {
    for id in ids {
        repo.put(id, Artifact::Blob(Vec::new()))
            .await
            .expect("seeding a memory repository cannot fail");
    }
}
