// tests/pipeline_local_executor.rs
//
// Full-stack run: file repositories, a session-scoped scratch directory,
// real child processes through the local executor.

mod common;
use crate::common::{init_tracing, with_timeout};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use datapipe::config::ScratchDir;
use datapipe::exec::{Executor, LocalExecutor, WorkDir};
use datapipe::link::{Link, LinkKind};
use datapipe::quota::{Quota, QuotaManager};
use datapipe::repo::{Artifact, MetadataFileRepository, Repository};
use datapipe::sched::Pipeline;
use datapipe::session::Session;
use datapipe::task::Task;

#[tokio::test]
async fn runs_real_jobs_to_done_records() {
    init_tracing();

    let inputs_dir = tempfile::tempdir().unwrap();
    let done_dir = tempfile::tempdir().unwrap();
    let inputs = Arc::new(MetadataFileRepository::new(inputs_dir.path()));
    let done = Arc::new(MetadataFileRepository::new(done_dir.path()));
    for id in ["a", "b"] {
        inputs
            .put(id, Artifact::Metadata(serde_json::json!({})))
            .await
            .unwrap();
    }

    let mut session = Session::new();
    session.register::<PathBuf>("scratch", Box::new(ScratchDir::new(None)));
    let quota = QuotaManager::new(Quota::new().with("launches", 2));
    let executor: Arc<dyn Executor> = Arc::new(LocalExecutor::new(
        "itest",
        WorkDir::Ephemeral(session.handle("scratch")),
        quota,
    ));

    let task = Task::new("echoes", executor, Arc::clone(&done) as Arc<dyn Repository>)
        .template(["sh", "-c", "echo {task}/{job}"])
        .job_quota(Quota::new().with("launches", 1))
        .link(
            "inputs",
            Link::new(Arc::clone(&inputs) as Arc<dyn Repository>, LinkKind::Input),
        );

    let mut pipeline = Pipeline::new(vec![task], session).unwrap();
    pipeline.open().await.unwrap();

    with_timeout(async {
        loop {
            pipeline.update().await.unwrap();
            if done.contains("a").await.unwrap() && done.contains("b").await.unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    for id in ["a", "b"] {
        let record = done.get(id).await.unwrap();
        assert_eq!(record.as_metadata().unwrap()["success"], true);
    }
    pipeline.close().await;
}
