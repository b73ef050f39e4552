// tests/pipeline_fake_executor.rs
//
// End-to-end scheduler behaviour over in-memory repositories and a fake
// executor: discovery, admission, completion, output gating, timeouts.

mod common;
use crate::common::init_tracing;

use std::sync::Arc;
use std::time::Duration;

use datapipe::exec::JobStatus;
use datapipe::link::{Link, LinkKind};
use datapipe::quota::{Quota, QuotaManager};
use datapipe::repo::{MemoryRepository, Repository};
use datapipe::sched::Pipeline;
use datapipe::session::Session;
use datapipe_test_utils::builders::{seed, MemoryTaskBuilder};
use datapipe_test_utils::fake_executor::FakeExecutor;

#[tokio::test]
async fn one_tick_launches_every_eligible_candidate() {
    init_tracing();
    let fixture = MemoryTaskBuilder::new("render").build();
    seed(&fixture.inputs, &["a", "b"]).await;
    let executor = Arc::clone(&fixture.executor);

    let mut pipeline = Pipeline::new(vec![fixture.task], Session::new()).unwrap();
    let busy = pipeline.update().await.unwrap();

    assert!(busy);
    assert_eq!(
        executor.launches(),
        vec![
            ("render".to_string(), "a".to_string()),
            ("render".to_string(), "b".to_string()),
        ]
    );
}

#[tokio::test]
async fn completed_jobs_are_reaped_and_published() {
    init_tracing();
    let fixture = MemoryTaskBuilder::new("render").build();
    seed(&fixture.inputs, &["a"]).await;
    let executor = Arc::clone(&fixture.executor);
    let done = Arc::clone(&fixture.done);

    let mut pipeline = Pipeline::new(vec![fixture.task], Session::new()).unwrap();
    pipeline.update().await.unwrap();
    executor.complete("render", "a", JobStatus::Succeeded);
    pipeline.update().await.unwrap();

    let record = done.get("a").await.unwrap();
    let meta = record.as_metadata().unwrap();
    assert_eq!(meta["success"], true);
    assert_eq!(executor.reaped(), vec![("render".to_string(), "a".to_string())]);
    assert_eq!(executor.running_count(), 0);

    // Done jobs are never admitted again; the pipeline goes idle.
    assert!(!pipeline.update().await.unwrap());
    assert_eq!(executor.launches().len(), 1);
}

#[tokio::test]
async fn failed_jobs_record_failure() {
    init_tracing();
    let fixture = MemoryTaskBuilder::new("render").build();
    seed(&fixture.inputs, &["a"]).await;
    let executor = Arc::clone(&fixture.executor);
    let done = Arc::clone(&fixture.done);

    let mut pipeline = Pipeline::new(vec![fixture.task], Session::new()).unwrap();
    pipeline.update().await.unwrap();
    executor.complete("render", "a", JobStatus::Failed);
    pipeline.update().await.unwrap();

    let meta = done.get("a").await.unwrap().as_metadata().unwrap().clone();
    assert_eq!(meta["success"], false);
    assert_eq!(meta["timeout"], false);
}

#[tokio::test]
async fn output_gate_holds_terminal_results() {
    init_tracing();
    let gate: Arc<MemoryRepository> = Arc::new(MemoryRepository::new());
    let mut fixture = MemoryTaskBuilder::new("render").build();
    fixture.task = fixture.task.link("gate", {
        let mut link = Link::new(
            Arc::clone(&gate) as Arc<dyn Repository>,
            LinkKind::StatusArtifact,
        );
        link.required_for_output = true;
        link
    });
    seed(&fixture.inputs, &["a"]).await;
    let executor = Arc::clone(&fixture.executor);
    let done = Arc::clone(&fixture.done);

    let mut pipeline = Pipeline::new(vec![fixture.task], Session::new()).unwrap();
    pipeline.update().await.unwrap();
    executor.complete("render", "a", JobStatus::Succeeded);

    // Terminal, but the gate repo has no artifact yet: the record is held.
    let busy = pipeline.update().await.unwrap();
    assert!(busy);
    assert!(!done.contains("a").await.unwrap());

    seed(&gate, &["a"]).await;
    pipeline.update().await.unwrap();
    assert!(done.contains("a").await.unwrap());
}

#[tokio::test]
async fn quota_rejection_defers_admission_to_a_later_tick() {
    init_tracing();
    let manager = QuotaManager::new(Quota::new().with("launches", 1));
    let executor = Arc::new(FakeExecutor::with_quota("test", manager));
    let fixture = MemoryTaskBuilder::new("render")
        .executor(Arc::clone(&executor))
        .job_quota(Quota::new().with("launches", 1))
        .build();
    seed(&fixture.inputs, &["a", "b"]).await;

    let mut pipeline = Pipeline::new(vec![fixture.task], Session::new()).unwrap();
    let busy = pipeline.update().await.unwrap();
    assert!(busy);
    assert_eq!(executor.launches().len(), 1);

    // Completing the first job releases its reservation on reap; the
    // second candidate is admitted on the same later tick.
    executor.complete("render", "a", JobStatus::Succeeded);
    pipeline.update().await.unwrap();
    assert_eq!(executor.launches().len(), 2);
}

#[tokio::test]
async fn existing_outputs_inhibit_start() {
    init_tracing();
    let fixture = MemoryTaskBuilder::new("render").build();
    seed(&fixture.inputs, &["a", "b"]).await;
    seed(&fixture.output, &["a"]).await;
    let executor = Arc::clone(&fixture.executor);

    let mut pipeline = Pipeline::new(vec![fixture.task], Session::new()).unwrap();
    pipeline.update().await.unwrap();

    assert_eq!(
        executor.launches(),
        vec![("render".to_string(), "b".to_string())]
    );
}

#[tokio::test]
async fn done_jobs_are_not_relaunched() {
    init_tracing();
    let fixture = MemoryTaskBuilder::new("render").build();
    seed(&fixture.inputs, &["a", "b"]).await;
    seed(&fixture.done, &["a"]).await;
    let executor = Arc::clone(&fixture.executor);

    let mut pipeline = Pipeline::new(vec![fixture.task], Session::new()).unwrap();
    pipeline.update().await.unwrap();

    assert_eq!(
        executor.launches(),
        vec![("render".to_string(), "b".to_string())]
    );
}

#[tokio::test]
async fn overrunning_jobs_fail_with_a_timeout_record() {
    init_tracing();
    let mut fixture = MemoryTaskBuilder::new("render").build();
    fixture.task = fixture.task.timeout(Duration::ZERO);
    seed(&fixture.inputs, &["a"]).await;
    let executor = Arc::clone(&fixture.executor);
    let done = Arc::clone(&fixture.done);

    let mut pipeline = Pipeline::new(vec![fixture.task], Session::new()).unwrap();
    pipeline.update().await.unwrap();
    // The job never completes; the next poll sees it over its limit.
    pipeline.update().await.unwrap();

    let meta = done.get("a").await.unwrap().as_metadata().unwrap().clone();
    assert_eq!(meta["success"], false);
    assert_eq!(meta["timeout"], true);
    assert_eq!(executor.reaped().len(), 1);
}

#[tokio::test]
async fn long_running_jobs_ignore_the_timeout() {
    init_tracing();
    let mut fixture = MemoryTaskBuilder::new("serve").without_output_link().build();
    fixture.task = fixture.task.timeout(Duration::ZERO).long_running(true);
    seed(&fixture.inputs, &["a"]).await;
    let executor = Arc::clone(&fixture.executor);

    let mut pipeline = Pipeline::new(vec![fixture.task], Session::new()).unwrap();
    pipeline.update().await.unwrap();
    pipeline.update().await.unwrap();

    assert_eq!(executor.running_count(), 1);
    assert!(executor.reaped().is_empty());
}

#[tokio::test]
async fn dataflow_order_lets_consumers_run_in_the_producing_tick() {
    init_tracing();
    let producer = MemoryTaskBuilder::new("build").build();
    // Named before "build" alphabetically; dataflow order must still put
    // it after its producer.
    let consumer = MemoryTaskBuilder::new("assemble")
        .inputs(Arc::clone(&producer.done))
        .build();
    seed(&producer.inputs, &["a"]).await;
    let build_exec = Arc::clone(&producer.executor);
    let assemble_exec = Arc::clone(&consumer.executor);

    let mut pipeline =
        Pipeline::new(vec![producer.task, consumer.task], Session::new()).unwrap();
    assert_eq!(pipeline.order(), ["build", "assemble"]);

    pipeline.update().await.unwrap();
    build_exec.complete("build", "a", JobStatus::Succeeded);

    // One tick: "build" publishes its done record, then "assemble" sees it.
    pipeline.update().await.unwrap();
    assert_eq!(
        assemble_exec.launches(),
        vec![("assemble".to_string(), "a".to_string())]
    );
}
