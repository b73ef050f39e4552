// tests/config_load.rs
//
// Config loading from disk, validation failures, and a config-built
// pipeline driven to completion.

mod common;
use crate::common::{init_tracing, with_timeout};

use std::path::Path;
use std::sync::Arc;

use datapipe::config::{build_pipeline, load_and_validate, load_from_path};
use datapipe::errors::DatapipeError;
use datapipe::repo::{Artifact, MetadataFileRepository, Repository};
use datapipe::sched::RunOptions;

fn write_config(dir: &Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("Pipeline.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

fn demo_config(dir: &Path) -> String {
    format!(
        r#"
        [ephemeral.scratch]
        kind = "scratch-dir"

        [repository.inputs]
        kind = "file-meta"
        basedir = "{base}/inputs"

        [repository.done]
        kind = "file-meta"
        basedir = "{base}/done"

        [quota_manager.main]
        cpu = "1"
        launches = 2

        [executor.local]
        kind = "local"
        app = "demo"
        scratch = "scratch"
        quota_manager = "main"

        [task.render]
        executor = "local"
        done = "done"
        template = ["sh", "-c", "true"]
        job_quota = {{ launches = "1" }}
        window_secs = 1

        [task.render.links.inputs]
        repo = "inputs"
        kind = "input"
        "#,
        base = dir.display()
    )
}

#[tokio::test]
async fn loads_and_validates_a_config_file() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), &demo_config(dir.path()));

    let raw = load_from_path(&path).unwrap();
    assert_eq!(raw.task.len(), 1);

    let config = load_and_validate(&path).unwrap();
    assert!(config.task.contains_key("render"));
    assert_eq!(config.task["render"].kind, "job");
    assert_eq!(config.task["render"].window_secs, 1);
}

#[tokio::test]
async fn missing_file_is_an_io_error() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let err = load_from_path(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, DatapipeError::Io(_)));
}

#[tokio::test]
async fn syntax_errors_surface_as_toml_errors() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "[task.render\nexecutor = ");
    let err = load_from_path(&path).unwrap_err();
    assert!(matches!(err, DatapipeError::Toml(_)));
}

#[tokio::test]
async fn dangling_references_fail_validation() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = demo_config(dir.path()).replace("done = \"done\"", "done = \"missing\"");
    let path = write_config(dir.path(), &config);
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, DatapipeError::Config(_)));
    assert!(err.to_string().contains("missing"));
}

#[tokio::test]
async fn config_built_pipeline_runs_to_idle() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), &demo_config(dir.path()));

    let inputs = MetadataFileRepository::new(dir.path().join("inputs"));
    inputs
        .put("a", Artifact::Metadata(serde_json::json!({})))
        .await
        .unwrap();

    let config = load_and_validate(&path).unwrap();
    let pipeline = build_pipeline(&config).unwrap();
    assert_eq!(pipeline.order(), ["render"]);
    let done = Arc::clone(&pipeline.task("render").unwrap().done);

    with_timeout(pipeline.run(RunOptions {
        exit_when_idle: true,
    }))
    .await
    .unwrap();

    let record = done.get("a").await.unwrap();
    assert_eq!(record.as_metadata().unwrap()["success"], true);
}
