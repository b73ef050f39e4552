// tests/session_lifecycle.rs
//
// Session lifecycle against the real scratch-dir ephemeral.

mod common;
use crate::common::init_tracing;

use std::path::PathBuf;

use datapipe::config::ScratchDir;
use datapipe::session::{Session, SessionError};

#[tokio::test]
async fn handles_resolve_only_while_open() {
    init_tracing();
    let mut session = Session::new();
    let handle = session.register::<PathBuf>("scratch", Box::new(ScratchDir::new(None)));

    assert!(matches!(handle.get(), Err(SessionError::NotOpen)));

    session.open().await.unwrap();
    let path = handle.get().unwrap();
    assert!(path.is_dir());

    session.close().await;
    assert!(!path.is_dir());
    assert!(matches!(handle.get(), Err(SessionError::NotOpen)));
}

#[tokio::test]
async fn sessions_open_at_most_once() {
    init_tracing();
    let mut session = Session::new();
    session.register::<PathBuf>("scratch", Box::new(ScratchDir::new(None)));
    session.open().await.unwrap();
    assert!(matches!(
        session.open().await,
        Err(SessionError::AlreadyOpen)
    ));
    session.close().await;
    assert!(matches!(
        session.open().await,
        Err(SessionError::AlreadyOpen)
    ));
}

#[tokio::test]
async fn scratch_root_is_respected() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let mut session = Session::new();
    let handle = session.register::<PathBuf>(
        "scratch",
        Box::new(ScratchDir::new(Some(root.path().to_path_buf()))),
    );
    session.open().await.unwrap();
    let path = handle.get().unwrap();
    assert!(path.starts_with(root.path()));
    session.close().await;
}

#[tokio::test]
async fn mismatched_handle_types_are_reported() {
    init_tracing();
    let mut session = Session::new();
    session.register::<PathBuf>("scratch", Box::new(ScratchDir::new(None)));
    let wrong = session.handle::<u64>("scratch");
    session.open().await.unwrap();
    assert!(matches!(
        wrong.get(),
        Err(SessionError::TypeMismatch(_))
    ));
    session.close().await;
}
