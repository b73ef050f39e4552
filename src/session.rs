// src/session.rs

//! Ephemeral resource sessions.
//!
//! A [`Session`] is a registry of named [`Ephemeral`] managers, each a
//! two-phase open/close object producing one live resource (an open client,
//! a scratch directory, a remote shell). Registration hands back a
//! [`Handle`] — a cheap lookup accessor that can be passed to repositories
//! and executors long before the session opens, with the promise that it is
//! not dereferenced until then.
//!
//! A session opens at most once. Close tears every resource down; a manager
//! that fails to close is a reported warning, not a fatal error.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

/// A live resource, type-erased; handles downcast on access.
pub type Resource = Arc<dyn Any + Send + Sync>;

/// A single-use manager for one live resource.
#[async_trait]
pub trait Ephemeral: Send {
    async fn open(&mut self) -> anyhow::Result<Resource>;
    async fn close(&mut self) -> anyhow::Result<()>;
}

#[derive(Error, Debug)]
pub enum SessionError {
    /// A handle was dereferenced before `open()` (or after `close()`).
    #[error("session is not open")]
    NotOpen,

    /// Sessions cannot be opened more than once.
    #[error("session has already been opened")]
    AlreadyOpen,

    /// The resource behind a handle is not of the handle's type.
    #[error("ephemeral {0:?} has an unexpected type")]
    TypeMismatch(String),

    #[error("ephemeral {name:?} failed to open: {source}")]
    OpenFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    New,
    Open,
    Closed,
}

type LiveTable = Arc<Mutex<HashMap<String, Resource>>>;

/// Accessor for a live resource; valid only while the session is open.
pub struct Handle<T> {
    name: String,
    live: LiveTable,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            live: Arc::clone(&self.live),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle").field("name", &self.name).finish()
    }
}

impl<T: Send + Sync + 'static> Handle<T> {
    /// Look up the live resource. Fails with [`SessionError::NotOpen`]
    /// until the owning session has been opened.
    pub fn get(&self) -> Result<Arc<T>, SessionError> {
        let live = self.live.lock().unwrap();
        let resource = live.get(&self.name).ok_or(SessionError::NotOpen)?;
        Arc::clone(resource)
            .downcast::<T>()
            .map_err(|_| SessionError::TypeMismatch(self.name.clone()))
    }
}

/// Process-wide registry of named ephemeral resources.
pub struct Session {
    managers: Vec<(String, Box<dyn Ephemeral>)>,
    live: LiveTable,
    state: SessionState,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &format_args!("{:?}", self.state))
            .field(
                "managers",
                &self.managers.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            managers: Vec::new(),
            live: Arc::new(Mutex::new(HashMap::new())),
            state: SessionState::New,
        }
    }

    /// Record a manager without invoking it; returns the accessor handle.
    pub fn register<T: Send + Sync + 'static>(
        &mut self,
        name: impl Into<String>,
        manager: Box<dyn Ephemeral>,
    ) -> Handle<T> {
        let name = name.into();
        self.managers.push((name.clone(), manager));
        self.handle(name)
    }

    /// A handle for a named resource, typed by the caller. The type is
    /// checked at `get()` time, matching the dynamically-typed nature of
    /// backend clients.
    pub fn handle<T: Send + Sync + 'static>(&self, name: impl Into<String>) -> Handle<T> {
        Handle {
            name: name.into(),
            live: Arc::clone(&self.live),
            _marker: PhantomData,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Drive every registered manager to its live resource.
    ///
    /// If a manager fails, the already-opened ones are closed best-effort
    /// before the error is returned.
    pub async fn open(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::New {
            return Err(SessionError::AlreadyOpen);
        }

        for index in 0..self.managers.len() {
            let (name, manager) = &mut self.managers[index];
            let name = name.clone();
            match manager.open().await {
                Ok(resource) => {
                    debug!(name = %name, "ephemeral resource opened");
                    self.live.lock().unwrap().insert(name, resource);
                }
                Err(source) => {
                    self.teardown(index).await;
                    return Err(SessionError::OpenFailed { name, source });
                }
            }
        }

        self.state = SessionState::Open;
        Ok(())
    }

    /// Tear down every resource. Individual close failures are warnings.
    pub async fn close(&mut self) {
        if self.state != SessionState::Open {
            self.state = SessionState::Closed;
            return;
        }
        let count = self.managers.len();
        self.teardown(count).await;
        self.state = SessionState::Closed;
    }

    /// Close the first `count` managers and clear their live entries.
    async fn teardown(&mut self, count: usize) {
        for (name, manager) in self.managers.iter_mut().take(count) {
            if let Err(err) = manager.close().await {
                warn!(name = %name, error = %err, "ephemeral resource failed to close");
            }
            self.live.lock().unwrap().remove(name.as_str());
        }
        self.live.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counted {
        opens: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        value: u32,
    }

    #[async_trait]
    impl Ephemeral for Counted {
        async fn open(&mut self) -> anyhow::Result<Resource> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(self.value))
        }

        async fn close(&mut self) -> anyhow::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counted(value: u32) -> (Box<dyn Ephemeral>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        (
            Box::new(Counted {
                opens: Arc::clone(&opens),
                closes: Arc::clone(&closes),
                value,
            }),
            opens,
            closes,
        )
    }

    #[tokio::test]
    async fn handle_is_valid_only_while_open() {
        let mut session = Session::new();
        let (mgr, opens, closes) = counted(7);
        let handle: Handle<u32> = session.register("seven", mgr);

        assert!(matches!(handle.get(), Err(SessionError::NotOpen)));
        assert_eq!(opens.load(Ordering::SeqCst), 0);

        session.open().await.unwrap();
        assert_eq!(*handle.get().unwrap(), 7);
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        session.close().await;
        assert!(matches!(handle.get(), Err(SessionError::NotOpen)));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_twice_fails() {
        let mut session = Session::new();
        session.open().await.unwrap();
        assert!(matches!(session.open().await, Err(SessionError::AlreadyOpen)));
    }

    #[tokio::test]
    async fn wrong_handle_type_is_reported() {
        let mut session = Session::new();
        let (mgr, _, _) = counted(7);
        session.register::<u32>("seven", mgr);
        let wrong: Handle<String> = session.handle("seven");

        session.open().await.unwrap();
        assert!(matches!(wrong.get(), Err(SessionError::TypeMismatch(_))));
    }

    #[tokio::test]
    async fn failed_open_tears_down_earlier_resources() {
        struct Boom;
        #[async_trait]
        impl Ephemeral for Boom {
            async fn open(&mut self) -> anyhow::Result<Resource> {
                Err(anyhow::anyhow!("no connection"))
            }
            async fn close(&mut self) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let mut session = Session::new();
        let (ok_mgr, _, closes) = counted(1);
        let ok: Handle<u32> = session.register("ok", ok_mgr);
        session.register::<u32>("boom", Box::new(Boom));

        match session.open().await {
            Err(SessionError::OpenFailed { name, .. }) => assert_eq!(name, "boom"),
            other => panic!("expected OpenFailed, got {other:?}"),
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(matches!(ok.get(), Err(SessionError::NotOpen)));
    }
}
