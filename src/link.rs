// src/link.rs

//! Typed, flagged edges between a task and a repository, and the readiness
//! predicates derived from them.
//!
//! The four predicates (start/output x ready/blocked) are independent,
//! composable gates: a task can wait on upstream artifacts, skip ids
//! flagged as permanently failed, and withhold publishing results until
//! auxiliary validation artifacts exist.

use std::sync::Arc;

use crate::repo::{Repository, RepositoryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Input,
    Output,
    StatusArtifact,
}

/// A (task, repository) edge with gating semantics.
///
/// Constructing a link from its kind seeds the conventional flags; each one
/// can be overridden independently afterwards.
#[derive(Debug, Clone)]
pub struct Link {
    pub repo: Arc<dyn Repository>,
    pub kind: LinkKind,
    /// Fixed lookup key overriding the job id for this link's repository.
    pub key: Option<String>,
    /// Grouping name for batch metadata reporting.
    pub multi_meta: Option<String>,
    pub is_input: bool,
    pub is_output: bool,
    pub is_status: bool,
    pub inhibits_start: bool,
    pub required_for_start: bool,
    pub inhibits_output: bool,
    pub required_for_output: bool,
}

impl Link {
    pub fn new(repo: Arc<dyn Repository>, kind: LinkKind) -> Self {
        let mut link = Self {
            repo,
            kind,
            key: None,
            multi_meta: None,
            is_input: false,
            is_output: false,
            is_status: false,
            inhibits_start: false,
            required_for_start: false,
            inhibits_output: false,
            required_for_output: false,
        };
        match kind {
            LinkKind::Input => {
                link.is_input = true;
                link.required_for_start = true;
            }
            LinkKind::Output => {
                link.is_output = true;
                link.inhibits_start = true;
            }
            LinkKind::StatusArtifact => {
                link.is_status = true;
            }
        }
        link
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// The id used against this link's repository: the fixed key if set,
    /// otherwise the job id.
    pub fn lookup_id<'a>(&'a self, job: &'a str) -> &'a str {
        self.key.as_deref().unwrap_or(job)
    }

    pub async fn contains(&self, job: &str) -> Result<bool, RepositoryError> {
        self.repo.contains(self.lookup_id(job)).await
    }
}

/// The four gate predicates for one candidate job id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub start_ready: bool,
    pub start_blocked: bool,
    pub output_ready: bool,
    pub output_blocked: bool,
}

impl Readiness {
    /// Eligible to start (the `done` check is the caller's concern).
    pub fn can_start(&self) -> bool {
        self.start_ready && !self.start_blocked
    }

    /// Eligible to have its output published.
    pub fn can_publish(&self) -> bool {
        self.output_ready && !self.output_blocked
    }
}

/// Evaluate the gate predicates for `job` over a task's links.
///
/// `*_ready` predicates are vacuously true when no link declares the
/// corresponding requirement.
pub async fn evaluate<'a, I>(links: I, job: &str) -> Result<Readiness, RepositoryError>
where
    I: IntoIterator<Item = &'a Link>,
{
    let mut readiness = Readiness {
        start_ready: true,
        start_blocked: false,
        output_ready: true,
        output_blocked: false,
    };

    for link in links {
        let relevant = link.inhibits_start
            || link.required_for_start
            || link.inhibits_output
            || link.required_for_output;
        if !relevant {
            continue;
        }
        let present = link.contains(job).await?;

        if link.inhibits_start && present {
            readiness.start_blocked = true;
        }
        if link.required_for_start && !present {
            readiness.start_ready = false;
        }
        if link.inhibits_output && present {
            readiness.output_blocked = true;
        }
        if link.required_for_output && !present {
            readiness.output_ready = false;
        }
    }

    Ok(readiness)
}
