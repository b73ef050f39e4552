// src/config/model.rs

//! Declarative pipeline configuration as read from a TOML file.
//!
//! ```toml
//! [ephemeral.scratch]
//! kind = "scratch-dir"
//!
//! [repository.inputs]
//! kind = "file"
//! basedir = "data/inputs"
//!
//! [repository.done]
//! kind = "file-meta"
//! basedir = "data/done"
//!
//! [quota_manager.main]
//! cpu = "4"
//! mem = "4Gi"
//! launches = "16"
//!
//! [executor.local]
//! kind = "local"
//! app = "demo"
//! scratch = "scratch"
//! quota_manager = "main"
//!
//! [task.render]
//! executor = "local"
//! done = "done"
//! template = ["sh", "-c", "process {job}"]
//! job_quota = { cpu = "500m", mem = "128Mi", launches = "1" }
//!
//! [task.render.links.inputs]
//! repo = "inputs"
//! kind = "input"
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::link::LinkKind;

/// Top-level configuration, deserialized but not yet validated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub ephemeral: BTreeMap<String, ComponentSpec>,

    #[serde(default)]
    pub repository: BTreeMap<String, ComponentSpec>,

    /// Capacity vectors; values are human-readable quota strings.
    #[serde(default)]
    pub quota_manager: BTreeMap<String, BTreeMap<String, QuotaValue>>,

    #[serde(default)]
    pub executor: BTreeMap<String, ComponentSpec>,

    #[serde(default)]
    pub task: BTreeMap<String, TaskSpec>,
}

/// A pluggable component: a `kind` naming the registered constructor plus
/// that constructor's own keys.
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentSpec {
    pub kind: String,
    #[serde(flatten)]
    pub args: toml::Table,
}

/// Quota values can be written as strings (`"500m"`, `"1Gi"`) or bare
/// numbers (`launches = 10`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum QuotaValue {
    Str(String),
    Int(i64),
    Float(f64),
}

impl fmt::Display for QuotaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaValue::Str(s) => f.write_str(s),
            QuotaValue::Int(n) => write!(f, "{n}"),
            QuotaValue::Float(x) => write!(f, "{x}"),
        }
    }
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSpec {
    /// Task construction kind, dispatched through the registry. The
    /// default `"job"` kind builds a plain one-job-per-item task.
    #[serde(default = "default_task_kind")]
    pub kind: String,

    /// Name of an `[executor.<name>]` entry.
    pub executor: String,

    /// Name of a `[repository.<name>]` entry holding terminal records.
    pub done: String,

    #[serde(default)]
    pub job_quota: BTreeMap<String, QuotaValue>,

    /// Job argv template; `{task}` and `{job}` are substituted per job.
    #[serde(default)]
    pub template: Vec<String>,

    /// Poll interval in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Max job duration in seconds; omitted means no timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub long_running: bool,

    #[serde(default)]
    pub environ: BTreeMap<String, String>,

    #[serde(default)]
    pub links: BTreeMap<String, LinkSpec>,
}

fn default_window_secs() -> u64 {
    5
}

fn default_task_kind() -> String {
    "job".to_string()
}

/// `[task.<name>.links.<linkname>]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkSpec {
    /// Name of a `[repository.<name>]` entry.
    pub repo: String,

    pub kind: LinkKindSpec,

    #[serde(default)]
    pub key: Option<String>,

    #[serde(default)]
    pub multi_meta: Option<String>,

    // Flag overrides; when omitted, the kind's defaults apply.
    #[serde(default)]
    pub is_input: Option<bool>,
    #[serde(default)]
    pub is_output: Option<bool>,
    #[serde(default)]
    pub is_status: Option<bool>,
    #[serde(default)]
    pub inhibits_start: Option<bool>,
    #[serde(default)]
    pub required_for_start: Option<bool>,
    #[serde(default)]
    pub inhibits_output: Option<bool>,
    #[serde(default)]
    pub required_for_output: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKindSpec {
    Input,
    Output,
    Status,
}

impl From<LinkKindSpec> for LinkKind {
    fn from(kind: LinkKindSpec) -> Self {
        match kind {
            LinkKindSpec::Input => LinkKind::Input,
            LinkKindSpec::Output => LinkKind::Output,
            LinkKindSpec::Status => LinkKind::StatusArtifact,
        }
    }
}

/// The effective flags of a link spec, with kind defaults applied.
#[derive(Debug, Clone, Copy)]
pub struct LinkFlags {
    pub is_input: bool,
    pub is_output: bool,
    pub is_status: bool,
    pub inhibits_start: bool,
    pub required_for_start: bool,
    pub inhibits_output: bool,
    pub required_for_output: bool,
}

impl LinkFlags {
    const NONE: LinkFlags = LinkFlags {
        is_input: false,
        is_output: false,
        is_status: false,
        inhibits_start: false,
        required_for_start: false,
        inhibits_output: false,
        required_for_output: false,
    };
}

impl LinkSpec {
    pub fn flags(&self) -> LinkFlags {
        let defaults = match self.kind {
            LinkKindSpec::Input => LinkFlags {
                is_input: true,
                required_for_start: true,
                ..LinkFlags::NONE
            },
            LinkKindSpec::Output => LinkFlags {
                is_output: true,
                inhibits_start: true,
                ..LinkFlags::NONE
            },
            LinkKindSpec::Status => LinkFlags {
                is_status: true,
                ..LinkFlags::NONE
            },
        };
        LinkFlags {
            is_input: self.is_input.unwrap_or(defaults.is_input),
            is_output: self.is_output.unwrap_or(defaults.is_output),
            is_status: self.is_status.unwrap_or(defaults.is_status),
            inhibits_start: self.inhibits_start.unwrap_or(defaults.inhibits_start),
            required_for_start: self
                .required_for_start
                .unwrap_or(defaults.required_for_start),
            inhibits_output: self.inhibits_output.unwrap_or(defaults.inhibits_output),
            required_for_output: self
                .required_for_output
                .unwrap_or(defaults.required_for_output),
        }
    }
}

/// Validated configuration. Construct via `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub ephemeral: BTreeMap<String, ComponentSpec>,
    pub repository: BTreeMap<String, ComponentSpec>,
    pub quota_manager: BTreeMap<String, BTreeMap<String, QuotaValue>>,
    pub executor: BTreeMap<String, ComponentSpec>,
    pub task: BTreeMap<String, TaskSpec>,
}

impl ConfigFile {
    /// Used by validation once all checks have passed.
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            ephemeral: raw.ephemeral,
            repository: raw.repository,
            quota_manager: raw.quota_manager,
            executor: raw.executor,
            task: raw.task,
        }
    }
}
