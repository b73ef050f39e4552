// src/config/build.rs

//! Construction of the runtime object graph from a validated config.
//!
//! Each `kind` string in the config names a constructor in the
//! [`Registry`]. The builtin registry covers the shipped components;
//! embedders can register their own constructors alongside them.
//!
//! Build order matters: ephemerals first (so handles exist), then quota
//! managers, then executors (which hold quota managers and scratch
//! handles), then repositories, then tasks.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tempfile::TempDir;
use tracing::debug;

use crate::config::model::{ComponentSpec, ConfigFile, QuotaValue, TaskSpec};
use crate::errors::{DatapipeError, Result};
use crate::exec::{Executor, LocalExecutor, WorkDir};
use crate::link::Link;
use crate::quota::{Quota, QuotaManager};
use crate::repo::{FileRepository, MemoryRepository, MetadataFileRepository, Repository};
use crate::sched::Pipeline;
use crate::session::{Ephemeral, Resource, Session};
use crate::task::Task;

/// Passed to every constructor; gives access to the pieces built so far.
pub struct BuildContext<'a> {
    pub session: &'a Session,
    pub quota_managers: &'a BTreeMap<String, Arc<QuotaManager>>,
    pub config: &'a ConfigFile,
}

/// Passed to task constructors, which run after every component is built.
pub struct TaskContext<'a> {
    pub executors: &'a BTreeMap<String, Arc<dyn Executor>>,
    pub repositories: &'a BTreeMap<String, Arc<dyn Repository>>,
    pub config: &'a ConfigFile,
}

type RepositoryCtor =
    Box<dyn Fn(&BuildContext<'_>, &str, toml::Table) -> Result<Arc<dyn Repository>> + Send + Sync>;
type ExecutorCtor =
    Box<dyn Fn(&BuildContext<'_>, &str, toml::Table) -> Result<Arc<dyn Executor>> + Send + Sync>;
type EphemeralCtor = Box<dyn Fn(&str, toml::Table) -> Result<Box<dyn Ephemeral>> + Send + Sync>;
type TaskCtor = Box<dyn Fn(&TaskContext<'_>, &str, &TaskSpec) -> Result<Task> + Send + Sync>;

/// Maps `kind` strings to component constructors.
pub struct Registry {
    repositories: BTreeMap<String, RepositoryCtor>,
    executors: BTreeMap<String, ExecutorCtor>,
    ephemerals: BTreeMap<String, EphemeralCtor>,
    tasks: BTreeMap<String, TaskCtor>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            repositories: BTreeMap::new(),
            executors: BTreeMap::new(),
            ephemerals: BTreeMap::new(),
            tasks: BTreeMap::new(),
        }
    }

    /// The shipped component set.
    pub fn builtin() -> Self {
        let mut reg = Self::empty();
        reg.register_repository("memory", |_ctx, name, args| {
            let _args: MemoryArgs = parse_args("repository", name, args)?;
            Ok(Arc::new(MemoryRepository::new()))
        });
        reg.register_repository("file", |_ctx, name, args| {
            let args: FileArgs = parse_args("repository", name, args)?;
            let mut repo = FileRepository::new(args.basedir).case_insensitive(args.case_insensitive);
            if let Some(ext) = args.extension {
                repo = repo.with_extension(ext);
            }
            Ok(Arc::new(repo))
        });
        reg.register_repository("file-meta", |_ctx, name, args| {
            let args: FileArgs = parse_args("repository", name, args)?;
            let mut repo =
                MetadataFileRepository::new(args.basedir).case_insensitive(args.case_insensitive);
            if let Some(ext) = args.extension {
                repo = repo.with_extension(ext);
            }
            Ok(Arc::new(repo))
        });
        reg.register_executor("local", build_local_executor);
        reg.register_ephemeral("scratch-dir", |name, args| {
            let args: ScratchDirArgs = parse_args("ephemeral", name, args)?;
            Ok(Box::new(ScratchDir::new(args.root)))
        });
        reg.register_task("job", build_job_task);
        reg
    }

    pub fn register_repository<F>(&mut self, kind: impl Into<String>, ctor: F)
    where
        F: Fn(&BuildContext<'_>, &str, toml::Table) -> Result<Arc<dyn Repository>>
            + Send
            + Sync
            + 'static,
    {
        self.repositories.insert(kind.into(), Box::new(ctor));
    }

    pub fn register_executor<F>(&mut self, kind: impl Into<String>, ctor: F)
    where
        F: Fn(&BuildContext<'_>, &str, toml::Table) -> Result<Arc<dyn Executor>>
            + Send
            + Sync
            + 'static,
    {
        self.executors.insert(kind.into(), Box::new(ctor));
    }

    pub fn register_ephemeral<F>(&mut self, kind: impl Into<String>, ctor: F)
    where
        F: Fn(&str, toml::Table) -> Result<Box<dyn Ephemeral>> + Send + Sync + 'static,
    {
        self.ephemerals.insert(kind.into(), Box::new(ctor));
    }

    /// Task variants (e.g. a kind that wraps the default construction with
    /// extra links or different runtime defaults) plug in here, like the
    /// other three component families.
    pub fn register_task<F>(&mut self, kind: impl Into<String>, ctor: F)
    where
        F: Fn(&TaskContext<'_>, &str, &TaskSpec) -> Result<Task> + Send + Sync + 'static,
    {
        self.tasks.insert(kind.into(), Box::new(ctor));
    }

    /// Build a ready-to-run pipeline from a validated config.
    pub fn build(&self, config: &ConfigFile) -> Result<Pipeline> {
        let mut session = Session::new();
        for (name, spec) in config.ephemeral.iter() {
            let ctor = self.lookup(&self.ephemerals, "ephemeral", name, spec)?;
            let manager = ctor(name, spec.args.clone())?;
            session.register::<()>(name.clone(), manager);
            debug!(ephemeral = %name, kind = %spec.kind, "registered ephemeral");
        }

        let mut quota_managers = BTreeMap::new();
        for (name, capacity) in config.quota_manager.iter() {
            let capacity = parse_quota(&format!("[quota_manager.{name}]"), capacity)?;
            quota_managers.insert(name.clone(), QuotaManager::new(capacity));
        }

        let ctx = BuildContext {
            session: &session,
            quota_managers: &quota_managers,
            config,
        };

        let mut executors: BTreeMap<String, Arc<dyn Executor>> = BTreeMap::new();
        for (name, spec) in config.executor.iter() {
            let ctor = self.lookup(&self.executors, "executor", name, spec)?;
            executors.insert(name.clone(), ctor(&ctx, name, spec.args.clone())?);
        }

        let mut repositories: BTreeMap<String, Arc<dyn Repository>> = BTreeMap::new();
        for (name, spec) in config.repository.iter() {
            let ctor = self.lookup(&self.repositories, "repository", name, spec)?;
            repositories.insert(name.clone(), ctor(&ctx, name, spec.args.clone())?);
        }

        let task_ctx = TaskContext {
            executors: &executors,
            repositories: &repositories,
            config,
        };
        let mut tasks = Vec::with_capacity(config.task.len());
        for (name, spec) in config.task.iter() {
            let ctor = self.tasks.get(&spec.kind).ok_or_else(|| {
                DatapipeError::Config(format!("[task.{name}]: unknown kind '{}'", spec.kind))
            })?;
            tasks.push(ctor(&task_ctx, name, spec)?);
        }

        Pipeline::new(tasks, session)
    }

    fn lookup<'r, C>(
        &self,
        table: &'r BTreeMap<String, C>,
        section: &str,
        name: &str,
        spec: &ComponentSpec,
    ) -> Result<&'r C> {
        table.get(&spec.kind).ok_or_else(|| {
            DatapipeError::Config(format!(
                "[{section}.{name}]: unknown kind '{}'",
                spec.kind
            ))
        })
    }
}

/// Build a pipeline using only the builtin components.
pub fn build_pipeline(config: &ConfigFile) -> Result<Pipeline> {
    Registry::builtin().build(config)
}

/// The default `"job"` task kind: a plain one-job-per-item task. Custom
/// kinds typically call this and decorate the result.
pub fn build_job_task(ctx: &TaskContext<'_>, name: &str, spec: &TaskSpec) -> Result<Task> {
    // References were checked during validation.
    let executor = Arc::clone(&ctx.executors[&spec.executor]);
    let done = Arc::clone(&ctx.repositories[&spec.done]);

    let mut task = Task::new(name, executor, done)
        .job_quota(parse_quota(&format!("[task.{name}].job_quota"), &spec.job_quota)?)
        .template(spec.template.iter().cloned())
        .window(Duration::from_secs(spec.window_secs))
        .long_running(spec.long_running)
        .environ(spec.environ.clone());
    if let Some(secs) = spec.timeout_secs {
        task = task.timeout(Duration::from_secs(secs));
    }

    for (link_name, link_spec) in spec.links.iter() {
        let repo = Arc::clone(&ctx.repositories[&link_spec.repo]);
        let mut link = Link::new(repo, link_spec.kind.into());
        let flags = link_spec.flags();
        link.is_input = flags.is_input;
        link.is_output = flags.is_output;
        link.is_status = flags.is_status;
        link.inhibits_start = flags.inhibits_start;
        link.required_for_start = flags.required_for_start;
        link.inhibits_output = flags.inhibits_output;
        link.required_for_output = flags.required_for_output;
        link.key = link_spec.key.clone();
        link.multi_meta = link_spec.multi_meta.clone();
        task = task.link(link_name.clone(), link);
    }

    Ok(task)
}

fn parse_args<T: DeserializeOwned>(section: &str, name: &str, args: toml::Table) -> Result<T> {
    toml::Value::Table(args)
        .try_into()
        .map_err(|err| DatapipeError::Config(format!("[{section}.{name}]: {err}")))
}

fn parse_quota(section: &str, spec: &BTreeMap<String, QuotaValue>) -> Result<Quota> {
    let strings: BTreeMap<String, String> = spec
        .iter()
        .map(|(resource, value)| (resource.clone(), value.to_string()))
        .collect();
    Quota::parse_spec(&strings)
        .map_err(|err| DatapipeError::Config(format!("{section}: {err}")))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MemoryArgs {}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileArgs {
    basedir: PathBuf,
    #[serde(default)]
    extension: Option<String>,
    #[serde(default)]
    case_insensitive: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LocalArgs {
    app: String,
    /// Fixed base directory for job scratch space.
    #[serde(default)]
    workdir: Option<PathBuf>,
    /// Name of an `[ephemeral.<name>]` scratch-dir; mutually exclusive
    /// with `workdir`.
    #[serde(default)]
    scratch: Option<String>,
    quota_manager: String,
}

fn build_local_executor(
    ctx: &BuildContext<'_>,
    name: &str,
    args: toml::Table,
) -> Result<Arc<dyn Executor>> {
    let args: LocalArgs = parse_args("executor", name, args)?;
    let manager = ctx.quota_managers.get(&args.quota_manager).ok_or_else(|| {
        DatapipeError::Config(format!(
            "executor '{name}' references unknown quota manager '{}'",
            args.quota_manager
        ))
    })?;
    let workdir = match (args.workdir, args.scratch) {
        (Some(path), None) => WorkDir::Fixed(path),
        (None, Some(scratch)) => {
            if !ctx.config.ephemeral.contains_key(&scratch) {
                return Err(DatapipeError::Config(format!(
                    "executor '{name}' references unknown ephemeral '{scratch}'"
                )));
            }
            WorkDir::Ephemeral(ctx.session.handle::<PathBuf>(scratch))
        }
        _ => {
            return Err(DatapipeError::Config(format!(
                "executor '{name}' needs exactly one of 'workdir' or 'scratch'"
            )));
        }
    };
    Ok(Arc::new(LocalExecutor::new(
        args.app,
        workdir,
        Arc::clone(manager),
    )))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScratchDirArgs {
    /// Parent directory for the scratch dir; system temp when omitted.
    #[serde(default)]
    root: Option<PathBuf>,
}

/// An [`Ephemeral`] managing one temporary directory, created on session
/// open and removed on close. The live resource is its `PathBuf`.
pub struct ScratchDir {
    root: Option<PathBuf>,
    dir: Option<TempDir>,
}

impl ScratchDir {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root, dir: None }
    }
}

#[async_trait::async_trait]
impl Ephemeral for ScratchDir {
    async fn open(&mut self) -> anyhow::Result<Resource> {
        let builder = || {
            let mut b = tempfile::Builder::new();
            b.prefix("datapipe-");
            b
        };
        let dir = match &self.root {
            Some(root) => {
                tokio::fs::create_dir_all(root).await?;
                builder().tempdir_in(root)?
            }
            None => builder().tempdir()?,
        };
        let path = dir.path().to_path_buf();
        self.dir = Some(dir);
        Ok(Arc::new(path))
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        if let Some(dir) = self.dir.take() {
            dir.close()?;
        }
        Ok(())
    }
}
