// src/config/mod.rs

//! Declarative pipeline configuration: TOML model, semantic validation,
//! and construction of the runtime object graph.

pub mod build;
pub mod loader;
pub mod model;
mod validate;

pub use build::{BuildContext, Registry, ScratchDir, TaskContext, build_job_task, build_pipeline};
pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{ComponentSpec, ConfigFile, LinkSpec, RawConfigFile, TaskSpec};
