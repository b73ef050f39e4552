// src/lib.rs

//! datapipe: a repository-driven task pipeline.
//!
//! Tasks discover work items in repositories, launch one job per item
//! through an executor under quota-gated admission, and publish terminal
//! records once their output links allow it. The scheduler ticks tasks in
//! dataflow order until the pipeline is idle (or forever, for services).
//!
//! The crate splits into:
//!
//! - [`repo`]: keyed artifact stores (the data plane).
//! - [`quota`]: resource vectors and the admission-controlling manager.
//! - [`exec`]: job lifecycle backends.
//! - [`link`]: task/repository edges and readiness evaluation.
//! - [`session`]: ephemeral resources with two-phase open/close.
//! - [`task`] and [`sched`]: the units of work and the tick loop.
//! - [`config`]: the declarative TOML surface over all of the above.

// Unit tests share `FakeExecutor` with the integration suite, but the
// `cfg(test)` library is a distinct crate from the one `datapipe-test-utils`
// links, so its trait impls would not unify here. Compile the same source
// file into the test build instead, aliasing `self` so its `use datapipe::…`
// imports resolve to this build.
#[cfg(test)]
extern crate self as datapipe;

#[cfg(test)]
#[path = "../crates/test-utils/src/fake_executor.rs"]
mod fake_executor;

pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod link;
pub mod logging;
pub mod quota;
pub mod repo;
pub mod sched;
pub mod session;
pub mod task;

pub use errors::{DatapipeError, Result};

use tracing::info;

/// Binary entry point: load config, build the pipeline, run it.
pub async fn run(args: cli::CliArgs) -> anyhow::Result<()> {
    let config = config::load_and_validate(&args.config)?;
    let pipeline = config::build_pipeline(&config)?;

    if args.dry_run {
        print_plan(&pipeline);
        return Ok(());
    }

    info!(config = %args.config, tasks = pipeline.order().len(), "starting pipeline");
    let opts = sched::RunOptions {
        exit_when_idle: args.once,
    };
    pipeline.run(opts).await?;
    Ok(())
}

/// `--dry-run`: print the validated plan without launching anything.
fn print_plan(pipeline: &sched::Pipeline) {
    println!("pipeline plan ({} tasks):", pipeline.order().len());
    for name in pipeline.order() {
        let Some(task) = pipeline.task(name) else {
            continue;
        };
        println!("  {name}  [{}]", task.executor.app());
        for (link_name, link) in task.links.iter() {
            println!("    link {link_name}: {:?}", link.kind);
        }
        if !task.job_quota.is_empty() {
            println!("    job quota: {}", task.job_quota);
        }
    }
}
