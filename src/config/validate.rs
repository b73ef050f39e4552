// src/config/validate.rs

//! Semantic validation of a raw configuration.

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{DatapipeError, Result};
use crate::quota;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = DatapipeError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_quota_strings(cfg)?;
    validate_references(cfg)?;
    validate_dataflow(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(DatapipeError::Config(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_quota_strings(cfg: &RawConfigFile) -> Result<()> {
    for (name, capacity) in cfg.quota_manager.iter() {
        for (resource, value) in capacity.iter() {
            quota::parse_amount(resource, &value.to_string()).map_err(|err| {
                DatapipeError::Config(format!("[quota_manager.{name}]: {err}"))
            })?;
        }
    }
    for (name, task) in cfg.task.iter() {
        for (resource, value) in task.job_quota.iter() {
            quota::parse_amount(resource, &value.to_string()).map_err(|err| {
                DatapipeError::Config(format!("[task.{name}].job_quota: {err}"))
            })?;
        }
    }
    Ok(())
}

fn validate_references(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        if !cfg.executor.contains_key(&task.executor) {
            return Err(DatapipeError::Config(format!(
                "task '{}' references unknown executor '{}'",
                name, task.executor
            )));
        }
        if !cfg.repository.contains_key(&task.done) {
            return Err(DatapipeError::Config(format!(
                "task '{}' references unknown done repository '{}'",
                name, task.done
            )));
        }
        for (link_name, link) in task.links.iter() {
            if !cfg.repository.contains_key(&link.repo) {
                return Err(DatapipeError::Config(format!(
                    "task '{}' link '{}' references unknown repository '{}'",
                    name, link_name, link.repo
                )));
            }
        }
    }
    Ok(())
}

/// Reject cycles in the inter-task dataflow graph.
///
/// Edge direction: producer -> consumer. Task A producing into repository R
/// (an output or status link, or its `done` repository) precedes any task B
/// consuming R (an input or required-for-start link).
fn validate_dataflow(cfg: &RawConfigFile) -> Result<()> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }

    for (producer, ptask) in cfg.task.iter() {
        for (consumer, ctask) in cfg.task.iter() {
            if producer == consumer {
                continue;
            }
            let feeds = ctask.links.values().any(|clink| {
                let cflags = clink.flags();
                if !(cflags.is_input || cflags.required_for_start) {
                    return false;
                }
                clink.repo == ptask.done
                    || ptask.links.values().any(|plink| {
                        let pflags = plink.flags();
                        (pflags.is_output || pflags.is_status) && plink.repo == clink.repo
                    })
            });
            if feeds {
                graph.add_edge(producer.as_str(), consumer.as_str(), ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(DatapipeError::Config(format!(
                "cycle detected in the link dataflow graph involving task '{}'",
                node
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<ConfigFile> {
        let raw: RawConfigFile = toml::from_str(toml_str).unwrap();
        ConfigFile::try_from(raw)
    }

    const BASE: &str = r#"
        [repository.inputs]
        kind = "memory"

        [repository.done]
        kind = "memory"

        [executor.local]
        kind = "local"
        app = "demo"
        workdir = "/tmp/demo"
        quota_manager = "main"

        [quota_manager.main]
        cpu = "2"
        launches = 4

        [task.render]
        executor = "local"
        done = "done"
        template = ["true"]

        [task.render.links.inputs]
        repo = "inputs"
        kind = "input"
    "#;

    #[test]
    fn accepts_a_well_formed_config() {
        let cfg = parse(BASE).unwrap();
        assert_eq!(cfg.task.len(), 1);
        assert!(cfg.task["render"].links.contains_key("inputs"));
    }

    #[test]
    fn rejects_empty_task_set() {
        let err = parse("[repository.r]\nkind = \"memory\"").unwrap_err();
        assert!(err.to_string().contains("at least one"));
    }

    #[test]
    fn rejects_unknown_repository_reference() {
        let cfg = BASE.replace("repo = \"inputs\"", "repo = \"nope\"");
        let err = parse(&cfg).unwrap_err();
        assert!(err.to_string().contains("unknown repository 'nope'"));
    }

    #[test]
    fn rejects_unknown_executor_reference() {
        let cfg = BASE.replace("executor = \"local\"", "executor = \"ghost\"");
        let err = parse(&cfg).unwrap_err();
        assert!(err.to_string().contains("unknown executor 'ghost'"));
    }

    #[test]
    fn rejects_malformed_quota_strings() {
        let cfg = BASE.replace("cpu = \"2\"", "cpu = \"plenty\"");
        let err = parse(&cfg).unwrap_err();
        assert!(err.to_string().contains("quota_manager.main"));
    }

    #[test]
    fn rejects_dataflow_cycles() {
        let cfg = format!(
            "{BASE}\n{}",
            r#"
            [repository.mid]
            kind = "memory"
            [repository.done2]
            kind = "memory"

            [task.render.links.out]
            repo = "mid"
            kind = "output"

            [task.back]
            executor = "local"
            done = "done2"
            template = ["true"]

            [task.back.links.inputs]
            repo = "mid"
            kind = "input"

            [task.back.links.out]
            repo = "inputs"
            kind = "output"
            "#
        );
        let err = parse(&cfg).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }
}
