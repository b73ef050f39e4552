// src/sched/mod.rs

//! Scheduling: deterministic task ordering and the pipeline tick loop.
//!
//! The tick order is computed once at build time from the inter-task
//! dataflow graph (an output link of task A feeding an input link of task B
//! makes A precede B) and is stable across ticks, so quota contention is
//! resolved fairly: no task is starved by always being evaluated last.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::errors::{DatapipeError, Result};
use crate::task::Task;

pub mod pipeline;

pub use pipeline::{Pipeline, RunOptions};

/// Thin address of a repository object, for identity comparisons across
/// tasks sharing the same store.
fn repo_addr(repo: &Arc<dyn crate::repo::Repository>) -> usize {
    Arc::as_ptr(repo) as *const () as usize
}

/// Deterministic evaluation order: topological over the link dataflow
/// graph, ties broken by task name.
pub(crate) fn order_tasks(tasks: &BTreeMap<String, Task>) -> Result<Vec<String>> {
    // repository -> producing / consuming task names
    let mut producers: BTreeMap<usize, BTreeSet<&str>> = BTreeMap::new();
    let mut consumers: BTreeMap<usize, BTreeSet<&str>> = BTreeMap::new();
    for (name, task) in tasks {
        for link in task.links.values() {
            let addr = repo_addr(&link.repo);
            if link.is_output || link.is_status {
                producers.entry(addr).or_default().insert(name.as_str());
            }
            if link.is_input || link.required_for_start {
                consumers.entry(addr).or_default().insert(name.as_str());
            }
        }
        producers
            .entry(repo_addr(&task.done))
            .or_default()
            .insert(name.as_str());
    }

    let mut edges: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut indegree: BTreeMap<&str, usize> = tasks.keys().map(|n| (n.as_str(), 0)).collect();
    for (addr, from_tasks) in &producers {
        let Some(to_tasks) = consumers.get(addr) else {
            continue;
        };
        for &from in from_tasks {
            for &to in to_tasks {
                if from == to {
                    continue;
                }
                if edges.entry(from).or_default().insert(to) {
                    *indegree.get_mut(to).expect("task known") += 1;
                }
            }
        }
    }

    // Kahn's algorithm with a name-ordered ready set.
    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();
    let mut order = Vec::with_capacity(tasks.len());
    while let Some(name) = ready.pop_first() {
        order.push(name.to_string());
        if let Some(next) = edges.get(name) {
            for to in next {
                let d = indegree.get_mut(to).expect("task known");
                *d -= 1;
                if *d == 0 {
                    ready.insert(to);
                }
            }
        }
    }

    if order.len() != tasks.len() {
        let stuck: Vec<&str> = indegree
            .iter()
            .filter(|(_, d)| **d > 0)
            .map(|(n, _)| *n)
            .collect();
        return Err(DatapipeError::Config(format!(
            "cycle detected in the link dataflow graph involving tasks {stuck:?}"
        )));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{Link, LinkKind};
    use crate::repo::MemoryRepository;
    use crate::fake_executor::FakeExecutor;

    fn task_with(
        name: &str,
        input: Option<Arc<MemoryRepository>>,
        output: Option<Arc<MemoryRepository>>,
    ) -> Task {
        let exec = Arc::new(FakeExecutor::new("app"));
        let done = Arc::new(MemoryRepository::new());
        let mut task = Task::new(name, exec, done);
        if let Some(repo) = input {
            task = task.link("input", Link::new(repo, LinkKind::Input));
        }
        if let Some(repo) = output {
            task = task.link("output", Link::new(repo, LinkKind::Output));
        }
        task
    }

    #[test]
    fn dataflow_orders_producers_before_consumers() {
        let shared = Arc::new(MemoryRepository::new());
        let tasks: BTreeMap<String, Task> = [
            task_with("zeta_producer", None, Some(shared.clone())),
            task_with("alpha_consumer", Some(shared), None),
        ]
        .into_iter()
        .map(|t| (t.name.clone(), t))
        .collect();

        let order = order_tasks(&tasks).unwrap();
        assert_eq!(order, vec!["zeta_producer", "alpha_consumer"]);
    }

    #[test]
    fn unrelated_tasks_order_by_name() {
        let tasks: BTreeMap<String, Task> = [
            task_with("charlie", None, None),
            task_with("alpha", None, None),
            task_with("bravo", None, None),
        ]
        .into_iter()
        .map(|t| (t.name.clone(), t))
        .collect();

        assert_eq!(order_tasks(&tasks).unwrap(), vec!["alpha", "bravo", "charlie"]);
    }

    #[test]
    fn dataflow_cycles_are_rejected() {
        let ab = Arc::new(MemoryRepository::new());
        let ba = Arc::new(MemoryRepository::new());
        let tasks: BTreeMap<String, Task> = [
            task_with("a", Some(ba.clone()), Some(ab.clone())),
            task_with("b", Some(ab), Some(ba)),
        ]
        .into_iter()
        .map(|t| (t.name.clone(), t))
        .collect();

        let err = order_tasks(&tasks).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }
}
