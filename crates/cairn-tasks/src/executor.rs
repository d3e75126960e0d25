//! Single-task lifecycle: setup, execute, teardown
//!
//! Runs on a blocking worker. Errors and panics raised anywhere in the
//! lifecycle end up in the task's outcome and never escape [`run`].

use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::dag::{Resolved, Slot, TaskDag};
use crate::node::{Node, NodeError, NodeNotFoundError, Value};
use crate::plan::{is_unchanged, observe, tracked};
use crate::signature::Signature;
use crate::state::PortableId;
use crate::task::{Outcome, Task, TaskContext, TaskId, TaskOutput};

/// Why a task failed
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    NodeNotFound(#[from] NodeNotFoundError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("{0:#}")]
    Function(anyhow::Error),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Product '{0}' was not produced")]
    MissingProduct(String),

    #[error("Task returned a value for unknown product '{0}'")]
    UnknownProduct(String),

    #[error("Value for provisional product '{name}' must be an array of {expected} values")]
    ProvisionalProduct { name: String, expected: usize },
}

/// Everything needed to run one task away from the session loop
#[derive(Debug)]
pub struct Job {
    pub index: usize,
    pub task: Task,
    pub root: PathBuf,
    pub dependencies: Vec<(String, Resolved)>,
    pub products: Vec<(String, Resolved)>,
    /// Stored signatures of the task's tracked keys
    pub previous: HashMap<PortableId, Signature>,
    /// Skip the task when every tracked state still equals `previous`
    pub early_cutoff: bool,
    pub dry_run: bool,
}

impl Job {
    /// Job for a task with its nodes resolved from the graph
    pub fn new(dag: &TaskDag, index: usize, root: &Path) -> Self {
        Self {
            index,
            task: dag.task(index).clone(),
            root: root.to_path_buf(),
            dependencies: dag.resolved(index, Slot::Dependency),
            products: dag.resolved(index, Slot::Product),
            previous: HashMap::new(),
            early_cutoff: false,
            dry_run: false,
        }
    }

    /// Keys under which this task's signatures are stored
    pub fn tracked_ids(&self) -> Vec<PortableId> {
        tracked(&self.task, &self.dependencies, &self.products, &self.root)
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }
}

/// What happened to a job
#[derive(Debug)]
pub struct JobResult {
    pub index: usize,
    pub outcome: Outcome,
    pub message: Option<String>,
    /// Signatures to record in the state store
    pub records: Vec<(PortableId, Signature)>,
    pub duration: Duration,
}

struct Finished {
    outcome: Outcome,
    records: Vec<(PortableId, Signature)>,
}

/// Run a job to its terminal outcome
pub fn run(job: Job) -> JobResult {
    let start = Instant::now();

    let result = panic::catch_unwind(AssertUnwindSafe(|| lifecycle(&job)))
        .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload))));

    let (outcome, message, records) = match result {
        Ok(finished) => (finished.outcome, None, finished.records),
        Err(e) => {
            warn!(task = %job.task.id, error = %e, "task failed");
            (Outcome::Fail, Some(e.to_string()), Vec::new())
        }
    };

    JobResult {
        index: job.index,
        outcome,
        message,
        records,
        duration: start.elapsed(),
    }
}

fn lifecycle(job: &Job) -> Result<Finished, TaskError> {
    let task = &job.task;
    let keys = tracked(task, &job.dependencies, &job.products, &job.root);

    if job.early_cutoff && !job.dry_run {
        let observed = observe(task, &keys);
        if is_unchanged(&observed, |id| job.previous.get(id).cloned()) {
            debug!(task = %task.id, "unchanged after upstream tasks ran");
            return Ok(Finished {
                outcome: Outcome::SkippedUnchanged,
                records: Vec::new(),
            });
        }
    }

    if task.is_persist() && products_exist(&job.products) {
        debug!(task = %task.id, "products exist, refreshing signatures");
        return Ok(Finished {
            outcome: Outcome::Persisted,
            records: present(observe(task, &keys)),
        });
    }

    if job.dry_run {
        return Ok(Finished {
            outcome: Outcome::WouldBeExecuted,
            records: Vec::new(),
        });
    }

    // Setup
    let dependencies = load_dependencies(&task.id, &job.dependencies)?;
    let products = load_products(&job.products)?;
    let context = TaskContext {
        id: &task.id,
        root: &job.root,
        dependencies,
        products,
    };

    // Execute
    let output = panic::catch_unwind(AssertUnwindSafe(|| (task.function)(&context)))
        .map_err(|payload| TaskError::Panicked(panic_message(payload)))?
        .map_err(TaskError::Function)?;

    // Teardown
    save_products(&job.products, output)?;
    for (_, resolved) in &job.products {
        for node in resolved.nodes() {
            if node.state().is_none() {
                return Err(TaskError::MissingProduct(node.name().to_string()));
            }
        }
    }

    Ok(Finished {
        outcome: Outcome::Success,
        records: present(observe(task, &keys)),
    })
}

fn load_dependencies(
    task: &TaskId,
    dependencies: &[(String, Resolved)],
) -> Result<BTreeMap<String, Value>, TaskError> {
    let mut values = BTreeMap::new();
    for (name, resolved) in dependencies {
        let value = match resolved {
            Resolved::One(node) => load_dependency(task, node)?,
            Resolved::Many(nodes) => Value::Array(
                nodes
                    .iter()
                    .map(|node| load_dependency(task, node))
                    .collect::<Result<_, _>>()?,
            ),
        };
        values.insert(name.clone(), value);
    }
    Ok(values)
}

fn load_dependency(task: &TaskId, node: &Arc<dyn Node>) -> Result<Value, TaskError> {
    match node.load(false) {
        Ok(value) => Ok(value),
        Err(_) if node.state().is_none() => Err(NodeNotFoundError {
            task: task.to_string(),
            node: node.name().to_string(),
        }
        .into()),
        Err(e) => Err(e.into()),
    }
}

fn load_products(products: &[(String, Resolved)]) -> Result<BTreeMap<String, Value>, TaskError> {
    let mut values = BTreeMap::new();
    for (name, resolved) in products {
        let value = match resolved {
            Resolved::One(node) => node.load(true)?,
            Resolved::Many(nodes) => Value::Array(
                nodes
                    .iter()
                    .map(|node| node.load(true))
                    .collect::<Result<_, _>>()?,
            ),
        };
        values.insert(name.clone(), value);
    }
    Ok(values)
}

fn save_products(products: &[(String, Resolved)], output: TaskOutput) -> Result<(), TaskError> {
    for (name, value) in output {
        let Some((_, resolved)) = products.iter().find(|(product, _)| *product == name) else {
            return Err(TaskError::UnknownProduct(name));
        };

        match resolved {
            Resolved::One(node) => node.save(&value)?,
            Resolved::Many(nodes) => match value {
                Value::Array(values) if values.len() == nodes.len() => {
                    for (node, value) in nodes.iter().zip(&values) {
                        node.save(value)?;
                    }
                }
                _ => {
                    return Err(TaskError::ProvisionalProduct {
                        name,
                        expected: nodes.len(),
                    })
                }
            },
        }
    }
    Ok(())
}

fn products_exist(products: &[(String, Resolved)]) -> bool {
    products
        .iter()
        .flat_map(|(_, resolved)| resolved.nodes())
        .all(|node| node.state().is_some())
}

fn present(observed: Vec<(PortableId, Option<Signature>)>) -> Vec<(PortableId, Signature)> {
    observed
        .into_iter()
        .filter_map(|(id, state)| state.map(|state| (id, state)))
        .collect()
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Marker;
    use crate::testing::{count, counter, failing, path, task, writer};
    use std::fs;
    use tempfile::TempDir;

    fn single(task: Task) -> TaskDag {
        TaskDag::build(vec![task]).unwrap()
    }

    fn copy_task(root: &Path) -> Task {
        Task::new("copy", |ctx: &TaskContext<'_>| {
            let input = ctx.dependency("in").cloned().unwrap_or_default();
            Ok(TaskOutput::from([("out".to_string(), input)]))
        })
        .with_dependency("in", path(root, "in.txt"))
        .with_product("out", path(root, "out.txt"))
    }

    #[test]
    fn test_success_saves_and_records() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("in.txt"), "payload").unwrap();
        let dag = single(copy_task(temp.path()));

        let result = run(Job::new(&dag, 0, temp.path()));
        assert_eq!(result.outcome, Outcome::Success, "{:?}", result.message);
        assert_eq!(fs::read_to_string(temp.path().join("out.txt")).unwrap(), "payload");

        let ids: Vec<PortableId> = result.records.iter().map(|(id, _)| id.clone()).collect();
        assert_eq!(ids, Job::new(&dag, 0, temp.path()).tracked_ids());
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], PortableId::for_task("copy"));
    }

    #[test]
    fn test_missing_dependency_is_node_not_found() {
        let temp = TempDir::new().unwrap();
        let dag = single(copy_task(temp.path()));

        let result = run(Job::new(&dag, 0, temp.path()));
        assert_eq!(result.outcome, Outcome::Fail);
        assert_eq!(
            result.message.unwrap(),
            "Dependency 'in.txt' of task 'copy' does not exist"
        );
        assert!(result.records.is_empty());
    }

    #[test]
    fn test_function_error_is_captured() {
        let temp = TempDir::new().unwrap();
        let calls = counter();
        let dag = single(failing("broken", calls.clone()));

        let result = run(Job::new(&dag, 0, temp.path()));
        assert_eq!(result.outcome, Outcome::Fail);
        assert_eq!(result.message.as_deref(), Some("boom"));
        assert_eq!(count(&calls), 1);
    }

    #[test]
    fn test_panic_is_captured() {
        let temp = TempDir::new().unwrap();
        let dag = single(Task::new("panics", |_: &TaskContext<'_>| -> anyhow::Result<TaskOutput> {
            panic!("exploded")
        }));

        let result = run(Job::new(&dag, 0, temp.path()));
        assert_eq!(result.outcome, Outcome::Fail);
        assert_eq!(result.message.unwrap(), "Task panicked: exploded");
    }

    #[test]
    fn test_missing_product_fails() {
        let temp = TempDir::new().unwrap();
        let dag = single(task("lazy").with_product("out", path(temp.path(), "never.txt")));

        let result = run(Job::new(&dag, 0, temp.path()));
        assert_eq!(result.outcome, Outcome::Fail);
        assert_eq!(result.message.unwrap(), "Product 'never.txt' was not produced");
    }

    #[test]
    fn test_unknown_product_fails() {
        let temp = TempDir::new().unwrap();
        let dag = single(Task::new("extra", |_: &TaskContext<'_>| {
            Ok(TaskOutput::from([("nope".to_string(), Value::Null)]))
        }));

        let result = run(Job::new(&dag, 0, temp.path()));
        assert_eq!(result.outcome, Outcome::Fail);
        assert!(result.message.unwrap().contains("unknown product 'nope'"));
    }

    #[test]
    fn test_early_cutoff_skips_unchanged() {
        let temp = TempDir::new().unwrap();
        let calls = counter();
        let dag = single(
            writer("gen", "same", calls.clone()).with_product("out", path(temp.path(), "gen.txt")),
        );

        let first = run(Job::new(&dag, 0, temp.path()));
        assert_eq!(first.outcome, Outcome::Success);

        let mut job = Job::new(&dag, 0, temp.path());
        job.previous = first.records.into_iter().collect();
        job.early_cutoff = true;
        let second = run(job);
        assert_eq!(second.outcome, Outcome::SkippedUnchanged);
        assert_eq!(count(&calls), 1);
    }

    #[test]
    fn test_persist_with_existing_products() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("kept.txt"), "manual edit").unwrap();
        let calls = counter();
        let dag = single(
            writer("persisted", "generated", calls.clone())
                .with_marker(Marker::Persist)
                .with_product("out", path(temp.path(), "kept.txt")),
        );

        let result = run(Job::new(&dag, 0, temp.path()));
        assert_eq!(result.outcome, Outcome::Persisted);
        assert_eq!(result.records.len(), 2);
        assert_eq!(count(&calls), 0);
        assert_eq!(fs::read_to_string(temp.path().join("kept.txt")).unwrap(), "manual edit");
    }

    #[test]
    fn test_persist_runs_when_product_missing() {
        let temp = TempDir::new().unwrap();
        let calls = counter();
        let dag = single(
            writer("persisted", "generated", calls.clone())
                .with_marker(Marker::Persist)
                .with_product("out", path(temp.path(), "kept.txt")),
        );

        assert_eq!(run(Job::new(&dag, 0, temp.path())).outcome, Outcome::Success);
        assert_eq!(count(&calls), 1);
    }

    #[test]
    fn test_dry_run_does_not_execute() {
        let temp = TempDir::new().unwrap();
        let calls = counter();
        let dag = single(
            writer("gen", "x", calls.clone()).with_product("out", path(temp.path(), "gen.txt")),
        );

        let mut job = Job::new(&dag, 0, temp.path());
        job.dry_run = true;
        job.early_cutoff = true;
        let result = run(job);
        assert_eq!(result.outcome, Outcome::WouldBeExecuted);
        assert!(result.records.is_empty());
        assert_eq!(count(&calls), 0);
        assert!(!temp.path().join("gen.txt").exists());
    }
}
