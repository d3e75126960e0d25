//! Staleness planning
//!
//! Decides, before anything runs, which tasks are skipped by markers, which
//! are unchanged since the last run and which have to be executed.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::dag::{Resolved, Slot, TaskDag};
use crate::node::Node;
use crate::signature::Signature;
use crate::state::{PortableId, StateStore};
use crate::task::Task;

/// What the session does with a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Run,
    Unchanged,
    Skip(String),
}

/// One decision per task, by task index
#[derive(Debug, Clone)]
pub struct Plan {
    decisions: Vec<Decision>,
}

impl Plan {
    pub fn from_decisions(decisions: Vec<Decision>) -> Self {
        Self { decisions }
    }

    pub fn decision(&self, index: usize) -> &Decision {
        &self.decisions[index]
    }

    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    pub fn stale_count(&self) -> usize {
        self.decisions
            .iter()
            .filter(|d| **d == Decision::Run)
            .count()
    }
}

/// A persisted key of a task and the node it observes, `None` for the task
/// itself
pub(crate) type Tracked = (PortableId, Option<Arc<dyn Node>>);

/// Every key under which a task's state is persisted.
///
/// Node keys are scoped by the task so that each task compares against the
/// node state it last saw itself.
pub(crate) fn tracked(
    task: &Task,
    dependencies: &[(String, Resolved)],
    products: &[(String, Resolved)],
    root: &Path,
) -> Vec<Tracked> {
    let task_id = PortableId::for_task(task.id.as_str());
    let mut keys: Vec<Tracked> = vec![(task_id.clone(), None)];

    for (_, resolved) in dependencies.iter().chain(products) {
        for node in resolved.nodes() {
            let id = PortableId::scoped(&task_id, &node.portable_id(root));
            keys.push((id, Some(Arc::clone(node))));
        }
    }
    keys
}

/// Current state behind each tracked key
pub(crate) fn observe(task: &Task, keys: &[Tracked]) -> Vec<(PortableId, Option<Signature>)> {
    keys.iter()
        .map(|(id, node)| {
            let state = match node {
                Some(node) => node.state(),
                None => Some(task.signature()),
            };
            (id.clone(), state)
        })
        .collect()
}

/// Whether every observed state exists and equals its stored signature
pub(crate) fn is_unchanged<F>(observed: &[(PortableId, Option<Signature>)], stored: F) -> bool
where
    F: Fn(&PortableId) -> Option<Signature>,
{
    observed.iter().all(|(id, state)| match state {
        Some(state) => stored(id).as_ref() == Some(state),
        None => false,
    })
}

/// Decide what happens to every task.
///
/// Markers are applied first: a skipped task takes all its descendants with
/// it. A remaining task is stale when `force` is set, when it has
/// provisional nodes, when any tracked state differs from the store, or when
/// a task it depends on is stale.
#[instrument(skip_all, fields(tasks = dag.len(), force = force))]
pub fn plan(dag: &TaskDag, store: &StateStore, root: &Path, force: bool) -> Plan {
    let mut decisions = vec![Decision::Unchanged; dag.len()];

    for index in dag.topological_order() {
        let task = dag.task(index);
        let predecessors = dag.predecessors(index);

        if let Some(reason) = task.skip_reason() {
            debug!(task = %task.id, %reason, "skipped by marker");
            decisions[index] = Decision::Skip(reason);
            continue;
        }

        if let Some(&skipped) = predecessors
            .iter()
            .find(|&&p| matches!(decisions[p], Decision::Skip(_)))
        {
            decisions[index] = Decision::Skip(format!("ancestor '{}' skipped", dag.task(skipped).id));
            continue;
        }

        let stale = if force {
            true
        } else if task.has_provisional() {
            debug!(task = %task.id, "stale: provisional nodes");
            true
        } else if let Some(&p) = predecessors.iter().find(|&&p| decisions[p] == Decision::Run) {
            debug!(task = %task.id, upstream = %dag.task(p).id, "stale: upstream task runs");
            true
        } else {
            let keys = tracked(
                task,
                &dag.resolved(index, Slot::Dependency),
                &dag.resolved(index, Slot::Product),
                root,
            );
            let changed = !is_unchanged(&observe(task, &keys), |id| store.get(id));
            if changed {
                debug!(task = %task.id, "stale: state changed");
            }
            changed
        };

        if stale {
            decisions[index] = Decision::Run;
        }
    }

    let plan = Plan { decisions };
    info!(stale = plan.stale_count(), "planned run");
    plan
}
