//! Fixtures shared by unit tests

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::node::{Node, NodeError, NodeRef, ProvisionalNode, Value};
use crate::nodes::{PathNode, ValueNode};
use crate::task::{Task, TaskContext, TaskOutput};

/// Provisional node that expands into a fixed list
#[derive(Debug)]
pub struct StaticProvisional {
    pub name: String,
    pub nodes: Vec<Arc<dyn Node>>,
}

impl ProvisionalNode for StaticProvisional {
    fn name(&self) -> &str {
        &self.name
    }

    fn collect(&self) -> Result<Vec<Arc<dyn Node>>, NodeError> {
        Ok(self.nodes.clone())
    }
}

pub fn noop(_: &TaskContext<'_>) -> anyhow::Result<TaskOutput> {
    Ok(TaskOutput::new())
}

pub fn value(name: &str) -> NodeRef {
    NodeRef::node(ValueNode::empty(name))
}

pub fn path(root: &Path, rel: &str) -> NodeRef {
    NodeRef::node(PathNode::new(root, rel))
}

pub fn task(id: &str) -> Task {
    Task::new(id, noop)
}

/// Task that writes `content` into each of its products and counts its calls
pub fn writer(id: &str, content: &str, calls: Arc<AtomicUsize>) -> Task {
    let content = content.to_string();
    Task::new(id, move |ctx: &TaskContext<'_>| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(ctx
            .products
            .keys()
            .map(|name| (name.clone(), Value::String(content.clone())))
            .collect())
    })
}

/// Task that always fails and counts its calls
pub fn failing(id: &str, calls: Arc<AtomicUsize>) -> Task {
    Task::new(id, move |_: &TaskContext<'_>| {
        calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("boom")
    })
}

pub fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

pub fn count(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Task copying its `in` dependency into its `out` product
pub fn copier(id: &str, root: &Path, from: &str, to: &str, calls: Arc<AtomicUsize>) -> Task {
    Task::new(id, move |ctx: &TaskContext<'_>| {
        calls.fetch_add(1, Ordering::SeqCst);
        let input = ctx.dependency("in").cloned().unwrap_or_default();
        Ok(TaskOutput::from([("out".to_string(), input)]))
    })
    .with_dependency("in", path(root, from))
    .with_product("out", path(root, to))
}
