//! Task graph construction and validation
//!
//! The graph is bipartite: an edge `node -> task` for every declared
//! dependency and `task -> node` for every declared product. Vertices live in
//! an arena with stable indices so provisional nodes can be expanded later by
//! appending vertices and re-validating only the new edges.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::node::{Node, NodeRef, ProvisionalNode};
use crate::task::{Task, TaskId};

/// The task set cannot form a valid graph
#[derive(Debug, Clone, Error)]
pub enum ResolvingDependenciesError {
    /// Dependencies form a cycle. The path alternates tasks and nodes and
    /// ends at the vertex it starts from.
    #[error("Dependency cycle detected: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// More than one task declares the same product
    #[error("Node '{node}' is produced by more than one task: {}", .tasks.join(", "))]
    DuplicateProduct { node: String, tasks: Vec<String> },

    /// Two tasks share an id
    #[error("Task id '{0}' is declared more than once")]
    DuplicateTask(TaskId),
}

/// Which side of a task a node sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Dependency,
    Product,
}

/// Concrete nodes behind one declared dependency or product
#[derive(Debug, Clone)]
pub enum Resolved {
    One(Arc<dyn Node>),
    /// A provisional node after collection
    Many(Vec<Arc<dyn Node>>),
}

impl Resolved {
    pub fn nodes(&self) -> Vec<&Arc<dyn Node>> {
        match self {
            Self::One(node) => vec![node],
            Self::Many(nodes) => nodes.iter().collect(),
        }
    }
}

#[derive(Debug)]
enum VertexKind {
    Task(usize),
    Node(NodeRef),
}

#[derive(Debug)]
struct Vertex {
    label: String,
    kind: VertexKind,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Validated, acyclic graph of tasks and nodes
#[derive(Debug, Default)]
pub struct TaskDag {
    tasks: Vec<Task>,
    vertices: Vec<Vertex>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
    /// Vertex of each task, by task index
    task_vertices: Vec<usize>,
    node_vertices: HashMap<String, usize>,
    task_lookup: HashMap<TaskId, usize>,
    /// Producing task index of each node vertex
    producers: HashMap<usize, usize>,
    expansions: HashMap<(usize, Slot, String), Vec<Arc<dyn Node>>>,
}

impl TaskDag {
    /// Build and validate the graph.
    ///
    /// Fails on the first duplicate product, then checks the complete graph
    /// for cycles.
    #[instrument(skip_all, fields(tasks = tasks.len()))]
    pub fn build(tasks: Vec<Task>) -> Result<Self, ResolvingDependenciesError> {
        let mut dag = Self::default();

        for (index, task) in tasks.iter().enumerate() {
            if dag.task_lookup.insert(task.id.clone(), index).is_some() {
                return Err(ResolvingDependenciesError::DuplicateTask(task.id.clone()));
            }

            let tv = dag.add_vertex(task.id.to_string(), VertexKind::Task(index));
            dag.task_vertices.push(tv);

            for (_, node) in &task.dependencies {
                let nv = dag.node_vertex(node);
                dag.add_edge(nv, tv);
            }

            for (_, node) in &task.products {
                let nv = dag.node_vertex(node);
                match dag.producers.get(&nv) {
                    Some(&producer) if producer != index => {
                        return Err(duplicate_product(node.name(), &tasks));
                    }
                    Some(_) => {}
                    None => {
                        dag.producers.insert(nv, index);
                    }
                }
                dag.add_edge(tv, nv);
            }
        }
        dag.tasks = tasks;

        if let Some(cycle) = dag.find_cycle(0..dag.vertices.len()) {
            return Err(dag.cycle_error(&cycle));
        }

        info!(
            tasks = dag.tasks.len(),
            nodes = dag.node_vertices.len(),
            "built task graph"
        );

        Ok(dag)
    }

    /// Attach the concrete nodes a provisional node of `task` expanded into.
    ///
    /// Only the new edges are checked for duplicate products and cycles. On
    /// error the graph is left as it was.
    #[instrument(skip(self, nodes), fields(task = %self.tasks[task].id, count = nodes.len()))]
    pub fn extend(
        &mut self,
        task: usize,
        slot: Slot,
        name: &str,
        nodes: Vec<Arc<dyn Node>>,
    ) -> Result<(), ResolvingDependenciesError> {
        if slot == Slot::Product {
            for node in &nodes {
                let producer = self
                    .node_vertices
                    .get(node.name())
                    .and_then(|nv| self.producers.get(nv));
                if let Some(&producer) = producer {
                    if producer != task {
                        return Err(ResolvingDependenciesError::DuplicateProduct {
                            node: node.name().to_string(),
                            tasks: vec![
                                self.tasks[producer].id.to_string(),
                                self.tasks[task].id.to_string(),
                            ],
                        });
                    }
                }
            }
        }

        let tv = self.task_vertices[task];
        let vertex_count = self.vertices.len();
        let mut added_edges = Vec::new();
        let mut added_producers = Vec::new();

        for node in &nodes {
            let nv = self.node_vertex(&NodeRef::Concrete(Arc::clone(node)));
            let edge = match slot {
                Slot::Dependency => (nv, tv),
                Slot::Product => {
                    if self.producers.insert(nv, task).is_none() {
                        added_producers.push(nv);
                    }
                    (tv, nv)
                }
            };
            if self.add_edge(edge.0, edge.1) {
                added_edges.push(edge);
            }
        }

        let sources: Vec<usize> = added_edges.iter().map(|(from, _)| *from).collect();
        if let Some(cycle) = self.find_cycle(sources) {
            let err = self.cycle_error(&cycle);
            for (from, to) in added_edges {
                self.outgoing[from].retain(|&v| v != to);
                self.incoming[to].retain(|&v| v != from);
            }
            for nv in added_producers {
                self.producers.remove(&nv);
            }
            self.vertices.truncate(vertex_count);
            self.outgoing.truncate(vertex_count);
            self.incoming.truncate(vertex_count);
            self.node_vertices.retain(|_, nv| *nv < vertex_count);
            return Err(err);
        }

        debug!(node = name, "expanded provisional node");
        self.expansions
            .insert((task, slot, name.to_string()), nodes);
        Ok(())
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, index: usize) -> &Task {
        &self.tasks[index]
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn index_of(&self, id: &TaskId) -> Option<usize> {
        self.task_lookup.get(id).copied()
    }

    /// Names of all node vertices, in insertion order
    pub fn node_names(&self) -> Vec<&str> {
        self.vertices
            .iter()
            .filter(|v| matches!(v.kind, VertexKind::Node(_)))
            .map(|v| v.label.as_str())
            .collect()
    }

    /// Producing task of a node
    pub fn producer_of(&self, node: &str) -> Option<usize> {
        let nv = self.node_vertices.get(node)?;
        self.producers.get(nv).copied()
    }

    /// Tasks producing a dependency of `task`
    pub fn predecessors(&self, task: usize) -> Vec<usize> {
        let tv = self.task_vertices[task];
        self.neighbour_tasks(&self.incoming[tv], &self.incoming)
    }

    /// Tasks depending on a product of `task`
    pub fn dependents(&self, task: usize) -> Vec<usize> {
        let tv = self.task_vertices[task];
        self.neighbour_tasks(&self.outgoing[tv], &self.outgoing)
    }

    /// All tasks in dependency order, declaration order among independent
    /// tasks
    pub fn topological_order(&self) -> Vec<usize> {
        let mut in_degree: Vec<usize> = (0..self.tasks.len())
            .map(|i| self.predecessors(i).len())
            .collect();
        let mut ready: BTreeSet<usize> = (0..self.tasks.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.tasks.len());

        while let Some(index) = ready.pop_first() {
            order.push(index);
            for dependent in self.dependents(index) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        order
    }

    /// Provisional nodes of `task` not expanded yet
    pub fn pending_expansions(&self, task: usize) -> Vec<(Slot, String, Arc<dyn ProvisionalNode>)> {
        let declared = &self.tasks[task];
        let slots = declared
            .dependencies
            .iter()
            .map(|entry| (Slot::Dependency, entry))
            .chain(declared.products.iter().map(|entry| (Slot::Product, entry)));

        slots
            .filter_map(|(slot, (name, node))| match node {
                NodeRef::Provisional(p)
                    if !self.expansions.contains_key(&(task, slot, name.clone())) =>
                {
                    Some((slot, name.clone(), Arc::clone(p)))
                }
                _ => None,
            })
            .collect()
    }

    /// Concrete nodes behind each declared dependency or product of `task`.
    ///
    /// Nodes are taken from the graph, so every task sharing a node name sees
    /// the same instance. Unexpanded provisional nodes resolve to nothing.
    pub fn resolved(&self, task: usize, slot: Slot) -> Vec<(String, Resolved)> {
        let declared = match slot {
            Slot::Dependency => &self.tasks[task].dependencies,
            Slot::Product => &self.tasks[task].products,
        };

        declared
            .iter()
            .map(|(name, node)| {
                let resolved = match node {
                    NodeRef::Concrete(node) => Resolved::One(self.canonical(node)),
                    NodeRef::Provisional(_) => Resolved::Many(
                        self.expansions
                            .get(&(task, slot, name.clone()))
                            .map(|nodes| nodes.iter().map(|n| self.canonical(n)).collect())
                            .unwrap_or_default(),
                    ),
                };
                (name.clone(), resolved)
            })
            .collect()
    }

    fn canonical(&self, node: &Arc<dyn Node>) -> Arc<dyn Node> {
        self.node_vertices
            .get(node.name())
            .and_then(|&nv| match &self.vertices[nv].kind {
                VertexKind::Node(NodeRef::Concrete(canonical)) => Some(Arc::clone(canonical)),
                _ => None,
            })
            .unwrap_or_else(|| Arc::clone(node))
    }

    fn neighbour_tasks(&self, nodes: &[usize], edges: &[Vec<usize>]) -> Vec<usize> {
        let found: BTreeSet<usize> = nodes
            .iter()
            .flat_map(|&nv| edges[nv].iter())
            .filter_map(|&v| match self.vertices[v].kind {
                VertexKind::Task(index) => Some(index),
                VertexKind::Node(_) => None,
            })
            .collect();
        found.into_iter().collect()
    }

    fn add_vertex(&mut self, label: String, kind: VertexKind) -> usize {
        self.vertices.push(Vertex { label, kind });
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        self.vertices.len() - 1
    }

    fn node_vertex(&mut self, node: &NodeRef) -> usize {
        if let Some(&nv) = self.node_vertices.get(node.name()) {
            return nv;
        }
        let nv = self.add_vertex(node.name().to_string(), VertexKind::Node(node.clone()));
        self.node_vertices.insert(node.name().to_string(), nv);
        nv
    }

    /// Returns false if the edge already existed
    fn add_edge(&mut self, from: usize, to: usize) -> bool {
        if self.outgoing[from].contains(&to) {
            return false;
        }
        self.outgoing[from].push(to);
        self.incoming[to].push(from);
        true
    }

    /// Depth-first search with a recursion stack, visiting `starts` in order.
    /// Returns the cycle as a vertex path closed on its first vertex.
    fn find_cycle(&self, starts: impl IntoIterator<Item = usize>) -> Option<Vec<usize>> {
        let mut color = vec![Color::White; self.vertices.len()];

        for start in starts {
            if color[start] != Color::White {
                continue;
            }
            color[start] = Color::Gray;
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];

            while let Some(frame) = stack.last_mut() {
                let vertex = frame.0;
                let Some(&next) = self.outgoing[vertex].get(frame.1) else {
                    color[vertex] = Color::Black;
                    stack.pop();
                    continue;
                };
                frame.1 += 1;

                match color[next] {
                    Color::White => {
                        color[next] = Color::Gray;
                        stack.push((next, 0));
                    }
                    Color::Gray => {
                        let position = stack.iter().position(|(v, _)| *v == next).unwrap_or(0);
                        let mut cycle: Vec<usize> = stack[position..].iter().map(|(v, _)| *v).collect();
                        cycle.push(next);
                        return Some(cycle);
                    }
                    Color::Black => {}
                }
            }
        }

        None
    }

    fn cycle_error(&self, cycle: &[usize]) -> ResolvingDependenciesError {
        ResolvingDependenciesError::Cycle {
            path: cycle
                .iter()
                .map(|&v| self.vertices[v].label.clone())
                .collect(),
        }
    }
}

fn duplicate_product(node: &str, tasks: &[Task]) -> ResolvingDependenciesError {
    let mut seen = HashSet::new();
    let producers = tasks
        .iter()
        .filter(|task| task.products.iter().any(|(_, n)| n.name() == node))
        .filter(|task| seen.insert(task.id.clone()))
        .map(|task| task.id.to_string())
        .collect();

    ResolvingDependenciesError::DuplicateProduct {
        node: node.to_string(),
        tasks: producers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{task, value, StaticProvisional};
    use crate::nodes::ValueNode;

    fn concrete(name: &str) -> Arc<dyn Node> {
        Arc::new(ValueNode::empty(name))
    }

    #[test]
    fn test_build_simple_chain() {
        let dag = TaskDag::build(vec![
            task("compile").with_product("obj", value("main.o")),
            task("link")
                .with_dependency("obj", value("main.o"))
                .with_product("bin", value("app")),
        ])
        .unwrap();

        assert_eq!(dag.len(), 2);
        assert_eq!(dag.node_names(), vec!["main.o", "app"]);
        assert_eq!(dag.predecessors(1), vec![0]);
        assert_eq!(dag.dependents(0), vec![1]);
        assert_eq!(dag.producer_of("main.o"), Some(0));
        assert_eq!(dag.topological_order(), vec![0, 1]);
    }

    #[test]
    fn test_vertex_set_is_declared_set() {
        let dag = TaskDag::build(vec![
            task("a")
                .with_dependency("in", value("src.txt"))
                .with_product("out", value("a.txt")),
            task("b")
                .with_dependency("in", value("src.txt"))
                .with_dependency("a", value("a.txt"))
                .with_product("out", value("b.txt")),
        ])
        .unwrap();

        let mut names = dag.node_names();
        names.sort();
        assert_eq!(names, vec!["a.txt", "b.txt", "src.txt"]);
        assert_eq!(dag.index_of(&TaskId::from("b")), Some(1));
    }

    #[test]
    fn test_cycle_scenario_path() {
        let err = TaskDag::build(vec![
            task("task_1")
                .with_dependency("in", value("out_2.txt"))
                .with_product("out", value("out_1.txt")),
            task("task_2")
                .with_dependency("in", value("out_1.txt"))
                .with_product("out", value("out_2.txt")),
        ])
        .unwrap_err();

        match err {
            ResolvingDependenciesError::Cycle { path } => {
                assert_eq!(path, vec!["task_1", "out_1.txt", "task_2", "out_2.txt", "task_1"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cycle_path_has_no_inner_repeats() {
        let err = TaskDag::build(vec![
            task("head").with_product("out", value("seed")),
            task("x")
                .with_dependency("seed", value("seed"))
                .with_dependency("loop", value("z_out"))
                .with_product("out", value("x_out")),
            task("y")
                .with_dependency("in", value("x_out"))
                .with_product("out", value("y_out")),
            task("z")
                .with_dependency("in", value("y_out"))
                .with_product("out", value("z_out")),
        ])
        .unwrap_err();

        let ResolvingDependenciesError::Cycle { path } = err else {
            panic!("expected a cycle");
        };
        assert_eq!(path.first(), path.last());
        let inner: HashSet<&String> = path[..path.len() - 1].iter().collect();
        assert_eq!(inner.len(), path.len() - 1);
        assert!(!path.contains(&"head".to_string()));
    }

    #[test]
    fn test_self_cycle() {
        let err = TaskDag::build(vec![task("t")
            .with_dependency("in", value("f"))
            .with_product("out", value("f"))])
        .unwrap_err();
        assert!(err.to_string().contains("t -> f -> t"));
    }

    #[test]
    fn test_duplicate_product_names_both_tasks() {
        let err = TaskDag::build(vec![
            task("task_a").with_product("out", value("out.txt")),
            task("task_b").with_product("out", value("out.txt")),
            task("task_c").with_product("out", value("other.txt")),
        ])
        .unwrap_err();

        match err {
            ResolvingDependenciesError::DuplicateProduct { node, tasks } => {
                assert_eq!(node, "out.txt");
                assert_eq!(tasks, vec!["task_a", "task_b"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_task_id() {
        let err = TaskDag::build(vec![task("a"), task("a")]).unwrap_err();
        assert!(matches!(err, ResolvingDependenciesError::DuplicateTask(_)));
    }

    #[test]
    fn test_shared_node_is_one_instance() {
        let dag = TaskDag::build(vec![
            task("a").with_product("out", value("shared")),
            task("b").with_dependency("in", value("shared")),
        ])
        .unwrap();

        let produced = &dag.resolved(0, Slot::Product)[0].1;
        let consumed = &dag.resolved(1, Slot::Dependency)[0].1;
        match (produced, consumed) {
            (Resolved::One(p), Resolved::One(c)) => assert!(Arc::ptr_eq(p, c)),
            _ => panic!("expected concrete nodes"),
        }
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let dag = TaskDag::build(vec![
            task("last").with_dependency("in", value("mid")),
            task("first").with_product("out", value("root")),
            task("middle")
                .with_dependency("in", value("root"))
                .with_product("out", value("mid")),
        ])
        .unwrap();

        assert_eq!(dag.topological_order(), vec![1, 2, 0]);
    }

    #[test]
    fn test_extend_provisional_dependency() {
        let provisional = StaticProvisional {
            name: "*.txt".to_string(),
            nodes: vec![concrete("a.txt")],
        };
        let mut dag = TaskDag::build(vec![
            task("make").with_product("out", value("a.txt")),
            task("use").with_dependency("files", NodeRef::provisional(provisional)),
        ])
        .unwrap();

        assert!(dag.predecessors(1).is_empty());
        let pending = dag.pending_expansions(1);
        assert_eq!(pending.len(), 1);

        let (slot, name, node) = &pending[0];
        let nodes = node.collect().unwrap();
        dag.extend(1, *slot, name, nodes).unwrap();

        assert_eq!(dag.predecessors(1), vec![0]);
        assert!(dag.pending_expansions(1).is_empty());
        let Resolved::Many(resolved) = &dag.resolved(1, Slot::Dependency)[0].1 else {
            panic!("expected expanded node");
        };
        assert_eq!(resolved.len(), 1);
    }

    #[test]
    fn test_extend_duplicate_product() {
        let mut dag = TaskDag::build(vec![
            task("a").with_product("out", value("x")),
            task("b").with_product(
                "outs",
                NodeRef::provisional(StaticProvisional {
                    name: "outs/*".to_string(),
                    nodes: Vec::new(),
                }),
            ),
        ])
        .unwrap();

        let err = dag
            .extend(1, Slot::Product, "outs", vec![concrete("x")])
            .unwrap_err();
        assert!(matches!(
            err,
            ResolvingDependenciesError::DuplicateProduct { ref tasks, .. } if tasks == &["a", "b"]
        ));
        assert_eq!(dag.producer_of("x"), Some(0));
    }

    #[test]
    fn test_extend_cycle_is_rolled_back() {
        let mut dag = TaskDag::build(vec![
            task("a")
                .with_dependency("in", value("y"))
                .with_product("out", value("x")),
            task("b")
                .with_dependency(
                    "more",
                    NodeRef::provisional(StaticProvisional {
                        name: "more".to_string(),
                        nodes: Vec::new(),
                    }),
                )
                .with_product("out", value("y")),
        ])
        .unwrap();

        let err = dag
            .extend(1, Slot::Dependency, "more", vec![concrete("x"), concrete("fresh")])
            .unwrap_err();
        let ResolvingDependenciesError::Cycle { path } = err else {
            panic!("expected a cycle");
        };
        assert_eq!(path, vec!["x", "b", "y", "a", "x"]);

        assert!(dag.predecessors(1).is_empty());
        assert_eq!(dag.node_names(), vec!["y", "x", "more"]);
        assert_eq!(dag.pending_expansions(1).len(), 1);
        assert_eq!(dag.topological_order().len(), 2);
    }
}
