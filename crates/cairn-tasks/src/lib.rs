//! Cairn Tasks - Incremental build engine
//!
//! Tasks declare the nodes they depend on and the nodes they produce. The
//! engine links them into a graph, decides which tasks are stale by comparing
//! node signatures with the persisted lockfile, and executes the stale ones
//! in priority order on a pool of blocking workers.
//!
//! ```no_run
//! use std::path::Path;
//! use cairn_tasks::{NodeRef, PathNode, Session, SessionOptions, Task, TaskOutput, TaskReporterRegistry};
//!
//! let root = Path::new(".");
//! let task = Task::new("copy", |ctx: &cairn_tasks::TaskContext<'_>| {
//!     let input = ctx.dependency("in").cloned().unwrap_or_default();
//!     Ok(TaskOutput::from([("out".to_string(), input)]))
//! })
//! .with_dependency("in", NodeRef::node(PathNode::new(root, "in.txt")))
//! .with_product("out", NodeRef::node(PathNode::new(root, "out.txt")));
//!
//! let session = Session::new(SessionOptions::new(root), TaskReporterRegistry::new());
//! let result = session.run_blocking(vec![task]).unwrap();
//! println!("{}", result.status);
//! ```

pub mod command;
pub mod dag;
pub mod executor;
pub mod node;
pub mod nodes;
pub mod plan;
pub mod report;
pub mod reporter;
pub mod scheduler;
pub mod session;
pub mod signature;
pub mod state;
pub mod task;

#[cfg(test)]
mod testing;

pub use command::{shell_task, task_from_config, tasks_from_config};
pub use dag::{ResolvingDependenciesError, TaskDag};
pub use executor::TaskError;
pub use node::{Node, NodeError, NodeNotFoundError, NodeRef, ProvisionalNode, Value};
pub use nodes::{GlobNode, PathNode, ValueNode};
pub use plan::{plan, Decision, Plan};
pub use report::{RunStatus, RunSummary, TaskReport};
pub use reporter::{
    ChannelReporter, CollectingReporter, TaskEvent, TaskReporter, TaskReporterRegistry,
    TracingReporter,
};
pub use scheduler::{schedule_order, Scheduler};
pub use session::{CancelHandle, ExecutionError, RunResult, Session, SessionError, SessionOptions};
pub use signature::Signature;
pub use state::{PortableId, StateError, StateOptions, StateStore};
pub use task::{Marker, Outcome, Task, TaskContext, TaskId, TaskOutput};
