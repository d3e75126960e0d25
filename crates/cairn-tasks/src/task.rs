//! Task types and definitions

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use cairn_core::Priority;

use crate::node::{NodeRef, Value};
use crate::signature::Signature;

/// Unique, stable identifier of a task
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Declarative marker attached to a task at collection time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    /// Never run the task
    Skip { reason: Option<String> },
    /// Skip the task when the condition held at collection time
    SkipIf {
        condition: bool,
        reason: Option<String>,
    },
    /// Refresh signatures without running when all products exist
    Persist,
}

/// Inputs handed to a task function
#[derive(Debug)]
pub struct TaskContext<'a> {
    pub id: &'a TaskId,
    pub root: &'a Path,
    /// Loaded dependency values by declared name
    pub dependencies: BTreeMap<String, Value>,
    /// Product locations by declared name
    pub products: BTreeMap<String, Value>,
}

impl TaskContext<'_> {
    pub fn dependency(&self, name: &str) -> Option<&Value> {
        self.dependencies.get(name)
    }

    pub fn product(&self, name: &str) -> Option<&Value> {
        self.products.get(name)
    }
}

/// Values returned by a task function, keyed by product name, saved into the
/// matching product nodes
pub type TaskOutput = BTreeMap<String, Value>;

/// Opaque task function
pub type TaskFn = Arc<dyn Fn(&TaskContext<'_>) -> anyhow::Result<TaskOutput> + Send + Sync>;

/// A unit of work with declared dependency and product nodes
#[derive(Clone)]
pub struct Task {
    pub id: TaskId,
    /// Dependencies in declaration order
    pub dependencies: Vec<(String, NodeRef)>,
    /// Products in declaration order
    pub products: Vec<(String, NodeRef)>,
    pub priority: Priority,
    pub markers: Vec<Marker>,
    /// Signature of the task's own source, e.g. a hash of its command
    pub fingerprint: Option<Signature>,
    pub function: TaskFn,
}

impl Task {
    /// Create a task around a function
    pub fn new<F>(id: impl Into<TaskId>, function: F) -> Self
    where
        F: Fn(&TaskContext<'_>) -> anyhow::Result<TaskOutput> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            products: Vec::new(),
            priority: Priority::default(),
            markers: Vec::new(),
            fingerprint: None,
            function: Arc::new(function),
        }
    }

    pub fn with_dependency(mut self, name: impl Into<String>, node: NodeRef) -> Self {
        self.dependencies.push((name.into(), node));
        self
    }

    pub fn with_product(mut self, name: impl Into<String>, node: NodeRef) -> Self {
        self.products.push((name.into(), node));
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_marker(mut self, marker: Marker) -> Self {
        self.markers.push(marker);
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: Signature) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// The task's own state, compared against the stored one to detect a
    /// changed task definition
    pub fn signature(&self) -> Signature {
        self.fingerprint
            .clone()
            .unwrap_or_else(|| Signature::of_str(self.id.as_str()))
    }

    /// Why the task is skipped by its markers, if it is
    pub fn skip_reason(&self) -> Option<String> {
        self.markers.iter().find_map(|marker| match marker {
            Marker::Skip { reason } => {
                Some(reason.clone().unwrap_or_else(|| "skip marker".to_string()))
            }
            Marker::SkipIf {
                condition: true,
                reason,
            } => Some(reason.clone().unwrap_or_else(|| "skipif condition".to_string())),
            _ => None,
        })
    }

    pub fn is_persist(&self) -> bool {
        self.markers.contains(&Marker::Persist)
    }

    /// Whether any dependency or product is resolved only at dispatch time
    pub fn has_provisional(&self) -> bool {
        self.dependencies
            .iter()
            .chain(&self.products)
            .any(|(_, node)| node.is_provisional())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("products", &self.products)
            .field("priority", &self.priority)
            .field("markers", &self.markers)
            .finish_non_exhaustive()
    }
}

/// Terminal state of a task's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Executed and produced all products
    Success,
    /// Raised an error, panicked or left a product missing
    Fail,
    /// Removed by a skip marker
    Skip,
    /// A dependency task failed
    SkippedAncestorFailed,
    /// Nothing changed since the last successful run
    SkippedUnchanged,
    /// Products already existed, signatures refreshed without running
    Persisted,
    /// Stale, but the run was a dry run
    WouldBeExecuted,
    /// Never admitted because the run was stopped
    Cancelled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Fail => "fail",
            Self::Skip => "skip",
            Self::SkippedAncestorFailed => "skipped_ancestor_failed",
            Self::SkippedUnchanged => "skipped_unchanged",
            Self::Persisted => "persisted",
            Self::WouldBeExecuted => "would_be_executed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether dependents may run after this outcome
    pub fn unblocks_dependents(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::SkippedUnchanged | Self::Persisted | Self::WouldBeExecuted | Self::Skip
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Fail)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
