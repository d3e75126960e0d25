//! Node protocol
//!
//! A node is an addressable dependency or product of a task. Concrete nodes
//! implement [`Node`]; nodes whose concrete members are only known right
//! before a task runs implement [`ProvisionalNode`].

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::signature::Signature;
use crate::state::PortableId;

/// Value exchanged between nodes and task functions
pub type Value = serde_json::Value;

/// Errors raised by node implementations
#[derive(Debug, Error)]
pub enum NodeError {
    /// A required dependency does not exist
    #[error(transparent)]
    NotFound(#[from] NodeNotFoundError),

    /// The node cannot be written to
    #[error("Node '{0}' is immutable")]
    Immutable(String),

    /// Loading the node's value failed
    #[error("Failed to load node '{name}': {message}")]
    Load { name: String, message: String },

    /// Saving a value into the node failed
    #[error("Failed to save node '{name}': {message}")]
    Save { name: String, message: String },

    /// Expanding a provisional node failed
    #[error("Failed to collect provisional node '{name}': {message}")]
    Collect { name: String, message: String },
}

impl NodeError {
    pub fn load(name: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Load {
            name: name.into(),
            message: message.to_string(),
        }
    }

    pub fn save(name: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Save {
            name: name.into(),
            message: message.to_string(),
        }
    }

    pub fn collect(name: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Collect {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

/// A dependency of a task has no state and cannot be loaded
#[derive(Debug, Clone, Error)]
#[error("Dependency '{node}' of task '{task}' does not exist")]
pub struct NodeNotFoundError {
    pub task: String,
    pub node: String,
}

/// A concrete dependency or product.
///
/// Two nodes with the same [`name`](Node::name) are the same vertex of the
/// graph.
pub trait Node: Send + Sync + fmt::Debug {
    /// Unique name within the graph
    fn name(&self) -> &str;

    /// Current state, `None` when the node does not exist
    fn state(&self) -> Option<Signature>;

    /// Value handed to the task function.
    ///
    /// Products are loaded with `is_product = true`, which lets a node hand
    /// out a location to write to instead of its current content.
    fn load(&self, is_product: bool) -> Result<Value, NodeError>;

    /// Store a value returned by a task function
    fn save(&self, _value: &Value) -> Result<(), NodeError> {
        Err(NodeError::Immutable(self.name().to_string()))
    }

    /// Machine-independent key under which the node's signature is persisted
    fn portable_id(&self, _root: &Path) -> PortableId {
        PortableId::for_name("node", self.name())
    }
}

/// A node that expands into concrete nodes right before a task touching it
/// is dispatched.
pub trait ProvisionalNode: Send + Sync + fmt::Debug {
    /// Declared identity, used until the node is collected
    fn name(&self) -> &str;

    /// Resolve into concrete nodes
    fn collect(&self) -> Result<Vec<Arc<dyn Node>>, NodeError>;
}

/// Reference from a task to one of its nodes
#[derive(Clone)]
pub enum NodeRef {
    Concrete(Arc<dyn Node>),
    Provisional(Arc<dyn ProvisionalNode>),
}

impl NodeRef {
    /// Wrap a concrete node
    pub fn node(node: impl Node + 'static) -> Self {
        Self::Concrete(Arc::new(node))
    }

    /// Wrap a provisional node
    pub fn provisional(node: impl ProvisionalNode + 'static) -> Self {
        Self::Provisional(Arc::new(node))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Concrete(node) => node.name(),
            Self::Provisional(node) => node.name(),
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional(_))
    }

    /// The concrete node, if this is one
    pub fn as_concrete(&self) -> Option<&Arc<dyn Node>> {
        match self {
            Self::Concrete(node) => Some(node),
            Self::Provisional(_) => None,
        }
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concrete(node) => f.debug_tuple("Concrete").field(&node.name()).finish(),
            Self::Provisional(node) => f.debug_tuple("Provisional").field(&node.name()).finish(),
        }
    }
}
