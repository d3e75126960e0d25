//! Configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::Priority;

/// Main configuration for cairn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Version of the config schema
    #[serde(rename = "$schema")]
    pub schema: Option<String>,

    /// Project name
    pub name: Option<String>,

    /// Execution engine configuration
    pub engine: EngineConfig,

    /// Persisted state configuration
    pub state: StateConfig,

    /// Task declarations
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// Execution engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of tasks executed at the same time
    pub concurrency: usize,

    /// Stop admitting new tasks after this many failures
    pub max_failures: Option<usize>,

    /// Execute every task regardless of persisted state
    pub force: bool,

    /// Report what would run without executing anything
    pub dry_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_failures: None,
            force: false,
            dry_run: false,
        }
    }
}

/// Persisted state configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Directory holding the lockfile and its journal, relative to the project root
    pub dir: PathBuf,

    /// Lockfile name inside `dir`
    pub lockfile: String,

    /// Number of journal entries after which the lockfile snapshot is rewritten
    pub compaction_interval: usize,

    /// Read-only legacy signature database consulted when no lockfile exists
    pub legacy_database: Option<PathBuf>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".cairn"),
            lockfile: "cairn.lock".to_string(),
            compaction_interval: 64,
            legacy_database: None,
        }
    }
}

impl StateConfig {
    /// Path of the lockfile relative to the project root
    pub fn lockfile_path(&self) -> PathBuf {
        self.dir.join(&self.lockfile)
    }
}

/// A task declared in the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Stable task identifier
    pub id: String,

    /// Shell command to execute
    pub command: String,

    /// Files the task reads
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Glob patterns expanded to files right before the task runs
    #[serde(default)]
    pub depends_on_glob: Vec<String>,

    /// Files the task writes
    #[serde(default)]
    pub produces: Vec<String>,

    /// Scheduling hint
    #[serde(default)]
    pub priority: Priority,

    /// Never run this task
    #[serde(default)]
    pub skip: bool,

    /// Skip when this environment variable is set to a non-empty value
    pub skip_if_env: Option<String>,

    /// Reason reported for skipped tasks
    pub skip_reason: Option<String>,

    /// Refresh signatures without running when all products already exist
    #[serde(default)]
    pub persist: bool,
}

impl TaskConfig {
    /// Create a new task declaration
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            ..Default::default()
        }
    }

    /// Add a file dependency
    pub fn with_depends_on(mut self, path: impl Into<String>) -> Self {
        self.depends_on.push(path.into());
        self
    }

    /// Add a product
    pub fn with_produces(mut self, path: impl Into<String>) -> Self {
        self.produces.push(path.into());
        self
    }

    /// Whether the `skip_if_env` condition currently holds
    pub fn skip_condition(&self) -> bool {
        self.skip_if_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .is_some_and(|value| !value.is_empty())
    }
}
