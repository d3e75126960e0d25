use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::node::{Node, NodeError, ProvisionalNode};

use super::PathNode;

/// Every file matching a glob pattern, resolved when the task is dispatched
#[derive(Debug, Clone)]
pub struct GlobNode {
    pattern: String,
    root: PathBuf,
}

impl GlobNode {
    /// A pattern relative to `root`
    pub fn new(root: &Path, pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            root: root.to_path_buf(),
        }
    }
}

impl ProvisionalNode for GlobNode {
    fn name(&self) -> &str {
        &self.pattern
    }

    fn collect(&self) -> Result<Vec<Arc<dyn Node>>, NodeError> {
        let full = self.root.join(&self.pattern);
        let full = full.to_string_lossy();

        let mut paths = Vec::new();
        for entry in glob::glob(&full).map_err(|e| NodeError::collect(&self.pattern, e))? {
            let path = entry.map_err(|e| NodeError::collect(&self.pattern, e))?;
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        debug!(pattern = %self.pattern, matches = paths.len(), "collected glob");

        Ok(paths
            .into_iter()
            .map(|path| Arc::new(PathNode::new(&self.root, path)) as Arc<dyn Node>)
            .collect())
    }
}
