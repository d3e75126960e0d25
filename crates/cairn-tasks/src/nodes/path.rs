use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::node::{Node, NodeError, Value};
use crate::signature::Signature;
use crate::state::{relative_path, PortableId};

/// A file on disk.
///
/// Its state is the SHA-256 of the file contents, so an untouched file keeps
/// its signature when the project is checked out somewhere else.
#[derive(Debug, Clone)]
pub struct PathNode {
    name: String,
    path: PathBuf,
}

impl PathNode {
    /// A file at `path`, resolved against `root` when relative
    pub fn new(root: &Path, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            root.join(path)
        };
        Self {
            name: relative_path(&path, root),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Node for PathNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> Option<Signature> {
        match fs::read(&self.path) {
            Ok(bytes) => Some(Signature::of_bytes(bytes)),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "no state for path");
                None
            }
        }
    }

    fn load(&self, is_product: bool) -> Result<Value, NodeError> {
        if is_product {
            return Ok(Value::String(self.path.to_string_lossy().into_owned()));
        }
        fs::read_to_string(&self.path)
            .map(Value::String)
            .map_err(|e| NodeError::load(&self.name, e))
    }

    fn save(&self, value: &Value) -> Result<(), NodeError> {
        let Value::String(content) = value else {
            return Err(NodeError::save(&self.name, "only string values can be written"));
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| NodeError::save(&self.name, e))?;
        }
        fs::write(&self.path, content).map_err(|e| NodeError::save(&self.name, e))
    }

    fn portable_id(&self, root: &Path) -> PortableId {
        PortableId::for_path(&self.path, root)
    }
}
