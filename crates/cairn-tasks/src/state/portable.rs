//! Machine-independent identifiers for persisted signatures

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Project-root-relative, machine-independent key of a lockfile entry.
///
/// An id is a tuple of string segments encoded as `<byte length>:<segment>`
/// for each segment, concatenated. Decoding reads a decimal length up to the
/// first `:` and then exactly that many bytes, so every encoded string parses
/// back to exactly one tuple. Distinct tuples therefore never share an id,
/// including tuples with empty segments or segments that contain `:` or
/// digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortableId(String);

impl PortableId {
    /// Encode a tuple of segments
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut encoded = String::new();
        for segment in segments {
            let segment = segment.as_ref();
            encoded.push_str(&segment.len().to_string());
            encoded.push(':');
            encoded.push_str(segment);
        }
        Self(encoded)
    }

    /// Id of a task
    pub fn for_task(task_id: &str) -> Self {
        Self::from_segments(["task", task_id])
    }

    /// Id of a file, relative to the project root
    pub fn for_path(path: &Path, root: &Path) -> Self {
        Self::from_segments(["path", relative_path(path, root).as_str()])
    }

    /// Id of a named, non-file node
    pub fn for_name(kind: &str, name: &str) -> Self {
        Self::from_segments([kind, name])
    }

    /// Id of `inner` as seen by `owner`.
    ///
    /// Both ids are embedded as whole segments, so the result is injective in
    /// the pair.
    pub fn scoped(owner: &PortableId, inner: &PortableId) -> Self {
        Self::from_segments([owner.as_str(), inner.as_str()])
    }

    /// Rebuild an id from its encoded form, checking that it decodes
    pub fn parse(encoded: impl Into<String>) -> Result<Self, PortableIdError> {
        let id = Self(encoded.into());
        id.segments()?;
        Ok(id)
    }

    /// Decode back into segments
    pub fn segments(&self) -> Result<Vec<String>, PortableIdError> {
        let mut rest = self.0.as_str();
        let mut segments = Vec::new();

        while !rest.is_empty() {
            let colon = rest
                .find(':')
                .ok_or_else(|| PortableIdError::new(&self.0, "missing length delimiter"))?;
            let digits = &rest[..colon];
            let canonical = digits.bytes().all(|b| b.is_ascii_digit())
                && !(digits.len() > 1 && digits.starts_with('0'));
            if !canonical {
                return Err(PortableIdError::new(&self.0, "non-canonical segment length"));
            }
            let len: usize = digits
                .parse()
                .map_err(|_| PortableIdError::new(&self.0, "invalid segment length"))?;
            let body = &rest[colon + 1..];
            let segment = body
                .get(..len)
                .ok_or_else(|| PortableIdError::new(&self.0, "segment shorter than its length"))?;
            segments.push(segment.to_string());
            rest = &body[len..];
        }

        Ok(segments)
    }

    /// The encoded id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Malformed encoded id
#[derive(Debug, Clone, thiserror::Error)]
#[error("Malformed portable id '{id}': {reason}")]
pub struct PortableIdError {
    pub id: String,
    pub reason: &'static str,
}

impl PortableIdError {
    fn new(id: &str, reason: &'static str) -> Self {
        Self {
            id: id.to_string(),
            reason,
        }
    }
}

/// Resolve `.` and `..` components without touching the filesystem
pub fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }

    out.iter().map(|c| c.as_os_str()).collect()
}

/// Path of `path` relative to `root`, `/`-separated.
///
/// Relative inputs are taken as already relative to `root`. Paths outside the
/// root keep leading `..` segments.
pub fn relative_path(path: &Path, root: &Path) -> String {
    let path = normalize(path);
    if path.is_relative() {
        return join_components(&path);
    }

    let root = normalize(root);
    let path_components: Vec<_> = path.components().collect();
    let root_components: Vec<_> = root.components().collect();

    let common = path_components
        .iter()
        .zip(root_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    // Different filesystem prefix (e.g. another drive): nothing to share.
    if common == 0 {
        return join_components(&path);
    }

    let mut parts: Vec<String> = Vec::new();
    for _ in common..root_components.len() {
        parts.push("..".to_string());
    }
    for component in &path_components[common..] {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

fn join_components(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}
