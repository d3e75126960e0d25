//! Content signatures

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opaque, comparable representation of a node's or task's observed state.
///
/// Signatures are derived from content only (never timestamps or absolute
/// paths), so the same content produces the same signature on any machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    /// Wrap an already computed signature string
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// SHA-256 of raw bytes
    pub fn of_bytes(bytes: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes.as_ref());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// SHA-256 of a string
    pub fn of_str(text: &str) -> Self {
        Self::of_bytes(text.as_bytes())
    }

    /// SHA-256 of the canonical JSON encoding of a value.
    ///
    /// `serde_json` keeps object keys sorted (no `preserve_order` feature), so
    /// equal values always encode identically.
    pub fn of_json(value: &serde_json::Value) -> Self {
        Self::of_str(&value.to_string())
    }

    /// The signature as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
