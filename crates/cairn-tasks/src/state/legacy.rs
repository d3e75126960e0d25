use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::signature::Signature;

use super::portable::PortableId;
use super::store::StateError;

/// Read-only signature database from an older state format.
///
/// Consulted only while no lockfile exists.
pub trait LegacyStore: Send + Sync {
    fn get(&self, id: &PortableId) -> Option<Signature>;
}

/// Legacy database stored as a flat JSON object of id to signature
#[derive(Debug, Default)]
pub struct JsonLegacyStore {
    entries: HashMap<String, Signature>,
}

impl JsonLegacyStore {
    pub fn open(path: &Path) -> Result<Self, StateError> {
        let text = fs::read_to_string(path).map_err(|e| StateError::io(path, e))?;
        let entries = serde_json::from_str(&text)
            .map_err(|e| StateError::Legacy(format!("{}: {}", path.display(), e)))?;
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LegacyStore for JsonLegacyStore {
    fn get(&self, id: &PortableId) -> Option<Signature> {
        self.entries.get(id.as_str()).cloned()
    }
}

/// In-memory legacy database
#[derive(Debug, Default)]
pub struct MemoryLegacyStore {
    entries: HashMap<PortableId, Signature>,
}

impl MemoryLegacyStore {
    pub fn insert(&mut self, id: PortableId, signature: Signature) {
        self.entries.insert(id, signature);
    }
}

impl FromIterator<(PortableId, Signature)> for MemoryLegacyStore {
    fn from_iter<I: IntoIterator<Item = (PortableId, Signature)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl LegacyStore for MemoryLegacyStore {
    fn get(&self, id: &PortableId) -> Option<Signature> {
        self.entries.get(id).cloned()
    }
}
