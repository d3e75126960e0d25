use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signature::Signature;

use super::portable::PortableId;

/// Schema version written by this build
pub const LOCKFILE_SCHEMA_VERSION: u64 = 1;

/// Persisted state that cannot be decoded
#[derive(Debug, Clone, Error)]
pub enum LockfileError {
    /// Not a structurally valid lockfile
    #[error("Invalid lockfile: {0}")]
    Parse(String),

    /// Written by an incompatible version
    #[error("Unsupported lockfile schema version {found} (expected {expected})")]
    UnsupportedVersion { found: i64, expected: u64 },

    #[error("Failed to encode lockfile: {0}")]
    Encode(String),
}

/// Snapshot of all recorded signatures
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lockfile {
    pub entries: BTreeMap<PortableId, Signature>,
}

#[derive(Serialize)]
struct Encoded<'a> {
    schema_version: u64,
    entries: &'a BTreeMap<PortableId, Signature>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Decoded {
    #[allow(dead_code)]
    schema_version: i64,
    #[serde(default)]
    entries: BTreeMap<String, Signature>,
}

impl Lockfile {
    /// Decode a lockfile document.
    ///
    /// The schema version is checked before anything else is interpreted.
    pub fn decode(text: &str) -> Result<Self, LockfileError> {
        let table: toml::Table = text
            .parse()
            .map_err(|e: toml::de::Error| LockfileError::Parse(e.message().to_string()))?;

        let version = match table.get("schema_version") {
            Some(toml::Value::Integer(version)) => *version,
            Some(_) => return Err(LockfileError::Parse("schema_version must be an integer".into())),
            None => return Err(LockfileError::Parse("missing schema_version".into())),
        };
        if version != LOCKFILE_SCHEMA_VERSION as i64 {
            return Err(LockfileError::UnsupportedVersion {
                found: version,
                expected: LOCKFILE_SCHEMA_VERSION,
            });
        }

        let decoded: Decoded = toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| LockfileError::Parse(e.message().to_string()))?;

        let mut entries = BTreeMap::new();
        for (id, signature) in decoded.entries {
            let id = PortableId::parse(id).map_err(|e| LockfileError::Parse(e.to_string()))?;
            entries.insert(id, signature);
        }

        Ok(Self { entries })
    }

    pub fn encode(&self) -> Result<String, LockfileError> {
        toml::to_string_pretty(&Encoded {
            schema_version: LOCKFILE_SCHEMA_VERSION,
            entries: &self.entries,
        })
        .map_err(|e| LockfileError::Encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn sample() -> Lockfile {
        let mut lockfile = Lockfile::default();
        lockfile.entries.insert(PortableId::for_task("compile"), Signature::of_str("cc"));
        lockfile.entries.insert(
            PortableId::for_path(Path::new("/r/src/a b.c"), Path::new("/r")),
            Signature::of_str("int main;"),
        );
        lockfile
    }

    #[test]
    fn test_encode_decode() {
        let lockfile = sample();
        let text = lockfile.encode().unwrap();
        assert!(text.contains("schema_version = 1"));
        assert_eq!(Lockfile::decode(&text).unwrap(), lockfile);
    }

    #[test]
    fn test_empty_entries() {
        let lockfile = Lockfile::decode("schema_version = 1\n").unwrap();
        assert!(lockfile.entries.is_empty());
    }

    #[test]
    fn test_future_version_rejected() {
        let text = sample().encode().unwrap().replace("schema_version = 1", "schema_version = 2");
        let err = Lockfile::decode(&text).unwrap_err();
        assert!(matches!(err, LockfileError::UnsupportedVersion { found: 2, expected: 1 }));
    }

    #[test]
    fn test_garbage_is_lockfile_error() {
        assert!(matches!(Lockfile::decode("{{{ not toml"), Err(LockfileError::Parse(_))));
        assert!(matches!(Lockfile::decode("entries = {}"), Err(LockfileError::Parse(_))));
        assert!(matches!(
            Lockfile::decode("schema_version = \"one\""),
            Err(LockfileError::Parse(_))
        ));
    }

    #[test]
    fn test_malformed_entries_rejected() {
        let text = "schema_version = 1\n[entries]\n\"9:short\" = \"abc\"\n";
        assert!(matches!(Lockfile::decode(text), Err(LockfileError::Parse(_))));

        let text = "schema_version = 1\n[entries]\n\"4:task1:a\" = 5\n";
        assert!(matches!(Lockfile::decode(text), Err(LockfileError::Parse(_))));

        let text = "schema_version = 1\nextra = true\n";
        assert!(matches!(Lockfile::decode(text), Err(LockfileError::Parse(_))));
    }
}
