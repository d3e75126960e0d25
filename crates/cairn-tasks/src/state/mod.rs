//! Persisted signatures
//!
//! Signatures live in a TOML lockfile snapshot plus an append-only JSON-lines
//! journal next to it. Records go to the journal first; the snapshot is
//! rewritten atomically on flush and every `compaction_interval` records,
//! after which the journal is dropped.

mod journal;
mod legacy;
mod lockfile;
mod portable;
mod store;

pub use journal::{Journal, JournalEntry};
pub use legacy::{JsonLegacyStore, LegacyStore, MemoryLegacyStore};
pub use lockfile::{Lockfile, LockfileError, LOCKFILE_SCHEMA_VERSION};
pub use portable::{normalize, relative_path, PortableId, PortableIdError};
pub use store::{StateError, StateOptions, StateSource, StateStore};
