use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use cairn_core::StateConfig;

use crate::signature::Signature;

use super::journal::{Journal, JournalEntry};
use super::legacy::{JsonLegacyStore, LegacyStore};
use super::lockfile::{Lockfile, LockfileError};
use super::portable::PortableId;

/// Errors from the state store that cannot be recovered locally
#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Lockfile(#[from] LockfileError),

    #[error("State I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid legacy database: {0}")]
    Legacy(String),
}

impl StateError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Where the state store locates its files
#[derive(Debug, Clone)]
pub struct StateOptions {
    /// Lockfile location; the journal sits next to it
    pub lockfile: PathBuf,
    /// Journal records after which the lockfile is rewritten
    pub compaction_interval: usize,
    /// Read-only legacy database consulted when no lockfile exists
    pub legacy_database: Option<PathBuf>,
}

impl StateOptions {
    pub fn new(lockfile: impl Into<PathBuf>) -> Self {
        Self {
            lockfile: lockfile.into(),
            compaction_interval: 64,
            legacy_database: None,
        }
    }

    /// Resolve configured paths against the project root
    pub fn from_config(config: &StateConfig, root: &Path) -> Self {
        Self {
            lockfile: root.join(config.lockfile_path()),
            compaction_interval: config.compaction_interval.max(1),
            legacy_database: config.legacy_database.as_ref().map(|p| root.join(p)),
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        let mut name = self
            .lockfile
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".journal");
        self.lockfile.with_file_name(name)
    }
}

/// Where the signatures of this session came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSource {
    /// An existing lockfile
    Lockfile,
    /// No lockfile, falling back to the legacy database
    Legacy,
    /// No prior state
    Fresh,
    /// The lockfile could not be decoded; everything counts as changed
    Recovered,
}

/// Signatures keyed by portable id.
///
/// The session loop is the only writer.
pub struct StateStore {
    lockfile_path: PathBuf,
    journal: Journal,
    compaction_interval: usize,
    entries: BTreeMap<PortableId, Signature>,
    legacy: Option<Box<dyn LegacyStore>>,
    source: StateSource,
    recovered: Option<LockfileError>,
    unflushed: usize,
    dirty: bool,
}

impl StateStore {
    /// Load state, opening the configured legacy database if needed
    pub fn load(options: &StateOptions) -> Result<Self, StateError> {
        let legacy = match &options.legacy_database {
            Some(path) if !options.lockfile.exists() && path.exists() => {
                let store = JsonLegacyStore::open(path)?;
                info!(path = %path.display(), entries = store.len(), "using legacy state database");
                Some(Box::new(store) as Box<dyn LegacyStore>)
            }
            _ => None,
        };
        Self::load_with_legacy(options, legacy)
    }

    /// Load state with an explicit legacy fallback.
    ///
    /// A lockfile that cannot be decoded is not an error: the store starts
    /// empty and the decoding error is kept for [`take_recovered`](Self::take_recovered).
    pub fn load_with_legacy(
        options: &StateOptions,
        legacy: Option<Box<dyn LegacyStore>>,
    ) -> Result<Self, StateError> {
        let mut store = Self {
            lockfile_path: options.lockfile.clone(),
            journal: Journal::new(options.journal_path()),
            compaction_interval: options.compaction_interval.max(1),
            entries: BTreeMap::new(),
            legacy: None,
            source: StateSource::Fresh,
            recovered: None,
            unflushed: 0,
            dirty: false,
        };

        match read_lockfile(&options.lockfile)? {
            Some(Ok(lockfile)) => {
                debug!(entries = lockfile.entries.len(), "loaded lockfile");
                store.entries = lockfile.entries;
                store.source = StateSource::Lockfile;
            }
            Some(Err(e)) => {
                warn!(path = %options.lockfile.display(), error = %e, "discarding unreadable lockfile");
                store.source = StateSource::Recovered;
                store.recovered = Some(e);
                store.dirty = true;
                return Ok(store);
            }
            None if legacy.is_some() => {
                store.legacy = legacy;
                store.source = StateSource::Legacy;
            }
            None => {}
        }

        let replayed = store
            .journal
            .recover()
            .map_err(|e| StateError::io(store.journal.path(), e))?;
        if !replayed.is_empty() {
            info!(entries = replayed.len(), "replaying state journal");
            store.dirty = true;
            for entry in replayed {
                store.entries.insert(entry.id, entry.signature);
            }
        }

        Ok(store)
    }

    /// Stored signature, falling back to the legacy database
    pub fn get(&self, id: &PortableId) -> Option<Signature> {
        self.entries
            .get(id)
            .cloned()
            .or_else(|| self.legacy.as_ref().and_then(|legacy| legacy.get(id)))
    }

    /// Record a signature, journaling it before it is visible
    pub fn record(&mut self, id: PortableId, signature: Signature) -> Result<(), StateError> {
        if self.entries.get(&id) == Some(&signature) {
            return Ok(());
        }

        let entry = JournalEntry { id, signature };
        self.journal
            .append(&entry)
            .map_err(|e| StateError::io(self.journal.path(), e))?;
        self.entries.insert(entry.id, entry.signature);
        self.dirty = true;
        self.unflushed += 1;

        if self.unflushed >= self.compaction_interval {
            debug!(entries = self.unflushed, "compacting state journal");
            self.flush()?;
        }
        Ok(())
    }

    /// Write the lockfile atomically and drop the journal
    pub fn flush(&mut self) -> Result<(), StateError> {
        if !self.dirty && self.lockfile_path.exists() {
            return Ok(());
        }

        let text = Lockfile {
            entries: self.entries.clone(),
        }
        .encode()?;
        write_atomic(&self.lockfile_path, &text)?;
        self.journal
            .clear()
            .map_err(|e| StateError::io(self.journal.path(), e))?;

        debug!(path = %self.lockfile_path.display(), entries = self.entries.len(), "wrote lockfile");
        self.unflushed = 0;
        self.dirty = false;
        Ok(())
    }

    pub fn source(&self) -> StateSource {
        self.source
    }

    /// The lockfile error this store recovered from, if any
    pub fn take_recovered(&mut self) -> Option<LockfileError> {
        self.recovered.take()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Delete the lockfile and journal. Returns whether anything existed.
    pub fn remove_files(options: &StateOptions) -> Result<bool, StateError> {
        let mut removed = false;
        for path in [options.lockfile.clone(), options.journal_path()] {
            match fs::remove_file(&path) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StateError::io(&path, e)),
            }
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("lockfile", &self.lockfile_path)
            .field("entries", &self.entries.len())
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// `None` when there is no lockfile, the decoding result otherwise
fn read_lockfile(path: &Path) -> Result<Option<Result<Lockfile, LockfileError>>, StateError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(Lockfile::decode(&text))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            Ok(Some(Err(LockfileError::Parse("lockfile is not valid UTF-8".into()))))
        }
        Err(e) => Err(StateError::io(path, e)),
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), StateError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| StateError::io(dir, e))?;

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| StateError::io(dir, e))?;
    temp.write_all(contents.as_bytes())
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| StateError::io(temp.path(), e))?;
    temp.persist(path)
        .map_err(|e| StateError::io(path, e.error))?;
    Ok(())
}
