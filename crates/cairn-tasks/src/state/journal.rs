use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::signature::Signature;

use super::portable::PortableId;

/// One recorded signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: PortableId,
    pub signature: Signature,
}

#[derive(Debug, Default)]
struct Scan {
    entries: Vec<JournalEntry>,
    /// Bytes up to the end of the last complete entry
    valid: u64,
    len: u64,
    /// The last complete entry was written without its newline
    missing_newline: bool,
}

/// Append-only log of records not yet compacted into the lockfile
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: Option<File>,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back all complete entries.
    ///
    /// Reading stops at the first line that does not decode, which is where
    /// a crash interrupted a write.
    pub fn replay(&self) -> io::Result<Vec<JournalEntry>> {
        Ok(self.scan()?.entries)
    }

    /// Replay, then cut the file back to its last complete entry so later
    /// appends start on a fresh line.
    pub fn recover(&mut self) -> io::Result<Vec<JournalEntry>> {
        let scan = self.scan()?;
        if scan.valid < scan.len || scan.missing_newline {
            let mut file = OpenOptions::new().write(true).open(&self.path)?;
            file.set_len(scan.valid)?;
            if scan.missing_newline {
                file.seek(SeekFrom::End(0))?;
                file.write_all(b"\n")?;
            }
            file.sync_all()?;
            debug!(
                path = %self.path.display(),
                dropped = scan.len - scan.valid,
                "truncated journal to last complete entry"
            );
        }
        Ok(scan.entries)
    }

    fn scan(&self) -> io::Result<Scan> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Scan::default()),
            Err(e) => return Err(e),
        };

        let mut scan = Scan {
            len: bytes.len() as u64,
            ..Scan::default()
        };
        for (number, line) in bytes.split_inclusive(|b| *b == b'\n').enumerate() {
            let text = std::str::from_utf8(line).map(str::trim);
            if matches!(text, Ok("")) {
                scan.valid += line.len() as u64;
                scan.missing_newline = false;
                continue;
            }
            let decoded = text
                .map_err(|e| e.to_string())
                .and_then(|text| serde_json::from_str::<JournalEntry>(text).map_err(|e| e.to_string()));
            match decoded {
                Ok(entry) => {
                    scan.entries.push(entry);
                    scan.valid += line.len() as u64;
                    scan.missing_newline = !line.ends_with(b"\n");
                }
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = number + 1,
                        error = %e,
                        "ignoring incomplete journal tail"
                    );
                    break;
                }
            }
        }

        Ok(scan)
    }

    /// Append one entry and flush it to the OS
    pub fn append(&mut self, entry: &JournalEntry) -> io::Result<()> {
        let line = serde_json::to_string(entry).map_err(io::Error::other)?;

        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.file = Some(file);
        }

        if let Some(file) = self.file.as_mut() {
            writeln!(file, "{}", line)?;
            file.flush()?;
        }
        Ok(())
    }

    /// Drop all entries
    pub fn clear(&mut self) -> io::Result<()> {
        self.file = None;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(task: &str, sig: &str) -> JournalEntry {
        JournalEntry {
            id: PortableId::for_task(task),
            signature: Signature::of_str(sig),
        }
    }

    #[test]
    fn test_append_and_replay() {
        let temp = TempDir::new().unwrap();
        let mut journal = Journal::new(temp.path().join("state/j.journal"));
        assert!(journal.replay().unwrap().is_empty());

        journal.append(&entry("a", "1")).unwrap();
        journal.append(&entry("b", "2")).unwrap();

        let replayed = Journal::new(journal.path()).replay().unwrap();
        assert_eq!(replayed, vec![entry("a", "1"), entry("b", "2")]);
    }

    #[test]
    fn test_torn_tail_is_ignored() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("j.journal");
        let mut journal = Journal::new(&path);
        journal.append(&entry("a", "1")).unwrap();
        drop(journal);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"id\":\"4:ta").unwrap();

        let replayed = Journal::new(&path).replay().unwrap();
        assert_eq!(replayed, vec![entry("a", "1")]);
    }

    #[test]
    fn test_recover_truncates_torn_tail() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("j.journal");
        let mut journal = Journal::new(&path);
        journal.append(&entry("a", "1")).unwrap();
        drop(journal);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"id\":\"4:ta").unwrap();
        drop(file);

        let mut journal = Journal::new(&path);
        assert_eq!(journal.recover().unwrap(), vec![entry("a", "1")]);
        journal.append(&entry("b", "2")).unwrap();

        let replayed = Journal::new(&path).replay().unwrap();
        assert_eq!(replayed, vec![entry("a", "1"), entry("b", "2")]);
    }

    #[test]
    fn test_recover_restores_missing_newline() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("j.journal");
        let line = serde_json::to_string(&entry("a", "1")).unwrap();
        fs::write(&path, &line).unwrap();

        let mut journal = Journal::new(&path);
        assert_eq!(journal.recover().unwrap(), vec![entry("a", "1")]);
        journal.append(&entry("b", "2")).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 2);
        let replayed = Journal::new(&path).replay().unwrap();
        assert_eq!(replayed, vec![entry("a", "1"), entry("b", "2")]);
    }

    #[test]
    fn test_recover_without_file() {
        let temp = TempDir::new().unwrap();
        let mut journal = Journal::new(temp.path().join("j.journal"));
        assert!(journal.recover().unwrap().is_empty());
        assert!(!journal.path().exists());
    }

    #[test]
    fn test_clear() {
        let temp = TempDir::new().unwrap();
        let mut journal = Journal::new(temp.path().join("j.journal"));
        journal.append(&entry("a", "1")).unwrap();
        journal.clear().unwrap();
        assert!(!journal.path().exists());
        journal.clear().unwrap();

        journal.append(&entry("b", "2")).unwrap();
        assert_eq!(journal.replay().unwrap(), vec![entry("b", "2")]);
    }
}
