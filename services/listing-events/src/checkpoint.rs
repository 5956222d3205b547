//! Named-cursor checkpoint store
//!
//! Each independent consumer of a log owns one named cursor: a
//! string-keyed, opaque "last acknowledged id" value. Absence means the
//! start of the log. The store is deliberately dumb get/set; monotonicity
//! and did-this-id-come-from-this-log validation live in the event store,
//! which can see the log.

use crate::event::{EventError, EventId};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("stored checkpoint is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

// ── Store trait ─────────────────────────────────────────────────────

/// String-keyed get/set of opaque cursor values.
pub trait CheckpointStore: Send + Sync {
    /// The stored cursor for `key`, or `None` if never acknowledged.
    fn get(&self, key: &str) -> Result<Option<String>, CheckpointError>;

    /// Replace the cursor for `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), CheckpointError>;
}

/// Resolve a stored cursor to a log position: absence is the origin.
pub fn resolve(stored: Option<&str>) -> Result<EventId, EventError> {
    match stored {
        Some(s) => s.parse(),
        None => Ok(EventId::ORIGIN),
    }
}

// ── File-backed store ───────────────────────────────────────────────

/// One file per cursor key, replaced atomically on set.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Cursor keys use ':' separators, which are valid filename
        // bytes on the platforms the pipeline targets.
        self.dir.join(key)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn get(&self, key: &str) -> Result<Option<String>, CheckpointError> {
        match fs::read(self.path_for(key)) {
            Ok(data) => Ok(Some(String::from_utf8(data)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp_path = self.dir.join(format!("{key}.tmp"));
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_absent_key_returns_none() {
        let tmp = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(tmp.path());
        assert_eq!(store.get("listings:prices:2024:domain").unwrap(), None);
    }

    #[test]
    fn test_set_then_get() {
        let tmp = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(tmp.path());
        store.set("listings:orders:2024:archive-sink", "1712000000123-4").unwrap();
        assert_eq!(
            store.get("listings:orders:2024:archive-sink").unwrap(),
            Some("1712000000123-4".to_string())
        );
    }

    #[test]
    fn test_set_overwrites() {
        let tmp = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(tmp.path());
        store.set("k", "1-0").unwrap();
        store.set("k", "2-0").unwrap();
        assert_eq!(store.get("k").unwrap(), Some("2-0".to_string()));
    }

    #[test]
    fn test_resolve_absence_is_origin() {
        assert_eq!(resolve(None).unwrap(), EventId::ORIGIN);
        assert_eq!(
            resolve(Some("55-7")).unwrap(),
            EventId { ms: 55, seq: 7 }
        );
        assert!(resolve(Some("bogus")).is_err());
    }
}
