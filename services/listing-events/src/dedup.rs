//! Bounded natural-key dedup index
//!
//! Per (season, kind, card): an ordered map of natural key → recency
//! score answering "has this observation already been admitted to the
//! log" without scanning the log itself. The orders index is bounded by
//! rank because the upstream source only ever re-sends a fixed recent
//! window, so keys that fall out of twice that window can never
//! reappear and are safe to evict.
//!
//! Eviction is a pure function of the map contents, independent of the
//! storage backend; persistence is a thin atomic-file JSON layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum DedupError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ── Recency Index ───────────────────────────────────────────────────

/// Natural keys recently admitted to a log for one card, each with the
/// business-time recency score it was admitted under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecencyIndex {
    entries: BTreeMap<String, i64>,
}

impl RecencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` has already been admitted.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Atomic check-and-insert: records `key` with `score` and returns
    /// true only if the key was absent. This is the single admission
    /// primitive, so a lookup can never be separated from its insert.
    pub fn insert_if_absent(&mut self, key: &str, score: i64) -> bool {
        if self.entries.contains_key(key) {
            return false;
        }
        self.entries.insert(key.to_string(), score);
        true
    }

    /// Withdraw a key, for backing out an admission whose append failed.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only the `max_entries` newest-by-score keys, returning how
    /// many were evicted. Ties break on the key so eviction is
    /// deterministic.
    pub fn evict_beyond_rank(&mut self, max_entries: usize) -> usize {
        if self.entries.len() <= max_entries {
            return 0;
        }
        let mut ranked: Vec<(i64, String)> = self
            .entries
            .iter()
            .map(|(key, score)| (*score, key.clone()))
            .collect();
        ranked.sort_by(|a, b| b.cmp(a)); // newest first

        let evicted = ranked.len() - max_entries;
        for (_, key) in ranked.into_iter().skip(max_entries) {
            self.entries.remove(&key);
        }
        evicted
    }
}

// ── Persistence ─────────────────────────────────────────────────────

/// Load an index from `path`; a missing file is an empty index.
pub fn load_index(path: &Path) -> Result<RecencyIndex, DedupError> {
    match fs::read(path) {
        Ok(data) => Ok(serde_json::from_slice(&data)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(RecencyIndex::new()),
        Err(e) => Err(e.into()),
    }
}

/// Persist an index to `path` atomically (write temp, fsync, rename).
pub fn store_index(path: &Path, index: &RecencyIndex) -> Result<(), DedupError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec(index)?;

    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────
