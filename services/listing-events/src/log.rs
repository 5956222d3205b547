//! Append-only event log
//!
//! One log per (season, kind), stored as a directory of rotated segment
//! files of length-prefixed binary entries (see `event`). The log is
//! single-writer: ids are assigned at append time and are strictly
//! increasing in arrival order, which is not necessarily business-time
//! order. Readers address the log by cursor (`read_after`), so any
//! number of independent consumers can share one log.
//!
//! Trimming is segment-granular: a sealed segment is deleted only when
//! every entry in it is older than the cutoff id, and the active segment
//! is never deleted.

use crate::event::{EventError, EventId, ListingEvent, ListingEventPayload};
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use types::ids::CardExternalId;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("event codec error: {0}")]
    Event(#[from] EventError),

    #[error("corrupt segment {segment} at byte offset {offset}: {detail}")]
    Corruption {
        segment: String,
        offset: usize,
        detail: String,
    },
}

// ── Event Log ───────────────────────────────────────────────────────

/// Append-only, segment-rotated event log for one (season, kind).
pub struct EventLog {
    dir: PathBuf,
    max_segment_size: u64,
    writer: BufWriter<File>,
    segment_index: u64,
    current_segment: PathBuf,
    current_segment_size: u64,
    last_id: EventId,
}

impl EventLog {
    /// Open (or create) the log rooted at `dir`, recovering the last
    /// assigned id from the newest non-empty segment.
    pub fn open(dir: impl Into<PathBuf>, max_segment_size: u64) -> Result<Self, LogError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let segments = discover_segments(&dir)?;
        let segment_index = segments.last().map(|(idx, _)| *idx).unwrap_or(0);

        let mut last_id = EventId::ORIGIN;
        for (_, path) in segments.iter().rev() {
            let entries = read_segment(path)?;
            if let Some(last) = entries.last() {
                last_id = last.id;
                break;
            }
        }

        let current_segment = segment_path(&dir, segment_index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&current_segment)?;
        let current_segment_size = file.metadata()?.len();

        Ok(Self {
            dir,
            max_segment_size,
            writer: BufWriter::new(file),
            segment_index,
            current_segment,
            current_segment_size,
            last_id,
        })
    }

    /// The id of the most recently appended entry, or `EventId::ORIGIN`
    /// for an empty log. Ids at or below this value were issued by this
    /// log.
    pub fn last_id(&self) -> EventId {
        self.last_id
    }

    /// Append a single entry, assigning it the next id. The entry is
    /// flushed and fsynced before the id is returned, so a returned id
    /// is durable.
    pub fn append(
        &mut self,
        card_external_id: CardExternalId,
        payload: ListingEventPayload,
    ) -> Result<EventId, LogError> {
        if self.current_segment_size >= self.max_segment_size {
            self.rotate()?;
        }

        let now_ms = Utc::now().timestamp_millis().max(0) as u64;
        let id = self.last_id.next_after(now_ms);
        let event = ListingEvent {
            id,
            card_external_id,
            payload,
        };

        let bytes = event.to_bytes()?;
        self.writer.write_all(&bytes)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        self.current_segment_size += bytes.len() as u64;
        self.last_id = id;
        Ok(id)
    }

    /// Read up to `max` entries with ids strictly greater than `cursor`,
    /// in arrival order. Checksums are validated; any undecodable entry
    /// fails the read.
    pub fn read_after(&self, cursor: EventId, max: usize) -> Result<Vec<ListingEvent>, LogError> {
        let mut out = Vec::new();
        if max == 0 {
            return Ok(out);
        }

        for (_, path) in discover_segments(&self.dir)? {
            let data = fs::read(&path)?;
            let mut pos = 0usize;
            while pos < data.len() {
                let (event, consumed) = decode_at(&path, &data, pos)?;
                pos += consumed;
                if event.id > cursor {
                    out.push(event);
                    if out.len() >= max {
                        return Ok(out);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Delete sealed segments whose entries are all older than `min_id`.
    /// Returns the number of segments removed. The active segment is
    /// kept even when fully old, so the bound is approximate by at most
    /// one segment.
    pub fn trim(&mut self, min_id: EventId) -> Result<u64, LogError> {
        let segments = discover_segments(&self.dir)?;
        let Some((active_idx, _)) = segments.last() else {
            return Ok(0);
        };
        let active_idx = *active_idx;

        let mut removed = 0u64;
        for (idx, path) in segments {
            if idx == active_idx {
                break;
            }
            let entries = read_segment(&path)?;
            let all_old = entries.last().map_or(true, |last| last.id < min_id);
            if !all_old {
                // Ids are monotonic across segments; later ones are newer.
                break;
            }
            fs::remove_file(&path)?;
            removed += 1;
            debug!(segment = %path.display(), "trimmed log segment");
        }
        Ok(removed)
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn rotate(&mut self) -> Result<(), LogError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        self.segment_index += 1;
        self.current_segment = segment_path(&self.dir, self.segment_index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.current_segment)?;
        self.writer = BufWriter::new(file);
        self.current_segment_size = 0;
        Ok(())
    }
}

fn segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("segment-{index:06}.log"))
}

/// All segment files in `dir` as (index, path), sorted by index.
fn discover_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>, LogError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut segments: Vec<(u64, PathBuf)> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            let idx = name
                .strip_prefix("segment-")?
                .strip_suffix(".log")?
                .parse::<u64>()
                .ok()?;
            Some((idx, e.path()))
        })
        .collect();
    segments.sort_by_key(|(idx, _)| *idx);
    Ok(segments)
}

fn read_segment(path: &Path) -> Result<Vec<ListingEvent>, LogError> {
    let data = fs::read(path)?;
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        let (event, consumed) = decode_at(path, &data, pos)?;
        entries.push(event);
        pos += consumed;
    }
    Ok(entries)
}

fn decode_at(path: &Path, data: &[u8], pos: usize) -> Result<(ListingEvent, usize), LogError> {
    ListingEvent::from_bytes(&data[pos..]).map_err(|e| match e {
        EventError::Serialization(detail) => LogError::Corruption {
            segment: path.display().to_string(),
            offset: pos,
            detail,
        },
        EventError::ChecksumMismatch { id } => LogError::Corruption {
            segment: path.display().to_string(),
            offset: pos,
            detail: format!("checksum mismatch for event {id}"),
        },
        other => LogError::Event(other),
    })
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ListingEventPayload;
    use chrono::NaiveDate;
    use tempfile::TempDir;
    use types::numeric::NaturalNumber;
    use uuid::Uuid;

    fn card(n: u128) -> CardExternalId {
        CardExternalId::from_uuid(Uuid::from_u128(n))
    }

    fn price_payload(day: u32) -> ListingEventPayload {
        ListingEventPayload::PriceCaptured {
            date: NaiveDate::from_ymd_opt(2024, 4, day).unwrap(),
            best_buy_price: NaturalNumber::new(10 + day),
            best_sell_price: NaturalNumber::new(20 + day),
        }
    }

    #[test]
    fn test_append_assigns_increasing_ids() {
        let tmp = TempDir::new().unwrap();
        let mut log = EventLog::open(tmp.path(), 64 * 1024).unwrap();

        let mut prev = EventId::ORIGIN;
        for day in 1..=10 {
            let id = log.append(card(1), price_payload(day)).unwrap();
            assert!(id > prev);
            prev = id;
        }
        assert_eq!(log.last_id(), prev);
    }

    #[test]
    fn test_read_after_origin_returns_everything_in_order() {
        let tmp = TempDir::new().unwrap();
        let mut log = EventLog::open(tmp.path(), 64 * 1024).unwrap();
        let ids: Vec<EventId> = (1..=5)
            .map(|day| log.append(card(1), price_payload(day)).unwrap())
            .collect();

        let events = log.read_after(EventId::ORIGIN, usize::MAX).unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(events.iter().map(|e| e.id).collect::<Vec<_>>(), ids);
    }

    #[test]
    fn test_read_after_cursor_skips_consumed_entries() {
        let tmp = TempDir::new().unwrap();
        let mut log = EventLog::open(tmp.path(), 64 * 1024).unwrap();
        let ids: Vec<EventId> = (1..=5)
            .map(|day| log.append(card(1), price_payload(day)).unwrap())
            .collect();

        let events = log.read_after(ids[2], usize::MAX).unwrap();
        assert_eq!(events.iter().map(|e| e.id).collect::<Vec<_>>(), ids[3..]);
    }

    #[test]
    fn test_read_after_honors_max() {
        let tmp = TempDir::new().unwrap();
        let mut log = EventLog::open(tmp.path(), 64 * 1024).unwrap();
        for day in 1..=8 {
            log.append(card(1), price_payload(day)).unwrap();
        }
        let events = log.read_after(EventId::ORIGIN, 3).unwrap();
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_rotation_on_segment_size() {
        let tmp = TempDir::new().unwrap();
        // Tiny segment size to force rotation quickly
        let mut log = EventLog::open(tmp.path(), 100).unwrap();
        for day in 1..=10 {
            log.append(card(1), price_payload(day)).unwrap();
        }
        let segments = discover_segments(tmp.path()).unwrap();
        assert!(segments.len() > 1, "expected rotation to create segments");

        // All entries remain readable across segments
        let events = log.read_after(EventId::ORIGIN, usize::MAX).unwrap();
        assert_eq!(events.len(), 10);
    }

    #[test]
    fn test_reopen_continues_id_sequence() {
        let tmp = TempDir::new().unwrap();
        let last = {
            let mut log = EventLog::open(tmp.path(), 64 * 1024).unwrap();
            log.append(card(1), price_payload(1)).unwrap();
            log.append(card(1), price_payload(2)).unwrap()
        };

        let mut reopened = EventLog::open(tmp.path(), 64 * 1024).unwrap();
        assert_eq!(reopened.last_id(), last);
        let next = reopened.append(card(1), price_payload(3)).unwrap();
        assert!(next > last);
    }

    #[test]
    fn test_trim_removes_only_fully_old_sealed_segments() {
        let tmp = TempDir::new().unwrap();
        let mut log = EventLog::open(tmp.path(), 100).unwrap();
        let mut ids = Vec::new();
        for day in 1..=10 {
            ids.push(log.append(card(1), price_payload(day)).unwrap());
        }
        let before = discover_segments(tmp.path()).unwrap().len();
        assert!(before > 2);

        // Everything is older than a cutoff beyond the last id
        let beyond = EventId {
            ms: ids.last().unwrap().ms + 1,
            seq: 0,
        };
        let removed = log.trim(beyond).unwrap();
        assert_eq!(removed as usize, before - 1, "active segment survives");

        let after = discover_segments(tmp.path()).unwrap();
        assert_eq!(after.len(), 1);
    }

    #[test]
    fn test_trim_below_everything_removes_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut log = EventLog::open(tmp.path(), 100).unwrap();
        for day in 1..=10 {
            log.append(card(1), price_payload(day)).unwrap();
        }
        let before = discover_segments(tmp.path()).unwrap().len();
        let removed = log.trim(EventId { ms: 1, seq: 0 }).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(discover_segments(tmp.path()).unwrap().len(), before);
    }

    #[test]
    fn test_corruption_is_detected_on_read() {
        let tmp = TempDir::new().unwrap();
        let mut log = EventLog::open(tmp.path(), 64 * 1024).unwrap();
        for day in 1..=3 {
            log.append(card(1), price_payload(day)).unwrap();
        }

        // Flip a byte inside the first entry's payload region
        let (_, path) = discover_segments(tmp.path()).unwrap()[0].clone();
        let mut data = fs::read(&path).unwrap();
        data[40] ^= 0xFF;
        fs::write(&path, &data).unwrap();

        let result = log.read_after(EventId::ORIGIN, usize::MAX);
        assert!(matches!(result, Err(LogError::Corruption { .. })));
    }
}
