//! Parquet archive sink
//!
//! The second consumer of the orders log: batches order events by UTC
//! calendar day into immutable Parquet files under a dated path
//! (`year=YYYY/month=MM/day=DD/<date>-<suffix>.parquet`). A day is only
//! archived once it is closed, meaning enough days have passed that the
//! upstream's rolling window can no longer report late observations for
//! it. Files are never rewritten; retries produce new uniquely-named
//! files for whatever the checkpoint has not passed yet.
//!
//! Checkpoint discipline: the cursor is an arrival-id position, while
//! files hold business-time-sorted rows, so the only id safe to
//! acknowledge is the day's maximum source event id, and only once
//! every chunk of that day is durably stored. A crash mid-day redoes
//! that one day's work. After the first failed day in a run, the
//! remaining days are deferred untouched; they are redelivered and
//! archived on the next run once the failed day succeeds.

use crate::clock::Calendar;
use crate::event::{EventId, ListingEventPayload, LogKind};
use crate::retention;
use crate::store::{ListingEventStore, StoreError, PURPOSE_ARCHIVE};
use arrow_array::{ArrayRef, Int32Array, RecordBatch, StringArray, TimestampMillisecondArray};
use arrow_schema::{ArrowError, DataType, Field, Schema, TimeUnit};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use parquet::arrow::ArrowWriter;
use parquet::errors::ParquetError;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use types::ids::CardExternalId;
use types::season::SeasonYear;
use uuid::Uuid;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("price {price} at event {id} does not fit the archive price column")]
    PriceOutOfRange { id: EventId, price: u32 },

    #[error("operation cancelled")]
    Cancelled,
}

// ── Archive storage ─────────────────────────────────────────────────

/// Durable byte storage addressed by relative path.
pub trait ArchiveStorage: Send + Sync {
    /// Store `bytes` under `relative_path`. The file must not become
    /// visible under its final name until fully written.
    fn store(&self, relative_path: &str, bytes: &[u8]) -> io::Result<()>;
}

/// Filesystem-backed archive rooted at a directory. Publishes via
/// temp-file-then-rename so partial files never carry the final name.
pub struct LocalArchiveStorage {
    root: PathBuf,
}

impl LocalArchiveStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArchiveStorage for LocalArchiveStorage {
    fn store(&self, relative_path: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.root.join(relative_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("parquet.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

// ── Sink ────────────────────────────────────────────────────────────

/// Counts from one archive run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveRunSummary {
    pub files_written: usize,
    pub rows_archived: usize,
    pub days_deferred: usize,
    pub trimmed_segments: u64,
}

struct OrderRow {
    id: EventId,
    card: CardExternalId,
    placed_at: DateTime<Utc>,
    price: i32,
}

pub struct ListingDataSink<S: ArchiveStorage, C: Calendar> {
    storage: S,
    calendar: C,
}

impl<S: ArchiveStorage, C: Calendar> ListingDataSink<S, C> {
    pub fn new(storage: S, calendar: C) -> Self {
        Self { storage, calendar }
    }

    /// Archive up to `max` pending order events: closed days become
    /// Parquet files, open days are deferred to a later run, and the
    /// orders log is trimmed of entries past the safety window.
    pub fn archive_batch(
        &self,
        store: &ListingEventStore,
        season: SeasonYear,
        max: usize,
        cancel: &CancellationToken,
    ) -> Result<ArchiveRunSummary, SinkError> {
        let batch = store.poll_events(season, LogKind::Orders, PURPOSE_ARCHIVE, max, cancel)?;

        let mut days: BTreeMap<NaiveDate, Vec<OrderRow>> = BTreeMap::new();
        for event in batch.events {
            match event.payload {
                ListingEventPayload::OrderPlaced {
                    placed_at, price, ..
                } => {
                    let price = i32::try_from(price.value()).map_err(|_| {
                        SinkError::PriceOutOfRange {
                            id: event.id,
                            price: price.value(),
                        }
                    })?;
                    days.entry(placed_at.date_naive()).or_default().push(OrderRow {
                        id: event.id,
                        card: event.card_external_id,
                        placed_at,
                        price,
                    })
                }
                other => {
                    return Err(StoreError::UnexpectedPayload {
                        kind: LogKind::Orders,
                        id: event.id,
                        label: other.label(),
                    }
                    .into())
                }
            }
        }

        let today = self.calendar.today();
        let last_closed = retention::cutoff_date(today, store.config().closure_offset_days);

        let mut summary = ArchiveRunSummary::default();
        let mut halted = false;
        for (day, rows) in days {
            if day > last_closed {
                warn!(%day, rows = rows.len(), "day not closed yet, deferring");
                summary.days_deferred += 1;
                continue;
            }
            // A failed day leaves the cursor behind it; writing later
            // days now would only duplicate their files on the retry.
            if halted {
                summary.days_deferred += 1;
                continue;
            }
            match self.archive_day(store, season, day, rows, cancel) {
                Ok((files, archived)) => {
                    summary.files_written += files;
                    summary.rows_archived += archived;
                }
                Err(e @ SinkError::Cancelled) => return Err(e),
                // A broken checkpoint store invalidates the whole run
                Err(e @ SinkError::Store(StoreError::Checkpoint(_))) => return Err(e),
                Err(e) => {
                    warn!(%day, error = %e, "archiving day failed, deferring later days");
                    halted = true;
                }
            }
        }

        let cutoff = retention::cutoff_date(
            today,
            store.config().closure_offset_days + store.config().trim_safety_days,
        );
        match store.trim_orders(season, retention::cutoff_id(cutoff)) {
            Ok(removed) => summary.trimmed_segments = removed,
            Err(e) => warn!(error = %e, "order log trim failed, will retry next run"),
        }

        info!(
            season = %season,
            files_written = summary.files_written,
            rows_archived = summary.rows_archived,
            days_deferred = summary.days_deferred,
            "archive run complete"
        );
        Ok(summary)
    }

    /// Write one closed day as sorted, chunked Parquet files. Returns
    /// (files written, rows archived).
    fn archive_day(
        &self,
        store: &ListingEventStore,
        season: SeasonYear,
        day: NaiveDate,
        mut rows: Vec<OrderRow>,
        cancel: &CancellationToken,
    ) -> Result<(usize, usize), SinkError> {
        // The cursor speaks arrival ids; rows get business-sorted below,
        // so take the day's high-water mark before reordering.
        let last_arrival = rows.iter().map(|r| r.id).max().unwrap_or(EventId::ORIGIN);

        // Arrival order is not business order
        rows.sort_by_key(|r| (r.placed_at, r.id));

        let mut files = 0usize;
        let mut archived = 0usize;
        for chunk in rows.chunks(store.config().rows_per_file) {
            if cancel.is_cancelled() {
                return Err(SinkError::Cancelled);
            }
            let bytes = encode_parquet(chunk)?;
            let path = archive_path(day);
            self.storage.store(&path, &bytes)?;
            files += 1;
            archived += chunk.len();
        }

        // Acknowledge only once the whole day is durable: any lower id
        // could still belong to an unwritten business-ordered chunk.
        if archived > 0 {
            store.acknowledge(
                season,
                LogKind::Orders,
                PURPOSE_ARCHIVE,
                &last_arrival.to_string(),
            )?;
        }
        Ok((files, archived))
    }
}

/// Dated, uniquely-suffixed relative path for one archive file.
fn archive_path(day: NaiveDate) -> String {
    format!(
        "year={:04}/month={:02}/day={:02}/{}-{}.parquet",
        day.year(),
        day.month(),
        day.day(),
        day,
        Uuid::now_v7().simple()
    )
}

/// Serialize one row chunk to Parquet bytes: card id (utf8), order
/// timestamp (ms, UTC), integer price.
fn encode_parquet(rows: &[OrderRow]) -> Result<Vec<u8>, SinkError> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("card_external_id", DataType::Utf8, false),
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
        Field::new("price", DataType::Int32, false),
    ]));

    let cards = StringArray::from(
        rows.iter()
            .map(|r| r.card.to_string())
            .collect::<Vec<String>>(),
    );
    let timestamps = TimestampMillisecondArray::from(
        rows.iter()
            .map(|r| r.placed_at.timestamp_millis())
            .collect::<Vec<i64>>(),
    )
    .with_timezone("UTC");
    let prices = Int32Array::from(rows.iter().map(|r| r.price).collect::<Vec<i32>>());

    let columns: Vec<ArrayRef> = vec![Arc::new(cards), Arc::new(timestamps), Arc::new(prices)];
    let batch = RecordBatch::try_new(Arc::clone(&schema), columns)?;

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(buf)
}

// ── Tests ───────────────────────────────────────────────────────────
