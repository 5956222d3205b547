//! Listing event store
//!
//! The single ingestion and consumption surface over the per-season
//! price and order logs. Ingestion is idempotent: every observation is
//! admitted through the card's recency index exactly once, so re-fetched
//! listings append nothing new. Consumption is cursor-based and
//! at-least-once: each named consumer polls events past its own
//! checkpoint and acknowledges the batch token when (and only when) the
//! batch's effects are durable on the consumer's side.
//!
//! Layout under the store root:
//! ```text
//! logs/<year>/<kind>/segment-*.log
//! checkpoints/listings:<kind>:<year>:<purpose>
//! dedup/<year>/<kind>/<card>.json
//! projections/<year>/<card>.json
//! ```

use crate::checkpoint::{self, CheckpointError, CheckpointStore, FileCheckpointStore};
use crate::config::PipelineConfig;
use crate::dedup::{self, DedupError, RecencyIndex};
use crate::event::{EventError, EventId, ListingEvent, ListingEventPayload, LogKind};
use crate::listing::{CardListing, CardListingOrder, CardListingPrice};
use crate::log::{EventLog, LogError};
use crate::projection::{ListingProjectionStore, ProjectionError};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use types::ids::CardExternalId;
use types::season::SeasonYear;

/// Cursor name of the domain-model poller.
pub const PURPOSE_DOMAIN: &str = "domain";

/// Cursor name of the archive sink.
pub const PURPOSE_ARCHIVE: &str = "archive-sink";

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("projection error: {0}")]
    Projection(#[from] ProjectionError),

    #[error("dedup index error: {0}")]
    Dedup(#[from] DedupError),

    #[error("event error: {0}")]
    Event(#[from] EventError),

    #[error("unexpected {label} payload in {kind} log at {id}")]
    UnexpectedPayload {
        kind: LogKind,
        id: EventId,
        label: &'static str,
    },

    #[error("checkpoint {id} was never issued by the {kind} log (last id {last})")]
    ForeignCheckpoint {
        id: EventId,
        last: EventId,
        kind: LogKind,
    },

    #[error("operation cancelled")]
    Cancelled,
}

// ── Result types ────────────────────────────────────────────────────

/// Counts from one listing ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub prices_appended: usize,
    pub prices_skipped: usize,
    pub orders_appended: usize,
    pub orders_skipped: usize,
}

/// One poll's worth of raw events plus the token to acknowledge.
#[derive(Debug, Clone)]
pub struct EventBatch {
    /// Pass to `acknowledge` once the batch is durably processed. For an
    /// empty batch this is the unchanged cursor.
    pub checkpoint: String,
    pub events: Vec<ListingEvent>,
}

/// New price observations grouped per card, in arrival order per card.
#[derive(Debug, Clone)]
pub struct NewPriceEvents {
    pub checkpoint: String,
    pub prices: BTreeMap<CardExternalId, Vec<CardListingPrice>>,
}

/// New order observations grouped per card, in arrival order per card.
#[derive(Debug, Clone)]
pub struct NewOrderEvents {
    pub checkpoint: String,
    pub orders: BTreeMap<CardExternalId, Vec<CardListingOrder>>,
}

// ── Store ───────────────────────────────────────────────────────────

type LogCache = HashMap<(u16, LogKind), Arc<Mutex<EventLog>>>;
type DedupCache = HashMap<(u16, LogKind, CardExternalId), Arc<Mutex<RecencyIndex>>>;

pub struct ListingEventStore {
    root: PathBuf,
    config: PipelineConfig,
    checkpoints: FileCheckpointStore,
    projections: ListingProjectionStore,
    logs: Mutex<LogCache>,
    dedup: Mutex<DedupCache>,
}

/// Recover the guard from a poisoned mutex; the protected state is
/// plain data and remains usable after a panicked holder.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn checkpoint_key(season: SeasonYear, kind: LogKind, purpose: &str) -> String {
    format!("listings:{kind}:{}:{purpose}", season.value())
}

impl ListingEventStore {
    pub fn open(root: impl Into<PathBuf>, config: PipelineConfig) -> Self {
        let root = root.into();
        let checkpoints = FileCheckpointStore::new(root.join("checkpoints"));
        let projections = ListingProjectionStore::new(root.join("projections"));
        Self {
            root,
            config,
            checkpoints,
            projections,
            logs: Mutex::new(HashMap::new()),
            dedup: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ── Ingestion ───────────────────────────────────────────────────

    /// Ingest one freshly fetched listing: append every price and order
    /// observation not seen before, refresh the card's projection, and
    /// report what was admitted. Safe to call repeatedly with
    /// overlapping fetches; duplicates append nothing.
    pub fn append_new_prices_and_orders(
        &self,
        season: SeasonYear,
        listing: &CardListing,
        cancel: &CancellationToken,
    ) -> Result<IngestSummary, StoreError> {
        let card = listing.card_external_id;
        let mut summary = IngestSummary::default();

        let mut prices = listing.historical_prices.clone();
        prices.sort_by_key(|p| p.date);
        let mut orders = listing.recent_orders.clone();
        orders.sort_by_key(|o| (o.placed_at, o.sequence_number));

        let price_log = self.log_for(season, LogKind::Prices)?;
        let price_index = self.dedup_for(season, LogKind::Prices, card)?;
        {
            let mut index = lock(&price_index);
            let mut cancelled = false;
            for price in prices {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                let payload = ListingEventPayload::PriceCaptured {
                    date: price.date,
                    best_buy_price: price.best_buy_price,
                    best_sell_price: price.best_sell_price,
                };
                self.admit(&price_log, &mut index, card, payload, &mut summary.prices_appended, &mut summary.prices_skipped)?;
            }
            dedup::store_index(&self.dedup_path(season, LogKind::Prices, card), &index)?;
            if cancelled {
                return Err(StoreError::Cancelled);
            }
        }

        let order_log = self.log_for(season, LogKind::Orders)?;
        let order_index = self.dedup_for(season, LogKind::Orders, card)?;
        {
            let mut index = lock(&order_index);
            let mut cancelled = false;
            for order in orders {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                let payload = ListingEventPayload::OrderPlaced {
                    placed_at: order.placed_at,
                    price: order.price,
                    sequence_number: order.sequence_number,
                };
                self.admit(&order_log, &mut index, card, payload, &mut summary.orders_appended, &mut summary.orders_skipped)?;
            }
            // The upstream only re-sends a bounded recent window, so
            // keys beyond twice that window can never reappear.
            index.evict_beyond_rank(2 * self.config.max_observed_orders);
            dedup::store_index(&self.dedup_path(season, LogKind::Orders, card), &index)?;
            if cancelled {
                return Err(StoreError::Cancelled);
            }
        }

        self.projections.put(season, listing)?;

        info!(
            card = %card,
            season = %season,
            prices_appended = summary.prices_appended,
            orders_appended = summary.orders_appended,
            "ingested listing observations"
        );
        Ok(summary)
    }

    fn admit(
        &self,
        log: &Arc<Mutex<EventLog>>,
        index: &mut RecencyIndex,
        card: CardExternalId,
        payload: ListingEventPayload,
        appended: &mut usize,
        skipped: &mut usize,
    ) -> Result<(), StoreError> {
        let key = payload.natural_key();
        // Recency scores are unix seconds of the business time
        let score = payload.business_time().timestamp();
        if !index.insert_if_absent(&key, score) {
            debug!(%card, key, "observation already admitted, skipping");
            *skipped += 1;
            return Ok(());
        }
        if let Err(e) = lock(log).append(card, payload) {
            index.remove(&key);
            return Err(e.into());
        }
        *appended += 1;
        Ok(())
    }

    // ── Consumption ─────────────────────────────────────────────────

    /// Poll up to `max` raw events past the named consumer's cursor.
    pub fn poll_events(
        &self,
        season: SeasonYear,
        kind: LogKind,
        purpose: &str,
        max: usize,
        cancel: &CancellationToken,
    ) -> Result<EventBatch, StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let key = checkpoint_key(season, kind, purpose);
        let cursor = checkpoint::resolve(self.checkpoints.get(&key)?.as_deref())?;
        let log = self.log_for(season, kind)?;
        let events = lock(&log).read_after(cursor, max)?;
        let checkpoint = events.last().map(|e| e.id).unwrap_or(cursor).to_string();
        Ok(EventBatch { checkpoint, events })
    }

    /// New price observations for the named consumer, grouped per card.
    pub fn poll_new_prices(
        &self,
        season: SeasonYear,
        purpose: &str,
        max: usize,
        cancel: &CancellationToken,
    ) -> Result<NewPriceEvents, StoreError> {
        let batch = self.poll_events(season, LogKind::Prices, purpose, max, cancel)?;
        let mut prices: BTreeMap<CardExternalId, Vec<CardListingPrice>> = BTreeMap::new();
        for event in batch.events {
            match event.payload {
                ListingEventPayload::PriceCaptured {
                    date,
                    best_buy_price,
                    best_sell_price,
                } => prices.entry(event.card_external_id).or_default().push(
                    CardListingPrice {
                        date,
                        best_buy_price,
                        best_sell_price,
                    },
                ),
                other => {
                    return Err(StoreError::UnexpectedPayload {
                        kind: LogKind::Prices,
                        id: event.id,
                        label: other.label(),
                    })
                }
            }
        }
        Ok(NewPriceEvents {
            checkpoint: batch.checkpoint,
            prices,
        })
    }

    /// New order observations for the named consumer, grouped per card.
    pub fn poll_new_orders(
        &self,
        season: SeasonYear,
        purpose: &str,
        max: usize,
        cancel: &CancellationToken,
    ) -> Result<NewOrderEvents, StoreError> {
        let batch = self.poll_events(season, LogKind::Orders, purpose, max, cancel)?;
        let mut orders: BTreeMap<CardExternalId, Vec<CardListingOrder>> = BTreeMap::new();
        for event in batch.events {
            match event.payload {
                ListingEventPayload::OrderPlaced {
                    placed_at,
                    price,
                    sequence_number,
                } => orders.entry(event.card_external_id).or_default().push(
                    CardListingOrder {
                        placed_at,
                        price,
                        sequence_number,
                    },
                ),
                other => {
                    return Err(StoreError::UnexpectedPayload {
                        kind: LogKind::Orders,
                        id: event.id,
                        label: other.label(),
                    })
                }
            }
        }
        Ok(NewOrderEvents {
            checkpoint: batch.checkpoint,
            orders,
        })
    }

    /// Advance the named consumer's cursor to `checkpoint`.
    ///
    /// Malformed tokens and ids the log never issued are errors; an id
    /// at or behind the current cursor is a stale redelivery
    /// acknowledgement and is ignored with a warning.
    pub fn acknowledge(
        &self,
        season: SeasonYear,
        kind: LogKind,
        purpose: &str,
        checkpoint: &str,
    ) -> Result<(), StoreError> {
        let id: EventId = checkpoint.parse()?;
        let log = self.log_for(season, kind)?;
        let last = lock(&log).last_id();
        if id > last {
            return Err(StoreError::ForeignCheckpoint { id, last, kind });
        }

        let key = checkpoint_key(season, kind, purpose);
        let current = checkpoint::resolve(self.checkpoints.get(&key)?.as_deref())?;
        if id < current {
            warn!(%id, %current, key, "stale acknowledgement ignored");
            return Ok(());
        }
        self.checkpoints.set(&key, checkpoint)?;
        Ok(())
    }

    /// Shorthand for acknowledging against the prices log.
    pub fn acknowledge_prices(
        &self,
        season: SeasonYear,
        purpose: &str,
        checkpoint: &str,
    ) -> Result<(), StoreError> {
        self.acknowledge(season, LogKind::Prices, purpose, checkpoint)
    }

    /// Shorthand for acknowledging against the orders log.
    pub fn acknowledge_orders(
        &self,
        season: SeasonYear,
        purpose: &str,
        checkpoint: &str,
    ) -> Result<(), StoreError> {
        self.acknowledge(season, LogKind::Orders, purpose, checkpoint)
    }

    /// The most recently ingested full view of a card's listing, without
    /// touching any consumer cursor.
    pub fn peek_listing(
        &self,
        season: SeasonYear,
        card: &CardExternalId,
    ) -> Result<Option<CardListing>, StoreError> {
        Ok(self.projections.peek(season, card)?)
    }

    // ── Retention ───────────────────────────────────────────────────

    /// Drop order-log segments that only contain events older than
    /// `min_id`. Returns the number of segments removed.
    pub fn trim_orders(&self, season: SeasonYear, min_id: EventId) -> Result<u64, StoreError> {
        let log = self.log_for(season, LogKind::Orders)?;
        let removed = lock(&log).trim(min_id)?;
        if removed > 0 {
            info!(season = %season, %min_id, removed, "trimmed order log");
        }
        Ok(removed)
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn log_for(&self, season: SeasonYear, kind: LogKind) -> Result<Arc<Mutex<EventLog>>, StoreError> {
        let mut cache = lock(&self.logs);
        if let Some(log) = cache.get(&(season.value(), kind)) {
            return Ok(Arc::clone(log));
        }
        let dir = self
            .root
            .join("logs")
            .join(season.to_string())
            .join(kind.as_str());
        let log = Arc::new(Mutex::new(EventLog::open(dir, self.config.max_segment_size)?));
        cache.insert((season.value(), kind), Arc::clone(&log));
        Ok(log)
    }

    fn dedup_path(&self, season: SeasonYear, kind: LogKind, card: CardExternalId) -> PathBuf {
        self.root
            .join("dedup")
            .join(season.to_string())
            .join(kind.as_str())
            .join(format!("{}.json", card.as_simple()))
    }

    fn dedup_for(
        &self,
        season: SeasonYear,
        kind: LogKind,
        card: CardExternalId,
    ) -> Result<Arc<Mutex<RecencyIndex>>, StoreError> {
        let mut cache = lock(&self.dedup);
        if let Some(index) = cache.get(&(season.value(), kind, card)) {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(Mutex::new(dedup::load_index(&self.dedup_path(
            season, kind, card,
        ))?));
        cache.insert((season.value(), kind, card), Arc::clone(&index));
        Ok(index)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
