//! Event model and binary entry codec
//!
//! Defines the immutable events the pipeline appends to its logs, the
//! log-assigned `EventId` token, content-derived natural keys used for
//! deduplication, and the length-prefixed binary format entries are
//! stored in (CRC32C checksum over the entry body).
//!
//! # Binary format (per entry)
//! ```text
//! [body_len: u32]
//! [id_ms: u64][id_seq: u64]
//! [card_external_id: 16 bytes]
//! [payload_len: u32][payload: bincode bytes]
//! [checksum: u32]  // CRC32C over id + card + payload
//! ```

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use types::ids::CardExternalId;
use types::numeric::NaturalNumber;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum EventError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("malformed event id: {0:?}")]
    MalformedId(String),

    #[error("checksum mismatch for event {id}")]
    ChecksumMismatch { id: EventId },
}

// ── Event Id ────────────────────────────────────────────────────────

/// Log-assigned, monotonically increasing position token.
///
/// Arrival wall-clock milliseconds plus an intra-millisecond counter,
/// rendered as `"<ms>-<seq>"`. Embedding arrival time in the id is what
/// lets retention trimming derive a minimum id from a wall-clock cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId {
    /// Arrival time in Unix milliseconds.
    pub ms: u64,
    /// Tie-breaker for entries appended within one millisecond.
    pub seq: u64,
}

impl EventId {
    /// The position before the first entry of any log. Polling from the
    /// origin replays everything.
    pub const ORIGIN: EventId = EventId { ms: 0, seq: 0 };

    /// The id the log assigns to the entry appended after `self` at
    /// wall-clock `now_ms`. Never goes backwards even if the clock does.
    pub fn next_after(self, now_ms: u64) -> EventId {
        if now_ms > self.ms {
            EventId { ms: now_ms, seq: 0 }
        } else {
            EventId {
                ms: self.ms,
                seq: self.seq + 1,
            }
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EventId {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ms, seq) = s
            .split_once('-')
            .ok_or_else(|| EventError::MalformedId(s.to_string()))?;
        let ms = ms
            .parse::<u64>()
            .map_err(|_| EventError::MalformedId(s.to_string()))?;
        let seq = seq
            .parse::<u64>()
            .map_err(|_| EventError::MalformedId(s.to_string()))?;
        Ok(EventId { ms, seq })
    }
}

// ── Log Kind ────────────────────────────────────────────────────────

/// Which logical log an event belongs to. Each season has one log per
/// kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogKind {
    Prices,
    Orders,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Prices => "prices",
            LogKind::Orders => "orders",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Payloads ────────────────────────────────────────────────────────

/// Event-specific payloads, bincode-encoded inside log entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingEventPayload {
    /// A daily best buy/sell price observation for a card.
    PriceCaptured {
        date: NaiveDate,
        best_buy_price: NaturalNumber,
        best_sell_price: NaturalNumber,
    },

    /// A single completed order for a card. `sequence_number`
    /// disambiguates same-second orders at the same price.
    OrderPlaced {
        placed_at: DateTime<Utc>,
        price: NaturalNumber,
        sequence_number: u32,
    },
}

impl ListingEventPayload {
    /// The log this payload belongs to.
    pub fn kind(&self) -> LogKind {
        match self {
            ListingEventPayload::PriceCaptured { .. } => LogKind::Prices,
            ListingEventPayload::OrderPlaced { .. } => LogKind::Orders,
        }
    }

    /// Content-derived identity used for deduplication. The upstream
    /// source has no native event ids, so two payloads with the same
    /// natural key for the same card are duplicates of one observation.
    pub fn natural_key(&self) -> String {
        match self {
            ListingEventPayload::PriceCaptured { date, .. } => date.format("%Y-%m-%d").to_string(),
            ListingEventPayload::OrderPlaced {
                placed_at,
                price,
                sequence_number,
            } => format!(
                "{}-{}-{}",
                placed_at.format("%Y-%m-%dT%H:%M:%S"),
                price.value(),
                sequence_number
            ),
        }
    }

    /// The business time of the observation, distinct from arrival time.
    pub fn business_time(&self) -> DateTime<Utc> {
        match self {
            ListingEventPayload::PriceCaptured { date, .. } => {
                date.and_time(NaiveTime::MIN).and_utc()
            }
            ListingEventPayload::OrderPlaced { placed_at, .. } => *placed_at,
        }
    }

    /// Payload type as a string label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            ListingEventPayload::PriceCaptured { .. } => "PriceCaptured",
            ListingEventPayload::OrderPlaced { .. } => "OrderPlaced",
        }
    }
}

// ── Events ──────────────────────────────────────────────────────────

/// A single immutable log entry. Once appended it is never mutated or
/// individually deleted, only bulk-trimmed by age.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEvent {
    /// Log-assigned arrival token.
    pub id: EventId,
    /// The card the observation belongs to.
    pub card_external_id: CardExternalId,
    /// The observation itself.
    pub payload: ListingEventPayload,
}

/// Minimum body size: 8 (ms) + 8 (seq) + 16 (card) + 4 (payload_len) + 4 (crc).
const MIN_BODY_LEN: usize = 40;

/// Reject absurdly large length prefixes, likely corruption.
const MAX_BODY_LEN: usize = 100_000_000;

impl ListingEvent {
    /// Compute CRC32C over (id ++ card ++ payload).
    fn compute_checksum(id: EventId, card: &CardExternalId, payload: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(8 + 8 + 16 + payload.len());
        buf.extend_from_slice(&id.ms.to_le_bytes());
        buf.extend_from_slice(&id.seq.to_le_bytes());
        buf.extend_from_slice(card.as_bytes());
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    /// Serialize the event to the binary entry format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        let payload = bincode::serialize(&self.payload)
            .map_err(|e| EventError::Serialization(e.to_string()))?;
        let checksum = Self::compute_checksum(self.id, &self.card_external_id, &payload);

        let body_len = (MIN_BODY_LEN + payload.len()) as u32;
        let mut buf = Vec::with_capacity(4 + body_len as usize);
        buf.extend_from_slice(&body_len.to_le_bytes());
        buf.extend_from_slice(&self.id.ms.to_le_bytes());
        buf.extend_from_slice(&self.id.seq.to_le_bytes());
        buf.extend_from_slice(self.card_external_id.as_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
        buf.extend_from_slice(&checksum.to_le_bytes());
        Ok(buf)
    }

    /// Deserialize an event from the binary entry format.
    ///
    /// Returns `(event, bytes_consumed)` on success. Corrupted data
    /// produces errors instead of panics.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), EventError> {
        if data.len() < 4 {
            return Err(EventError::Serialization(
                "not enough data for length prefix".into(),
            ));
        }

        let body_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if body_len > MAX_BODY_LEN {
            return Err(EventError::Serialization(format!(
                "implausible body length {body_len}"
            )));
        }
        if body_len < MIN_BODY_LEN {
            return Err(EventError::Serialization(format!(
                "body too small: {body_len} bytes, minimum is {MIN_BODY_LEN}"
            )));
        }

        let total = 4 + body_len;
        if data.len() < total {
            return Err(EventError::Serialization(format!(
                "incomplete entry: need {} bytes, have {}",
                total,
                data.len()
            )));
        }

        let body = &data[4..total];
        let ms = u64::from_le_bytes(body[0..8].try_into().map_err(err_slice)?);
        let seq = u64::from_le_bytes(body[8..16].try_into().map_err(err_slice)?);
        let card_bytes: [u8; 16] = body[16..32].try_into().map_err(err_slice)?;

        let payload_len = u32::from_le_bytes(body[32..36].try_into().map_err(err_slice)?) as usize;
        if 36 + payload_len + 4 != body.len() {
            return Err(EventError::Serialization(format!(
                "payload length {} does not match body length {}",
                payload_len,
                body.len()
            )));
        }
        let payload_bytes = &body[36..36 + payload_len];
        let checksum = u32::from_le_bytes(
            body[36 + payload_len..]
                .try_into()
                .map_err(err_slice)?,
        );

        let id = EventId { ms, seq };
        let card = CardExternalId::from_bytes(card_bytes);
        if Self::compute_checksum(id, &card, payload_bytes) != checksum {
            return Err(EventError::ChecksumMismatch { id });
        }

        let payload: ListingEventPayload = bincode::deserialize(payload_bytes)
            .map_err(|e| EventError::Serialization(e.to_string()))?;

        Ok((
            ListingEvent {
                id,
                card_external_id: card,
                payload,
            },
            total,
        ))
    }
}

fn err_slice(e: std::array::TryFromSliceError) -> EventError {
    EventError::Serialization(e.to_string())
}

// ── Tests ───────────────────────────────────────────────────────────
