//! Listing Event-Sourcing Pipeline
//!
//! Append-only event logs for marketplace price and order observations,
//! with idempotent ingestion, checkpointed multi-consumer polling,
//! retention trimming, and a downstream Parquet archive sink.
//!
//! # Architecture
//!
//! ```text
//! Marketplace fetch (external)
//!        │
//!   ┌────▼─────┐
//!   │ Ingestion │  ← natural keys, dedup index, projection refresh
//!   └────┬─────┘
//!        │ append
//!   ┌────▼─────────────┐
//!   │ Event Logs       │  prices / orders, per season
//!   └──┬────────────┬──┘
//!      │            │
//!  ┌───▼────┐  ┌────▼─────┐
//!  │ Poller │  │ Archive  │  ← independent named cursors
//!  │(domain)│  │  Sink    │
//!  └────────┘  └────┬─────┘
//!                   │ trim
//!              ┌────▼─────┐
//!              │Retention │
//!              └──────────┘
//! ```
//!
//! Delivery is at-least-once: consumers acknowledge a checkpoint only
//! after durably applying a polled batch, and must apply idempotently.

pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod event;
pub mod listing;
pub mod log;
pub mod projection;
pub mod retention;
pub mod sink;
pub mod store;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
