//! Marketplace listing observation DTOs
//!
//! The shape handed to the pipeline by the external marketplace fetch
//! client: the current best prices plus the rolling windows of daily
//! price history and recent orders the upstream reports on every fetch.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use types::ids::CardExternalId;
use types::numeric::NaturalNumber;

/// A full listing view for one card, as freshly fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardListing {
    /// Display name of the listing.
    pub listing_name: String,
    /// The current, best buy price.
    pub best_buy_price: NaturalNumber,
    /// The current, best sell price.
    pub best_sell_price: NaturalNumber,
    /// The card the listing belongs to.
    pub card_external_id: CardExternalId,
    /// Daily prices for previous days (rolling window).
    pub historical_prices: Vec<CardListingPrice>,
    /// Recent completed orders (rolling window, bounded upstream).
    pub recent_orders: Vec<CardListingOrder>,
}

/// One day's best buy/sell price for a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardListingPrice {
    pub date: NaiveDate,
    pub best_buy_price: NaturalNumber,
    pub best_sell_price: NaturalNumber,
}

/// One completed order for a card. `sequence_number` disambiguates
/// orders reported for the same second at the same price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardListingOrder {
    pub placed_at: DateTime<Utc>,
    pub price: NaturalNumber,
    pub sequence_number: u32,
}
