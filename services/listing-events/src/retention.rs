//! Retention arithmetic
//!
//! Because event ids embed the arrival wall-clock, "trim everything
//! older than date D" reduces to comparing against a synthetic id at
//! D's midnight. These helpers turn a retention policy into that id.

use crate::event::EventId;
use chrono::{Duration, NaiveDate, NaiveTime};

/// The date `days_back` days before `today`.
pub fn cutoff_date(today: NaiveDate, days_back: u32) -> NaiveDate {
    today - Duration::days(i64::from(days_back))
}

/// The smallest id an event arriving on or after `date` can carry.
/// Events with ids strictly below this arrived before `date`.
pub fn cutoff_id(date: NaiveDate) -> EventId {
    let ms = date
        .and_time(NaiveTime::MIN)
        .and_utc()
        .timestamp_millis()
        .max(0) as u64;
    EventId { ms, seq: 0 }
}
