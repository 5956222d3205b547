//! Calendar abstraction
//!
//! Day closure and retention both hinge on "today"; a trait seam keeps
//! that decision injectable so tests can pin the date.

use chrono::{NaiveDate, Utc};

/// Source of the current business date.
pub trait Calendar: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Wall-clock calendar, UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCalendar;

impl Calendar for SystemCalendar {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// Calendar pinned to a fixed date.
#[derive(Debug, Clone, Copy)]
pub struct FixedCalendar(pub NaiveDate);

impl Calendar for FixedCalendar {
    fn today(&self) -> NaiveDate {
        self.0
    }
}
