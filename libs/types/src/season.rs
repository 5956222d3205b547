//! Validated season year
//!
//! Every log, checkpoint, and projection in the pipeline is partitioned by
//! the game season it belongs to, so the year is a first-class value type
//! rather than a bare integer.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Earliest season the forecaster supports.
pub const MIN_SEASON_YEAR: u16 = 2000;

/// Latest season the forecaster accepts, a sanity bound against typos.
pub const MAX_SEASON_YEAR: u16 = 2100;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeasonYearError {
    #[error("season year {0} is outside the supported range {MIN_SEASON_YEAR}..={MAX_SEASON_YEAR}")]
    OutOfRange(u16),
}

/// The year of a game season, e.g. 2024.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeasonYear(u16);

impl SeasonYear {
    /// Create a season year, validating the supported range.
    pub fn new(year: u16) -> Result<Self, SeasonYearError> {
        if !(MIN_SEASON_YEAR..=MAX_SEASON_YEAR).contains(&year) {
            return Err(SeasonYearError::OutOfRange(year));
        }
        Ok(Self(year))
    }

    /// The raw year value.
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for SeasonYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
