//! Non-negative integer price type
//!
//! Marketplace prices are whole "stub" amounts, never fractional, so a
//! checked unsigned integer replaces decimal arithmetic throughout.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaturalNumberError {
    #[error("value {0} cannot be represented as a natural number")]
    Negative(i64),
    #[error("value {0} exceeds the supported range")]
    TooLarge(i64),
}

/// A whole, non-negative amount: a marketplace price or order count.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NaturalNumber(u32);

impl NaturalNumber {
    /// Wrap a known-valid value.
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// The raw value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl TryFrom<i64> for NaturalNumber {
    type Error = NaturalNumberError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value < 0 {
            return Err(NaturalNumberError::Negative(value));
        }
        u32::try_from(value)
            .map(Self)
            .map_err(|_| NaturalNumberError::TooLarge(value))
    }
}

impl fmt::Display for NaturalNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
