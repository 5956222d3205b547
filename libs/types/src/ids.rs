//! Unique identifier types for marketplace entities
//!
//! Card IDs are assigned by the upstream marketplace (UUIDs); this crate
//! never generates them, it only carries them through the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The upstream marketplace's unique identifier for a card.
///
/// `Ord` is derived so collections of per-card results iterate in a
/// deterministic order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardExternalId(Uuid);

impl CardExternalId {
    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// The raw 16 bytes of the UUID, used by binary codecs.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Rebuild from the raw 16 bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Hyphen-free rendering, used in file names.
    pub fn as_simple(&self) -> String {
        self.0.simple().to_string()
    }
}

impl fmt::Display for CardExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CardExternalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}
