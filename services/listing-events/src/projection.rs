//! Listing snapshot projection store
//!
//! The most recently ingested full listing view per (season, card),
//! overwritten wholesale on every price ingestion. Gives callers a cheap
//! "peek" at current state without replaying the log or moving any
//! consumer cursor. Created on first ingestion, never deleted.

use crate::listing::CardListing;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;
use types::ids::CardExternalId;
use types::season::SeasonYear;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ProjectionError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ── Store ───────────────────────────────────────────────────────────

/// JSON file per (season, card), replaced atomically on overwrite.
pub struct ListingProjectionStore {
    dir: PathBuf,
}

impl ListingProjectionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, season: SeasonYear, card: &CardExternalId) -> PathBuf {
        self.dir
            .join(season.to_string())
            .join(format!("{}.json", card.as_simple()))
    }

    /// Overwrite the stored projection for the listing's card.
    pub fn put(&self, season: SeasonYear, listing: &CardListing) -> Result<(), ProjectionError> {
        let path = self.path_for(season, &listing.card_external_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec(listing)?;

        let tmp_path = path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// The most recent listing view for a card, if one was ever ingested.
    pub fn peek(
        &self,
        season: SeasonYear,
        card: &CardExternalId,
    ) -> Result<Option<CardListing>, ProjectionError> {
        match fs::read(self.path_for(season, card)) {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
