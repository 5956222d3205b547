//! Pipeline configuration
//!
//! All knobs in one serde struct with per-field defaults, so a partial
//! config file (or none at all) yields a fully working pipeline.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum events returned by a single poll.
    pub poll_batch_size: usize,
    /// Maximum rows per archive file.
    pub rows_per_file: usize,
    /// Days a business day must be in the past before it is archived.
    pub closure_offset_days: u32,
    /// Upstream's rolling order window size. The dedup index keeps
    /// twice this many keys per card.
    pub max_observed_orders: usize,
    /// Extra days kept in the log beyond the closure offset before
    /// trimming.
    pub trim_safety_days: u32,
    /// Segment rotation threshold in bytes.
    pub max_segment_size: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_batch_size: 1000,
            rows_per_file: 10_000,
            closure_offset_days: 1,
            max_observed_orders: 200,
            trim_safety_days: 7,
            max_segment_size: 64 * 1024 * 1024,
        }
    }
}
