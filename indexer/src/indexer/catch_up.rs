//! Adaptive bulk fetch of a missing height range
//!
//! The node's response time grows with the number of blocks requested, so a
//! window that is too wide times out. Each failure halves the window; a long
//! enough run of successes doubles it again, up to the configured width.

use std::collections::HashSet;
use std::sync::Arc;

use rpc_core::ChainSource;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::database::PersistenceEngine;
use crate::error::{IndexerError, Result};
use crate::models::MissingRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchUpConfig {
    /// Widest window ever requested.
    pub window: u64,
    /// Successes needed, beyond this count, before the window doubles.
    pub ramp_up_after: u32,
    /// Consecutive one-block failures before the run gives up.
    pub max_failures_at_floor: u32,
}

impl Default for CatchUpConfig {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for CatchUpConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            window: config.catch_up_window.max(1),
            ramp_up_after: config.ramp_up_after,
            max_failures_at_floor: config.max_failures_at_floor.max(1),
        }
    }
}

pub struct CatchUpEngine {
    source: Arc<dyn ChainSource>,
    persistence: PersistenceEngine,
    config: CatchUpConfig,
    remaining: Option<MissingRange>,
}

impl CatchUpEngine {
    pub fn new(source: Arc<dyn ChainSource>, persistence: PersistenceEngine, config: CatchUpConfig) -> Self {
        Self {
            source,
            persistence,
            config,
            remaining: None,
        }
    }

    /// Part of the last range that a failed run left unfilled.
    pub fn remaining(&self) -> Option<MissingRange> {
        self.remaining
    }

    /// Fetch and store every block in `range`. Returns the number of blocks stored.
    ///
    /// On failure the unfilled suffix is kept in [`remaining`](Self::remaining)
    /// and reported in the error.
    pub async fn run(&mut self, range: MissingRange) -> Result<u64> {
        if range.is_empty() {
            return Ok(0);
        }

        let end = range.upper_bound.saturating_add(1);
        let mut min = range.lower_bound;
        let mut increment = self.config.window;
        let mut pass_count: u32 = 0;
        let mut last_call_success = true;
        let mut floor_failures: u32 = 0;
        let mut stored: u64 = 0;

        self.remaining = Some(range);
        info!("Catching up heights {}..={}", range.lower_bound, range.upper_bound);

        while min < end {
            if !last_call_success {
                increment = (increment / 2).max(1);
            }

            let mut max = min.saturating_add(increment).min(end);
            if max == min {
                max = min + 1;
            }

            match self.fetch_window(min, max).await {
                Ok(count) => {
                    stored += count;
                    min = max;
                    last_call_success = true;
                    floor_failures = 0;
                    pass_count += 1;

                    if pass_count > self.config.ramp_up_after && increment < self.config.window {
                        increment = increment.saturating_mul(2).min(self.config.window);
                        pass_count = 0;
                        debug!(increment, "Widening catch-up window");
                    }
                }
                Err(e) => {
                    last_call_success = false;
                    pass_count = 0;

                    if e.is_transport() {
                        warn!("Fetching heights {}..{} failed: {}", min, max, e);
                    } else {
                        warn!("Storing heights {}..{} failed: {}", min, max, e);
                    }

                    if max - min == 1 {
                        floor_failures += 1;
                        if floor_failures >= self.config.max_failures_at_floor {
                            let left = MissingRange::new(min, range.upper_bound);
                            self.remaining = Some(left);
                            return Err(IndexerError::CatchUpStalled {
                                lower_bound: left.lower_bound,
                                upper_bound: left.upper_bound,
                            });
                        }
                    }
                }
            }

            if min < end {
                self.remaining = Some(MissingRange::new(min, range.upper_bound));
            }
        }

        self.remaining = None;
        info!("Caught up heights {}..={} ({} blocks)", range.lower_bound, range.upper_bound, stored);
        Ok(stored)
    }

    async fn fetch_window(&self, min: u64, max: u64) -> Result<u64> {
        let blocks = self.source.get_blocks_by_heights(min..max).await?;

        if let Some(stray) = blocks.iter().find(|b| b.index < min || b.index >= max) {
            return Err(IndexerError::InvalidBlock {
                height: stray.index,
                reason: format!("outside requested heights {}..{}", min, max),
            });
        }

        // A short or duplicated reply must not advance the window.
        let heights: HashSet<u64> = blocks.iter().map(|b| b.index).collect();
        let expected = max - min;
        if blocks.len() as u64 != expected || heights.len() as u64 != expected {
            let missing = (min..max).find(|h| !heights.contains(h)).unwrap_or(min);
            return Err(IndexerError::InvalidBlock {
                height: missing,
                reason: format!(
                    "node returned {} blocks ({} distinct) for heights {}..{}",
                    blocks.len(),
                    heights.len(),
                    min,
                    max
                ),
            });
        }

        let report = self.persistence.insert_blocks(&blocks).await?;
        for (height, hash) in &report.blocks {
            debug!("Saved block #{} ({})", height, hash);
        }

        Ok(blocks.len() as u64)
    }
}
