//! Data models for the mirror

use serde::{Deserialize, Serialize};

/// A stored block, as read back from the `blocks` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredBlock {
    pub hash: String,
    pub prev_hash: String,
    pub height: i64,
    pub difficulty: i64,
    pub size: i64,
    pub timestamp: i64,
    pub tx_count: i64,
}

/// Height and hash of a stored block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BlockRef {
    pub height: i64,
    pub hash: String,
}

/// Inclusive range of heights absent from the `blocks` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingRange {
    pub lower_bound: u64,
    pub upper_bound: u64,
}

impl MissingRange {
    pub fn new(lower_bound: u64, upper_bound: u64) -> Self {
        Self { lower_bound, upper_bound }
    }

    pub fn len(&self) -> u64 {
        self.upper_bound.saturating_sub(self.lower_bound) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.upper_bound < self.lower_bound
    }
}

/// What a block write did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveReport {
    pub deletes: usize,
    pub inserts: usize,
    /// Height and hash of every block written, in write order.
    pub blocks: Vec<(u64, String)>,
}
