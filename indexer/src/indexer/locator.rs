//! Block locator construction
//!
//! A locator is a sparse list of known hashes, oldest first: genesis, then
//! checkpoints spaced exponentially further apart going back from the recent
//! tail, then the tail itself. The node answers with the first point where
//! our view and its chain agree, however deep the divergence is.

use std::collections::HashSet;

use futures_util::future::try_join_all;
use sqlx::SqlitePool;

use crate::database::queries::BlockQueries;
use crate::database::Database;
use crate::error::Result;
use crate::models::BlockRef;

/// Number of most recent blocks always sent in full.
pub const TAIL_LENGTH: usize = 11;

pub struct LocatorBuilder {
    pool: SqlitePool,
}

impl LocatorBuilder {
    pub fn new(database: &Database) -> Self {
        Self {
            pool: database.pool().clone(),
        }
    }

    pub async fn build_locator(&self) -> Result<Vec<String>> {
        let genesis = BlockQueries::hash_at_height(&self.pool, 0).await?;

        let mut tail = BlockQueries::list_recent(&self.pool, TAIL_LENGTH as i64).await?;
        tail.reverse();

        let mut refs: Vec<BlockRef> = genesis.into_iter().collect();

        if tail.len() >= TAIL_LENGTH {
            let lowest = tail[0].height.max(0) as u64;
            let lookups = checkpoint_heights(lowest)
                .into_iter()
                .map(|height| BlockQueries::hash_at_height(&self.pool, height));

            let mut checkpoints: Vec<BlockRef> = try_join_all(lookups)
                .await?
                .into_iter()
                .flatten()
                .filter(|b| !b.hash.is_empty())
                .collect();
            checkpoints.sort_by_key(|b| b.height);
            refs.extend(checkpoints);
        }

        refs.extend(tail);
        Ok(dedup_hashes(refs))
    }
}

/// Heights `lowest - 2^i` for i = 1, 2, … while they stay above genesis.
pub fn checkpoint_heights(lowest: u64) -> Vec<u64> {
    let mut heights = Vec::new();
    let mut step: u64 = 2;

    while step < lowest {
        heights.push(lowest - step);
        match step.checked_mul(2) {
            Some(next) => step = next,
            None => break,
        }
    }

    heights
}

fn dedup_hashes(refs: Vec<BlockRef>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(refs.len());
    refs.into_iter()
        .filter(|b| seen.insert(b.hash.clone()))
        .map(|b| b.hash)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::PersistenceEngine;
    use crate::testing::{block_hash, chain, open_database};

    #[test]
    fn checkpoints_step_exponentially() {
        assert_eq!(checkpoint_heights(100), vec![98, 96, 92, 84, 68, 36]);
        assert_eq!(checkpoint_heights(2), Vec::<u64>::new());
        assert_eq!(checkpoint_heights(3), vec![1]);
        assert_eq!(checkpoint_heights(0), Vec::<u64>::new());
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let refs = vec![
            BlockRef { height: 0, hash: "a".into() },
            BlockRef { height: 1, hash: "b".into() },
            BlockRef { height: 0, hash: "a".into() },
            BlockRef { height: 2, hash: "c".into() },
        ];
        assert_eq!(dedup_hashes(refs), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn empty_mirror_has_empty_locator() {
        let (_dir, db) = open_database().await;
        assert!(LocatorBuilder::new(&db).build_locator().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn short_mirror_sends_everything() {
        let (_dir, db) = open_database().await;
        PersistenceEngine::new(&db).insert_blocks(&chain(0, 6, "main")).await.unwrap();

        let locator = LocatorBuilder::new(&db).build_locator().await.unwrap();
        let expected: Vec<String> = (0..6).map(|h| block_hash("main", h)).collect();
        assert_eq!(locator, expected);
    }

    #[tokio::test]
    async fn exactly_tail_length_has_no_duplicates() {
        let (_dir, db) = open_database().await;
        PersistenceEngine::new(&db).insert_blocks(&chain(0, 11, "main")).await.unwrap();

        let locator = LocatorBuilder::new(&db).build_locator().await.unwrap();
        let expected: Vec<String> = (0..11).map(|h| block_hash("main", h)).collect();
        assert_eq!(locator, expected);
    }

    #[tokio::test]
    async fn long_mirror_is_sparse_and_ordered() {
        let (_dir, db) = open_database().await;
        PersistenceEngine::new(&db).insert_blocks(&chain(0, 1_000, "main")).await.unwrap();

        let locator = LocatorBuilder::new(&db).build_locator().await.unwrap();

        assert_eq!(locator.first().unwrap(), &block_hash("main", 0));
        assert_eq!(locator.last().unwrap(), &block_hash("main", 999));

        let unique: HashSet<&String> = locator.iter().collect();
        assert_eq!(unique.len(), locator.len());

        // Hashes encode their height, so lexical order is height order here.
        let mut sorted = locator.clone();
        sorted.sort();
        assert_eq!(sorted, locator);

        // genesis + log2(989) checkpoints + tail
        let checkpoints = locator.len() - 1 - TAIL_LENGTH;
        assert_eq!(checkpoints, 9);
        assert!(locator.contains(&block_hash("main", 989 - 512)));
    }

    #[tokio::test]
    async fn missing_checkpoint_heights_are_skipped() {
        let (_dir, db) = open_database().await;
        let engine = PersistenceEngine::new(&db);
        engine.insert_blocks(&chain(0, 10, "main")).await.unwrap();
        engine.insert_blocks(&chain(40, 20, "main")).await.unwrap();

        let locator = LocatorBuilder::new(&db).build_locator().await.unwrap();

        // tail is 49..=59; checkpoints 47, 45 and 41 exist, 33 and 17 fall in the gap
        let expected: Vec<String> = [0, 41, 45, 47]
            .into_iter()
            .chain(49..60)
            .map(|h| block_hash("main", h))
            .collect();
        assert_eq!(locator, expected);
    }
}
