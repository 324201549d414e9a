//! Fixtures shared by the unit tests

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Mutex;

use async_trait::async_trait;
use rpc_core::*;
use tempfile::TempDir;

use crate::database::Database;

pub(crate) fn block_hash(label: &str, height: u64) -> String {
    format!("{}-{:06}", label, height)
}

/// A well-formed block with a single coinbase transaction.
pub(crate) fn make_block(height: u64, prev: &str, label: &str) -> BlockDetails {
    let hash = block_hash(label, height);
    let coinbase = TransactionDetails {
        hash: format!("{}-tx", hash),
        block_hash: hash.clone(),
        timestamp: 1_500_000_000 + height,
        payment_id: String::new(),
        unlock_time: (height + 40) as i64,
        size: 120,
        extra: TransactionExtra {
            public_key: "ab".repeat(32),
            nonce: vec![],
            raw: vec![1, 2, 3],
        },
        inputs: vec![TransactionInput {
            input_type: "ff".to_string(),
            data: InputData { amount: Some(2_000), input: None },
        }],
        outputs: vec![TransactionOutput {
            global_index: height,
            output: OutputData {
                amount: 2_000,
                target: OutputTarget {
                    target_type: "02".to_string(),
                    data: TargetData { key: "cd".repeat(32) },
                },
            },
        }],
        ..Default::default()
    };

    BlockDetails {
        hash,
        prev_block_hash: prev.to_string(),
        index: height,
        base_reward: 2_000,
        reward: 2_000,
        difficulty: 1_000 + height,
        major_version: 1,
        minor_version: 0,
        nonce: height,
        block_size: 300,
        timestamp: 1_500_000_000 + height,
        transactions: vec![coinbase],
    }
}

/// `count` linked blocks starting at `start`.
pub(crate) fn chain(start: u64, count: u64, label: &str) -> Vec<BlockDetails> {
    (start..start + count)
        .map(|height| {
            let prev = if height == 0 { String::new() } else { block_hash(label, height - 1) };
            make_block(height, &prev, label)
        })
        .collect()
}

pub(crate) async fn open_database() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(&dir.path().join("mirror.db")).await.unwrap();
    db.migrate().await.unwrap();
    (dir, db)
}

/// Scripted remote node backed by an in-memory chain.
#[derive(Default)]
pub(crate) struct MockSource {
    pub chain: Mutex<Vec<BlockDetails>>,
    /// Height-range requests wider than this time out.
    pub max_window: Option<u64>,
    /// Every height-range request wider than zero fails.
    pub always_fail: bool,
    pub requests: Mutex<Vec<Range<u64>>>,
    pub headers: Mutex<VecDeque<std::result::Result<BlockHeader, RpcError>>>,
    pub pool: Mutex<Vec<PoolTransaction>>,
    /// Blocks returned per locator query.
    pub query_limit: usize,
}

impl MockSource {
    pub fn with_chain(chain: Vec<BlockDetails>) -> Self {
        Self {
            chain: Mutex::new(chain),
            query_limit: 100,
            ..Default::default()
        }
    }

    pub fn widths(&self) -> Vec<u64> {
        self.requests.lock().unwrap().iter().map(|r| r.end - r.start).collect()
    }
}

#[async_trait]
impl ChainSource for MockSource {
    async fn get_blocks_by_heights(&self, heights: Range<u64>) -> std::result::Result<Vec<BlockDetails>, RpcError> {
        self.requests.lock().unwrap().push(heights.clone());

        let width = heights.end - heights.start;
        if self.always_fail || self.max_window.map_or(false, |max| width > max) {
            return Err(RpcError::Timeout(width * 1_000));
        }

        Ok(self
            .chain
            .lock()
            .unwrap()
            .iter()
            .filter(|b| heights.contains(&b.index))
            .cloned()
            .collect())
    }

    async fn query_blocks(&self, locator: &[String]) -> std::result::Result<QueryBlocksResponse, RpcError> {
        let chain = self.chain.lock().unwrap();
        let start = chain
            .iter()
            .rev()
            .find(|b| locator.contains(&b.hash))
            .map_or(0, |b| b.index);

        Ok(QueryBlocksResponse {
            status: "OK".to_string(),
            blocks: chain
                .iter()
                .filter(|b| b.index >= start)
                .take(self.query_limit)
                .cloned()
                .collect(),
            start_height: start,
        })
    }

    async fn get_last_block_header(&self) -> std::result::Result<BlockHeader, RpcError> {
        if let Some(scripted) = self.headers.lock().unwrap().pop_front() {
            return scripted;
        }

        let chain = self.chain.lock().unwrap();
        let tip = chain.last().ok_or_else(|| RpcError::Internal("empty chain".into()))?;
        Ok(BlockHeader {
            hash: tip.hash.clone(),
            prev_hash: tip.prev_block_hash.clone(),
            height: tip.index,
            timestamp: tip.timestamp,
        })
    }

    async fn get_transaction_pool(&self) -> std::result::Result<Vec<PoolTransaction>, RpcError> {
        Ok(self.pool.lock().unwrap().clone())
    }

    async fn get_info(&self) -> std::result::Result<serde_json::Value, RpcError> {
        let height = self.chain.lock().unwrap().len();
        Ok(serde_json::json!({ "height": height, "status": "OK" }))
    }
}
