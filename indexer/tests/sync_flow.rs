//! End-to-end sync against an in-memory node: bootstrap, locator sync, reorg.

use std::ops::Range;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chain_mirror::database::queries::{BlockQueries, GapQueries, TransactionQueries};
use chain_mirror::database::{Database, PersistenceEngine};
use chain_mirror::indexer::jobs::TipFollowJob;
use chain_mirror::indexer::{CatchUpConfig, CatchUpEngine, IndexerService, SyncOutcome};
use chain_mirror::config::SyncConfig;
use rpc_core::*;
use tempfile::TempDir;
use tokio::sync::Mutex as AsyncMutex;

struct Node {
    chain: Mutex<Vec<BlockDetails>>,
}

impl Node {
    fn new(chain: Vec<BlockDetails>) -> Arc<Self> {
        Arc::new(Self { chain: Mutex::new(chain) })
    }

    fn replace(&self, chain: Vec<BlockDetails>) {
        *self.chain.lock().unwrap() = chain;
    }
}

#[async_trait]
impl ChainSource for Node {
    async fn get_blocks_by_heights(&self, heights: Range<u64>) -> Result<Vec<BlockDetails>, RpcError> {
        Ok(self
            .chain
            .lock()
            .unwrap()
            .iter()
            .filter(|b| heights.contains(&b.index))
            .cloned()
            .collect())
    }

    async fn query_blocks(&self, locator: &[String]) -> Result<QueryBlocksResponse, RpcError> {
        let chain = self.chain.lock().unwrap();
        let start = chain
            .iter()
            .rev()
            .find(|b| locator.contains(&b.hash))
            .map_or(0, |b| b.index);

        Ok(QueryBlocksResponse {
            status: "OK".to_string(),
            blocks: chain.iter().filter(|b| b.index >= start).take(50).cloned().collect(),
            start_height: start,
        })
    }

    async fn get_last_block_header(&self) -> Result<BlockHeader, RpcError> {
        let chain = self.chain.lock().unwrap();
        let tip = chain.last().ok_or_else(|| RpcError::Internal("empty".into()))?;
        Ok(BlockHeader {
            hash: tip.hash.clone(),
            prev_hash: tip.prev_block_hash.clone(),
            height: tip.index,
            timestamp: tip.timestamp,
        })
    }

    async fn get_transaction_pool(&self) -> Result<Vec<PoolTransaction>, RpcError> {
        Ok(vec![])
    }

    async fn get_info(&self) -> Result<serde_json::Value, RpcError> {
        Ok(serde_json::json!({ "status": "OK" }))
    }
}

fn hash(label: &str, height: u64) -> String {
    format!("{}{:08x}", label, height)
}

fn block(height: u64, prev: String, label: &str) -> BlockDetails {
    let hash = hash(label, height);
    let spend = TransactionDetails {
        hash: format!("{}-spend", hash),
        block_hash: hash.clone(),
        timestamp: 1_600_000_000 + height,
        payment_id: "0".repeat(64),
        unlock_time: -1,
        fee: 10,
        size: 400,
        inputs: vec![TransactionInput {
            input_type: "02".to_string(),
            data: InputData {
                amount: None,
                input: Some(KeyInput {
                    amount: 100,
                    k_image: format!("{}-image", hash),
                }),
            },
        }],
        outputs: vec![TransactionOutput {
            global_index: height * 2,
            output: OutputData {
                amount: 90,
                target: OutputTarget {
                    target_type: "02".to_string(),
                    data: TargetData { key: "ee".repeat(32) },
                },
            },
        }],
        ..Default::default()
    };

    BlockDetails {
        hash,
        prev_block_hash: prev,
        index: height,
        difficulty: 5_000,
        block_size: 800,
        timestamp: 1_600_000_000 + height,
        transactions: vec![spend],
        ..Default::default()
    }
}

/// Heights `0..len`, switching to `fork_label` from `fork_at` on.
fn build_chain(len: u64, fork_at: Option<(u64, &str)>) -> Vec<BlockDetails> {
    let mut blocks: Vec<BlockDetails> = Vec::new();
    for height in 0..len {
        let label = match fork_at {
            Some((at, label)) if height >= at => label,
            _ => "aa",
        };
        let prev = blocks.last().map(|b| b.hash.clone()).unwrap_or_default();
        blocks.push(block(height, prev, label));
    }
    blocks
}

async fn database() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(&dir.path().join("sync.db")).await.unwrap();
    db.migrate().await.unwrap();
    (dir, db)
}

#[tokio::test]
async fn bootstrap_sync_and_reorg() {
    let (_dir, db) = database().await;
    let node = Node::new(build_chain(120, None));
    let chain_lock = Arc::new(AsyncMutex::new(()));

    IndexerService::new(db.clone(), node.clone(), SyncConfig::default())
        .bootstrap()
        .await
        .unwrap();
    assert_eq!(BlockQueries::count(db.pool()).await.unwrap(), 1);

    let tip_follow = TipFollowJob::new(node.clone(), &db, chain_lock);
    let mut rounds = 0;
    while tip_follow.sync().await.unwrap() != SyncOutcome::AlreadyAtTip {
        rounds += 1;
        assert!(rounds < 10, "sync did not converge");
    }
    assert_eq!(BlockQueries::count(db.pool()).await.unwrap(), 120);

    // Wrapped unlock time and all-zero payment id are normalized on the way in.
    let spend = format!("{}-spend", hash("aa", 7));
    assert_eq!(
        TransactionQueries::unlock_time(db.pool(), &spend).await.unwrap().as_deref(),
        Some("18446744073709551615")
    );
    assert_eq!(TransactionQueries::payment_id(db.pool(), &spend).await.unwrap().as_deref(), Some(""));

    // The node drops the last 15 blocks and builds a longer branch.
    node.replace(build_chain(130, Some((105, "bb"))));
    let SyncOutcome::Synced(report) = tip_follow.sync().await.unwrap() else {
        panic!("expected the reorg to be applied");
    };
    assert!(report.deletes > 0);

    let at_fork = BlockQueries::hash_at_height(db.pool(), 105).await.unwrap().unwrap();
    assert_eq!(at_fork.hash, hash("bb", 105));
    let tip = BlockQueries::tip(db.pool()).await.unwrap().unwrap();
    assert_eq!((tip.height, tip.hash), (129, hash("bb", 129)));

    assert_eq!(BlockQueries::count(db.pool()).await.unwrap(), 130);
    assert_eq!(TransactionQueries::orphaned_children(db.pool()).await.unwrap(), 0);
    assert!(TransactionQueries::hashes_for_block(db.pool(), &hash("aa", 110)).await.unwrap().is_empty());
    assert!(GapQueries::missing_ranges(db.pool()).await.unwrap().is_empty());
}

#[tokio::test]
async fn catch_up_fills_hole_left_by_partial_history() {
    let (_dir, db) = database().await;
    let full = build_chain(60, None);
    let persistence = PersistenceEngine::new(&db);
    persistence.insert_blocks(&full[..10]).await.unwrap();
    persistence.insert_blocks(&full[40..]).await.unwrap();

    let missing = GapQueries::missing_ranges(db.pool()).await.unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!((missing[0].lower_bound, missing[0].upper_bound), (10, 39));

    let node = Node::new(full);
    let config = CatchUpConfig {
        window: 8,
        ..CatchUpConfig::default()
    };
    let mut engine = CatchUpEngine::new(node, persistence, config);

    assert_eq!(engine.run(missing[0]).await.unwrap(), 30);
    assert!(GapQueries::missing_ranges(db.pool()).await.unwrap().is_empty());
    assert_eq!(BlockQueries::count(db.pool()).await.unwrap(), 60);
}
