//! Remote chain source contract

use std::ops::Range;

use async_trait::async_trait;
use crate::model::*;

/// Operations the mirror needs from a remote node.
///
/// Every call is a fallible request/response that may time out. The mirror
/// treats the answers as authoritative and never re-validates them.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Block details for every height in `[heights.start, heights.end)`.
    async fn get_blocks_by_heights(&self, heights: Range<u64>) -> Result<Vec<BlockDetails>, RpcError>;

    /// Ask the node where our locator diverges from its chain.
    ///
    /// The reply carries the blocks from the first point of agreement onward
    /// together with the height of the first returned block.
    async fn query_blocks(&self, locator: &[String]) -> Result<QueryBlocksResponse, RpcError>;

    async fn get_last_block_header(&self) -> Result<BlockHeader, RpcError>;

    async fn get_transaction_pool(&self) -> Result<Vec<PoolTransaction>, RpcError>;

    /// Node status payload, stored opaquely.
    async fn get_info(&self) -> Result<serde_json::Value, RpcError>;

    async fn get_genesis(&self) -> Result<BlockDetails, RpcError> {
        self.get_blocks_by_heights(0..1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RpcError::Internal("Node returned no genesis block".to_string()))
    }
}
