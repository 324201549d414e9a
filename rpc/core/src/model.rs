//! RPC data models and types
//!
//! Field names follow the node's JSON (camelCase block details, snake_case
//! headers and pool entries).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Discriminant of a coinbase (miner) input.
pub const COINBASE_INPUT_TYPE: u8 = 0xff;

/// RPC error type
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum RpcError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("Node replied with status {0}")]
    Status(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDetails {
    pub hash: String,
    #[serde(default)]
    pub prev_block_hash: String,
    /// Height of the block.
    pub index: u64,
    #[serde(default)]
    pub base_reward: u64,
    #[serde(default)]
    pub reward: u64,
    #[serde(default)]
    pub difficulty: u64,
    #[serde(default)]
    pub major_version: u8,
    #[serde(default)]
    pub minor_version: u8,
    #[serde(default)]
    pub nonce: u64,
    #[serde(default)]
    pub block_size: u64,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub transactions: Vec<TransactionDetails>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDetails {
    pub hash: String,
    pub block_hash: String,
    #[serde(default)]
    pub mixin: u64,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub payment_id: String,
    /// Serialized by the node as a signed 64-bit integer even though the
    /// value is unsigned, so large values arrive negative.
    #[serde(default)]
    pub unlock_time: i64,
    #[serde(default)]
    pub fee: u64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub extra: TransactionExtra,
    #[serde(default)]
    pub inputs: Vec<TransactionInput>,
    #[serde(default)]
    pub outputs: Vec<TransactionOutput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionExtra {
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub nonce: Vec<u8>,
    #[serde(default)]
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionInput {
    /// Hex discriminant, `ff` for coinbase inputs.
    #[serde(rename = "type")]
    pub input_type: String,
    #[serde(default)]
    pub data: InputData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputData {
    /// Present on coinbase inputs.
    #[serde(default)]
    pub amount: Option<u64>,
    /// Present on key inputs.
    #[serde(default)]
    pub input: Option<KeyInput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyInput {
    #[serde(default)]
    pub amount: u64,
    #[serde(default)]
    pub k_image: String,
}

impl TransactionInput {
    /// Numeric discriminant, `None` when the node sent something that is not hex.
    pub fn type_code(&self) -> Option<u8> {
        u8::from_str_radix(self.input_type.trim(), 16).ok()
    }

    pub fn is_coinbase(&self) -> bool {
        self.type_code() == Some(COINBASE_INPUT_TYPE)
    }

    /// The amount lives in a different place for coinbase and key inputs.
    pub fn amount(&self) -> u64 {
        if self.is_coinbase() {
            self.data.amount.unwrap_or_default()
        } else {
            self.data.input.as_ref().map(|i| i.amount).unwrap_or_default()
        }
    }

    /// Coinbase inputs carry no key image.
    pub fn key_image(&self) -> &str {
        if self.is_coinbase() {
            ""
        } else {
            self.data.input.as_ref().map(|i| i.k_image.as_str()).unwrap_or("")
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOutput {
    #[serde(default)]
    pub global_index: u64,
    pub output: OutputData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputData {
    #[serde(default)]
    pub amount: u64,
    #[serde(default)]
    pub target: OutputTarget,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputTarget {
    #[serde(rename = "type", default)]
    pub target_type: String,
    #[serde(default)]
    pub data: TargetData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetData {
    #[serde(default)]
    pub key: String,
}

impl TransactionOutput {
    pub fn type_code(&self) -> Option<u8> {
        u8::from_str_radix(self.output.target.target_type.trim(), 16).ok()
    }
}

/// Reply to a locator query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryBlocksResponse {
    pub status: String,
    #[serde(default)]
    pub blocks: Vec<BlockDetails>,
    #[serde(default)]
    pub start_height: u64,
}

impl QueryBlocksResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "OK"
    }
}

/// Tip header as returned by the node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: String,
    pub prev_hash: String,
    #[serde(default)]
    pub height: u64,
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolTransaction {
    #[serde(rename = "tx_hash", alias = "hash")]
    pub hash: String,
    #[serde(default)]
    pub fee: u64,
    #[serde(default)]
    pub amount_out: u64,
    #[serde(default)]
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coinbase_input_reads_outer_amount() {
        let input: TransactionInput = serde_json::from_value(serde_json::json!({
            "type": "ff",
            "data": { "amount": 2_000_000, "input": { "height": 7 } }
        }))
        .unwrap();

        assert!(input.is_coinbase());
        assert_eq!(input.amount(), 2_000_000);
        assert_eq!(input.key_image(), "");
        assert_eq!(input.type_code(), Some(255));
    }

    #[test]
    fn key_input_reads_nested_amount_and_image() {
        let input: TransactionInput = serde_json::from_value(serde_json::json!({
            "type": "02",
            "data": { "input": { "amount": 150, "k_image": "ab".repeat(32) } }
        }))
        .unwrap();

        assert!(!input.is_coinbase());
        assert_eq!(input.amount(), 150);
        assert_eq!(input.key_image(), "ab".repeat(32));
        assert_eq!(input.type_code(), Some(2));
    }

    #[test]
    fn block_details_accept_negative_unlock_time() {
        let block: BlockDetails = serde_json::from_value(serde_json::json!({
            "hash": "aa",
            "prevBlockHash": "bb",
            "index": 3,
            "difficulty": 10,
            "blockSize": 100,
            "timestamp": 1_500_000_000u64,
            "transactions": [{
                "hash": "cc",
                "blockHash": "aa",
                "unlockTime": -1,
                "outputs": [{
                    "globalIndex": 4,
                    "output": { "amount": 5, "target": { "type": "02", "data": { "key": "dd" } } }
                }]
            }]
        }))
        .unwrap();

        assert_eq!(block.index, 3);
        assert_eq!(block.transactions[0].unlock_time, -1);
        assert_eq!(block.transactions[0].outputs[0].type_code(), Some(2));
    }
}
