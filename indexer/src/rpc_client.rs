//! JSON-RPC client for the remote node, over websocket

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rpc_core::{BlockDetails, BlockHeader, ChainSource, PoolTransaction, QueryBlocksResponse, RpcError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::trace;

use crate::config::NodeConfig;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    id: u64,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct BlocksReply {
    status: String,
    #[serde(default)]
    blocks: Vec<BlockDetails>,
}

#[derive(Debug, Deserialize)]
struct HeaderReply {
    status: String,
    block_header: BlockHeader,
}

#[derive(Debug, Deserialize)]
struct PoolReply {
    status: String,
    #[serde(default)]
    transactions: Vec<PoolTransaction>,
}

fn check_status(status: &str) -> Result<(), RpcError> {
    if status == "OK" {
        Ok(())
    } else {
        Err(RpcError::Status(status.to_string()))
    }
}

fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError::Internal(format!("Deserialization error: {}", e)))
}

pub struct RpcClient {
    config: NodeConfig,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            config: config.clone(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    async fn call_method(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, RpcError> {
        match tokio::time::timeout(timeout, self.exchange(method, params)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout(timeout.as_millis() as u64)),
        }
    }

    async fn exchange(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
        let (ws_stream, _) = connect_async(self.config.url.as_str())
            .await
            .map_err(|e| RpcError::Network(format!("WebSocket connection failed: {}", e)))?;

        let (mut write, mut read) = ws_stream.split();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        let request_json = serde_json::to_string(&request)
            .map_err(|e| RpcError::Internal(format!("Request serialization failed: {}", e)))?;
        trace!(method, id, "Sending request");

        write
            .send(Message::Text(request_json))
            .await
            .map_err(|e| RpcError::Network(format!("Send failed: {}", e)))?;

        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    let response: JsonRpcResponse = serde_json::from_str(&text)
                        .map_err(|e| RpcError::Internal(format!("Response parsing failed: {}", e)))?;

                    if response.id != id {
                        continue;
                    }

                    if let Some(error) = response.error {
                        return Err(RpcError::Rpc {
                            code: error.code,
                            message: error.message,
                        });
                    }

                    let _ = write.close().await;
                    return Ok(response.result);
                }
                Ok(Message::Close(_)) => break,
                Err(e) => return Err(RpcError::Network(format!("WebSocket error: {}", e))),
                _ => continue,
            }
        }

        Err(RpcError::Network("Connection closed without response".to_string()))
    }

    fn base_timeout(&self) -> Duration {
        self.config.timeout_for(1)
    }
}

#[async_trait]
impl ChainSource for RpcClient {
    async fn get_blocks_by_heights(&self, heights: Range<u64>) -> Result<Vec<BlockDetails>, RpcError> {
        let count = heights.end.saturating_sub(heights.start);
        let params = serde_json::json!({ "blockHeights": heights.collect::<Vec<u64>>() });

        let result = self
            .call_method("getblocksdetailsbyheights", params, self.config.timeout_for(count))
            .await?;
        let reply: BlocksReply = decode(result)?;
        check_status(&reply.status)?;
        Ok(reply.blocks)
    }

    async fn query_blocks(&self, locator: &[String]) -> Result<QueryBlocksResponse, RpcError> {
        let params = serde_json::json!({
            "blockIds": locator,
            "timestamp": 0,
        });

        let result = self.call_method("queryblocksdetailed", params, self.base_timeout()).await?;
        decode(result)
    }

    async fn get_last_block_header(&self) -> Result<BlockHeader, RpcError> {
        let result = self
            .call_method("getlastblockheader", serde_json::json!({}), self.base_timeout())
            .await?;
        let reply: HeaderReply = decode(result)?;
        check_status(&reply.status)?;
        Ok(reply.block_header)
    }

    async fn get_transaction_pool(&self) -> Result<Vec<PoolTransaction>, RpcError> {
        let result = self
            .call_method("f_on_transactions_pool_json", serde_json::json!({}), self.base_timeout())
            .await?;
        let reply: PoolReply = decode(result)?;
        check_status(&reply.status)?;
        Ok(reply.transactions)
    }

    async fn get_info(&self) -> Result<serde_json::Value, RpcError> {
        let result = self.call_method("getinfo", serde_json::json!({}), self.base_timeout()).await?;
        if let Some(status) = result.get("status").and_then(|s| s.as_str()) {
            check_status(status)?;
        }
        Ok(result)
    }
}
