//! Tip polling and fork detection

use std::sync::Arc;

use rpc_core::{BlockHeader, ChainSource, RpcError};
use tracing::debug;

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// The node's tip changed.
    Update(BlockHeader),
    /// The new tip does not build on the last one we saw.
    Fork { last_seen: String, header: BlockHeader },
    Error(RpcError),
}

/// Remembers the last tip hash the node reported.
///
/// No automatic fork resolution happens here; a fork only raises an event and
/// the next sync works out where the chains agree.
pub struct ChainMonitor {
    source: Arc<dyn ChainSource>,
    last_hash: Option<String>,
}

impl ChainMonitor {
    pub fn new(source: Arc<dyn ChainSource>, last_hash: Option<String>) -> Self {
        Self { source, last_hash }
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    pub fn is_synced(&self) -> bool {
        self.last_hash.is_some()
    }

    /// Ask for the tip once. A failure leaves the state untouched.
    pub async fn poll(&mut self) -> Vec<MonitorEvent> {
        let header = match self.source.get_last_block_header().await {
            Ok(header) => header,
            Err(e) => return vec![MonitorEvent::Error(e)],
        };

        if self.last_hash.as_deref() == Some(header.hash.as_str()) {
            return Vec::new();
        }

        let mut events = Vec::with_capacity(2);
        if let Some(last_seen) = self.last_hash.take() {
            if header.prev_hash != last_seen {
                debug!("Tip {} does not extend {}", header.hash, last_seen);
                events.push(MonitorEvent::Fork { last_seen, header: header.clone() });
            }
        }

        self.last_hash = Some(header.hash.clone());
        events.push(MonitorEvent::Update(header));
        events
    }
}
