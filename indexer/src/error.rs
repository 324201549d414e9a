//! Error types for the indexer

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A multi-statement write was rolled back. Carries the statement or
    /// commit error that caused it.
    #[error("Transaction failed: {0}")]
    TransactionFailed(#[source] sqlx::Error),

    #[error("RPC error: {0}")]
    Rpc(#[from] rpc_core::RpcError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid block at height {height}: {reason}")]
    InvalidBlock { height: u64, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Catch-up stalled, heights {lower_bound}..={upper_bound} still missing")]
    CatchUpStalled { lower_bound: u64, upper_bound: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, IndexerError>;

impl IndexerError {
    /// Errors that come from the remote node rather than from us.
    pub fn is_transport(&self) -> bool {
        matches!(self, IndexerError::Rpc(_))
    }
}
