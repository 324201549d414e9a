//! Chain mirror
//!
//! Keeps a relational copy of a remote node's blockchain: blocks,
//! transactions, inputs, outputs, the pending pool and node metadata. The
//! copy survives node restarts, reorgs, RPC timeouts and its own crashes.

pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod indexer;
pub mod models;
pub mod rpc_client;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{IndexerError, Result};
