//! Database module for the mirror

pub mod schema;
pub mod queries;
pub mod connection;
pub mod persistence;

pub use connection::Database;
pub use persistence::{PersistenceEngine, SqlValue, Statement};
