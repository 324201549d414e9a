//! Database connection management

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::database::schema;
use crate::error::Result;

#[derive(Clone)]
pub struct Database {
    pool: sqlx::SqlitePool,
}

impl Database {
    /// Open with default pool settings.
    pub async fn new(database_path: &Path) -> Result<Self> {
        let config = DatabaseConfig {
            path: database_path.to_path_buf(),
            ..DatabaseConfig::default()
        };
        Self::connect(&config).await
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        // Ensure the database directory exists
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &sqlx::SqlitePool {
        &self.pool
    }

    /// Create every table and index that does not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        for statement in schema::SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Schema is up to date");
        Ok(())
    }
}
