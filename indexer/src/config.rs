use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{IndexerError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub node: NodeConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub url: String,
    /// Timeout of a single-block request.
    pub timeout_ms: u64,
    /// Added to the timeout for every block requested in a window.
    pub per_block_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub tip_interval_ms: u64,
    pub monitor_interval_ms: u64,
    pub pool_interval_ms: u64,
    pub info_interval_ms: u64,
    pub catch_up_interval_ms: u64,
    pub catch_up_window: u64,
    pub ramp_up_after: u32,
    pub max_failures_at_floor: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./chain_mirror.db"),
            max_connections: 10,
            busy_timeout_ms: 30_000,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:11898".to_string(),
            timeout_ms: 2_000,
            per_block_timeout_ms: 1_000,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tip_interval_ms: 2_000,
            monitor_interval_ms: 5_000,
            pool_interval_ms: 10_000,
            info_interval_ms: 15_000,
            catch_up_interval_ms: 30_000,
            catch_up_window: 100,
            ramp_up_after: 10,
            max_failures_at_floor: 3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Load configuration from file if it exists, otherwise use defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| IndexerError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Override config with CLI arguments
    pub fn apply_cli_overrides(&mut self, args: &crate::cli::Args) {
        if let Some(path) = &args.database {
            self.database.path = path.clone();
        }

        if let Some(url) = &args.node_url {
            self.node.url = url.clone();
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }

        if let Some(window) = args.catch_up_window {
            self.sync.catch_up_window = window;
        }
    }

    /// `DATABASE_URL` and `NODE_RPC_URL` win over file and CLI values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.path = PathBuf::from(url.trim_start_matches("sqlite:"));
        }

        if let Ok(url) = std::env::var("NODE_RPC_URL") {
            self.node.url = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.max_connections == 0 {
            return Err(IndexerError::Config("database.max_connections must be at least 1".into()));
        }
        if self.sync.catch_up_window == 0 {
            return Err(IndexerError::Config("sync.catch_up_window must be at least 1".into()));
        }

        let intervals = [
            ("tip_interval_ms", self.sync.tip_interval_ms),
            ("monitor_interval_ms", self.sync.monitor_interval_ms),
            ("pool_interval_ms", self.sync.pool_interval_ms),
            ("info_interval_ms", self.sync.info_interval_ms),
            ("catch_up_interval_ms", self.sync.catch_up_interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(IndexerError::Config(format!("sync.{} must be positive", name)));
            }
        }

        Ok(())
    }
}

impl NodeConfig {
    /// Timeout for a request covering `blocks` blocks.
    pub fn timeout_for(&self, blocks: u64) -> Duration {
        let extra = self.per_block_timeout_ms.saturating_mul(blocks.saturating_sub(1));
        Duration::from_millis(self.timeout_ms.saturating_add(extra))
    }
}
