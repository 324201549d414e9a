//! Periodic work run by the scheduler

use std::sync::Arc;

use async_trait::async_trait;
use rpc_core::{ChainSource, RpcError};
use sqlx::SqlitePool;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::database::queries::BlockQueries;
use crate::database::{Database, PersistenceEngine};
use crate::error::{IndexerError, Result};
use crate::indexer::catch_up::CatchUpEngine;
use crate::indexer::gaps::GapDetector;
use crate::indexer::locator::LocatorBuilder;
use crate::indexer::monitor::{ChainMonitor, MonitorEvent};
use crate::indexer::scheduler::Job;
use crate::models::{MissingRange, SaveReport};

pub const TIP_FOLLOW: &str = "tip-follow";
pub const CATCH_UP: &str = "catch-up";
pub const POOL_SNAPSHOT: &str = "pool-snapshot";
pub const INFO_SNAPSHOT: &str = "info-snapshot";
pub const MONITOR: &str = "monitor";

/// Key the node's `getinfo` payload is stored under.
pub const INFO_KEY: &str = "getinfo";

/// Serializes writers that touch the chain tables.
pub type ChainLock = Arc<Mutex<()>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    AlreadyAtTip,
    Synced(SaveReport),
}

pub struct TipFollowJob {
    source: Arc<dyn ChainSource>,
    pool: SqlitePool,
    locator: LocatorBuilder,
    persistence: PersistenceEngine,
    chain_lock: ChainLock,
}

impl TipFollowJob {
    pub fn new(source: Arc<dyn ChainSource>, database: &Database, chain_lock: ChainLock) -> Self {
        Self {
            source,
            pool: database.pool().clone(),
            locator: LocatorBuilder::new(database),
            persistence: PersistenceEngine::new(database),
            chain_lock,
        }
    }

    /// One locator round trip. Whatever the node sends back replaces the
    /// local chain from its start height upwards.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let _guard = self.chain_lock.lock().await;

        let locator = self.locator.build_locator().await?;
        let response = self.source.query_blocks(&locator).await?;
        if !response.is_ok() {
            return Err(RpcError::Status(response.status).into());
        }

        let Some(last) = response.blocks.last() else {
            debug!("Already at tip");
            return Ok(SyncOutcome::AlreadyAtTip);
        };

        let tip = BlockQueries::tip(&self.pool).await?;
        if tip.as_ref().map(|t| t.hash.as_str()) == Some(last.hash.as_str()) {
            debug!("Already at tip");
            return Ok(SyncOutcome::AlreadyAtTip);
        }

        if let Some(first) = response.blocks.first() {
            if first.index != response.start_height {
                return Err(IndexerError::InvalidBlock {
                    height: first.index,
                    reason: format!("reply starts at {} but first block is {}", response.start_height, first.index),
                });
            }
        }

        let report = self.persistence.save_blocks(&response.blocks, response.start_height).await?;
        for (height, hash) in &report.blocks {
            info!("Saved block #{} ({})", height, hash);
        }
        info!(
            "Synced from height {}: {} deletes, {} inserts",
            response.start_height, report.deletes, report.inserts
        );

        Ok(SyncOutcome::Synced(report))
    }
}

#[async_trait]
impl Job for TipFollowJob {
    fn name(&self) -> &'static str {
        TIP_FOLLOW
    }

    async fn run(&self) -> Result<()> {
        self.sync().await.map(|_| ())
    }
}

pub struct CatchUpJob {
    gaps: GapDetector,
    engine: Mutex<CatchUpEngine>,
    chain_lock: ChainLock,
}

impl CatchUpJob {
    pub fn new(database: &Database, engine: CatchUpEngine, chain_lock: ChainLock) -> Self {
        Self {
            gaps: GapDetector::new(database),
            engine: Mutex::new(engine),
            chain_lock,
        }
    }

    /// Finish the range a stalled run left behind if it is still missing,
    /// otherwise fill the lowest gap. Returns the number of blocks stored.
    pub async fn fill_next_gap(&self) -> Result<u64> {
        let _guard = self.chain_lock.lock().await;
        let mut engine = self.engine.lock().await;

        let missing = self.gaps.detect_missing().await?;
        let resumed = engine.remaining().and_then(|left| resume_within(left, &missing));
        let Some(target) = resumed.or_else(|| missing.first().copied()) else {
            debug!("Nothing missing");
            return Ok(0);
        };

        if resumed.is_some() {
            debug!("Resuming catch-up at {}..={}", target.lower_bound, target.upper_bound);
        } else if missing.len() > 1 {
            debug!("{} gaps pending, filling {}..={}", missing.len(), target.lower_bound, target.upper_bound);
        }

        engine.run(target).await
    }
}

/// The part of `left` that the gap containing its start still lacks.
fn resume_within(left: MissingRange, missing: &[MissingRange]) -> Option<MissingRange> {
    missing
        .iter()
        .find(|gap| gap.lower_bound <= left.lower_bound && left.lower_bound <= gap.upper_bound)
        .map(|gap| MissingRange::new(left.lower_bound, gap.upper_bound.min(left.upper_bound)))
}

#[async_trait]
impl Job for CatchUpJob {
    fn name(&self) -> &'static str {
        CATCH_UP
    }

    async fn run(&self) -> Result<()> {
        self.fill_next_gap().await.map(|_| ())
    }
}

pub struct PoolSnapshotJob {
    source: Arc<dyn ChainSource>,
    persistence: PersistenceEngine,
}

impl PoolSnapshotJob {
    pub fn new(source: Arc<dyn ChainSource>, database: &Database) -> Self {
        Self {
            source,
            persistence: PersistenceEngine::new(database),
        }
    }
}

#[async_trait]
impl Job for PoolSnapshotJob {
    fn name(&self) -> &'static str {
        POOL_SNAPSHOT
    }

    async fn run(&self) -> Result<()> {
        let transactions = self.source.get_transaction_pool().await?;
        self.persistence.save_transaction_pool(&transactions).await?;
        Ok(())
    }
}

pub struct InfoSnapshotJob {
    source: Arc<dyn ChainSource>,
    persistence: PersistenceEngine,
}

impl InfoSnapshotJob {
    pub fn new(source: Arc<dyn ChainSource>, database: &Database) -> Self {
        Self {
            source,
            persistence: PersistenceEngine::new(database),
        }
    }
}

#[async_trait]
impl Job for InfoSnapshotJob {
    fn name(&self) -> &'static str {
        INFO_SNAPSHOT
    }

    async fn run(&self) -> Result<()> {
        let info = self.source.get_info().await?;
        self.persistence.save_info(INFO_KEY, &info).await
    }
}

/// Polls the node's tip and forwards what it sees.
pub struct MonitorJob {
    monitor: Mutex<ChainMonitor>,
    events: mpsc::Sender<MonitorEvent>,
}

impl MonitorJob {
    pub fn new(monitor: ChainMonitor, events: mpsc::Sender<MonitorEvent>) -> Self {
        Self {
            monitor: Mutex::new(monitor),
            events,
        }
    }
}

#[async_trait]
impl Job for MonitorJob {
    fn name(&self) -> &'static str {
        MONITOR
    }

    async fn run(&self) -> Result<()> {
        let events = self.monitor.lock().await.poll().await;
        for event in events {
            self.events
                .send(event)
                .await
                .map_err(|_| IndexerError::Internal("monitor event channel closed".into()))?;
        }
        Ok(())
    }
}
