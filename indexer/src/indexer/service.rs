//! Main indexer service

use std::sync::Arc;
use std::time::Duration;

use rpc_core::ChainSource;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{error, info, warn};

use crate::config::SyncConfig;
use crate::database::queries::BlockQueries;
use crate::database::{Database, PersistenceEngine};
use crate::error::{IndexerError, Result};
use crate::indexer::catch_up::{CatchUpConfig, CatchUpEngine};
use crate::indexer::jobs::{CatchUpJob, ChainLock, InfoSnapshotJob, MonitorJob, PoolSnapshotJob, TipFollowJob};
use crate::indexer::monitor::{ChainMonitor, MonitorEvent};
use crate::indexer::scheduler::Scheduler;

const MONITOR_CHANNEL_CAPACITY: usize = 64;

pub struct IndexerService {
    database: Database,
    source: Arc<dyn ChainSource>,
    config: SyncConfig,
}

impl IndexerService {
    pub fn new(database: Database, source: Arc<dyn ChainSource>, config: SyncConfig) -> Self {
        Self { database, source, config }
    }

    /// Make sure the genesis block is stored. Nothing else can run without it.
    pub async fn bootstrap(&self) -> Result<()> {
        if BlockQueries::have_genesis(self.database.pool()).await? {
            info!("Genesis block already stored");
            return Ok(());
        }

        info!("Fetching genesis block");
        let genesis = self.source.get_genesis().await?;
        if genesis.index != 0 {
            return Err(IndexerError::InvalidBlock {
                height: genesis.index,
                reason: "genesis request returned a non-zero height".to_string(),
            });
        }

        PersistenceEngine::new(&self.database).save_block(&genesis).await?;
        info!("Saved block #0 ({})", genesis.hash);
        Ok(())
    }

    /// The monitor starts without a last-seen hash. The local tip may be far
    /// behind the node, and comparing against it would report a fork.
    fn new_monitor(&self) -> ChainMonitor {
        ChainMonitor::new(self.source.clone(), None)
    }

    /// Run until `shutdown` fires. Only a bootstrap failure is returned as an
    /// error; everything later is logged and retried on the next tick.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!("Starting indexer service");

        let chain_lock: ChainLock = Arc::new(Mutex::new(()));
        let persistence = PersistenceEngine::new(&self.database);
        let (events_tx, mut events_rx) = mpsc::channel(MONITOR_CHANNEL_CAPACITY);

        let engine = CatchUpEngine::new(self.source.clone(), persistence, CatchUpConfig::from(&self.config));

        let mut scheduler = Scheduler::new();
        let tip = scheduler.spawn(
            Arc::new(TipFollowJob::new(self.source.clone(), &self.database, chain_lock.clone())),
            millis(self.config.tip_interval_ms),
            true,
        );
        scheduler.spawn(
            Arc::new(CatchUpJob::new(&self.database, engine, chain_lock)),
            millis(self.config.catch_up_interval_ms),
            true,
        );
        scheduler.spawn(
            Arc::new(PoolSnapshotJob::new(self.source.clone(), &self.database)),
            millis(self.config.pool_interval_ms),
            true,
        );
        scheduler.spawn(
            Arc::new(InfoSnapshotJob::new(self.source.clone(), &self.database)),
            millis(self.config.info_interval_ms),
            true,
        );
        scheduler.spawn(
            Arc::new(MonitorJob::new(self.new_monitor(), events_tx)),
            millis(self.config.monitor_interval_ms),
            true,
        );

        let bootstrapped = tokio::select! {
            result = self.bootstrap() => result,
            _ = shutdown.recv() => {
                scheduler.shutdown().await;
                return Ok(());
            }
        };
        if let Err(e) = bootstrapped {
            error!("Bootstrap failed: {}", e);
            scheduler.shutdown().await;
            return Err(e);
        }

        scheduler.resume_all();
        info!("Triggers started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                event = events_rx.recv() => match event {
                    Some(MonitorEvent::Update(header)) => {
                        info!("Node tip is #{} ({})", header.height, header.hash);
                        tip.nudge();
                    }
                    Some(MonitorEvent::Fork { last_seen, header }) => {
                        warn!("Fork detected: #{} ({}) does not extend {}", header.height, header.hash, last_seen);
                        tip.nudge();
                    }
                    Some(MonitorEvent::Error(e)) => warn!("Polling node tip failed: {}", e),
                    None => break,
                },
            }
        }

        info!("Stopping indexer service");
        scheduler.shutdown().await;
        Ok(())
    }
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{chain, open_database, MockSource};

    #[tokio::test]
    async fn bootstrap_stores_genesis_once() {
        let (_dir, db) = open_database().await;
        let source = Arc::new(MockSource::with_chain(chain(0, 5, "main")));
        let service = IndexerService::new(db.clone(), source.clone(), SyncConfig::default());

        service.bootstrap().await.unwrap();
        service.bootstrap().await.unwrap();

        assert!(BlockQueries::have_genesis(db.pool()).await.unwrap());
        assert_eq!(BlockQueries::count(db.pool()).await.unwrap(), 1);
        assert_eq!(source.widths(), vec![1]);
    }

    #[tokio::test]
    async fn lagging_mirror_does_not_look_like_a_fork() {
        let (_dir, db) = open_database().await;
        let source = Arc::new(MockSource::with_chain(chain(0, 25, "main")));
        let service = IndexerService::new(db.clone(), source, SyncConfig::default());
        service.bootstrap().await.unwrap();

        let mut monitor = service.new_monitor();
        let events = monitor.poll().await;

        assert!(matches!(events.as_slice(), [MonitorEvent::Update(header)] if header.height == 24));
    }

    #[tokio::test]
    async fn bootstrap_failure_is_fatal() {
        let (_dir, db) = open_database().await;
        let source = Arc::new(MockSource {
            always_fail: true,
            ..MockSource::with_chain(chain(0, 5, "main"))
        });
        let service = IndexerService::new(db.clone(), source, SyncConfig::default());
        let (_tx, rx) = broadcast::channel(1);

        let result = service.run(rx).await;

        assert!(matches!(result, Err(IndexerError::Rpc(_))));
        assert_eq!(BlockQueries::count(db.pool()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_follows_node_until_shutdown() {
        let (_dir, db) = open_database().await;
        let source = Arc::new(MockSource::with_chain(chain(0, 25, "main")));
        let config = SyncConfig {
            tip_interval_ms: 10,
            monitor_interval_ms: 10,
            pool_interval_ms: 10,
            info_interval_ms: 10,
            catch_up_interval_ms: 10,
            ..SyncConfig::default()
        };
        let service = IndexerService::new(db.clone(), source, config);
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move { service.run(rx).await });
        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(BlockQueries::count(db.pool()).await.unwrap(), 25);
        let tip = BlockQueries::tip(db.pool()).await.unwrap().unwrap();
        assert_eq!(tip.height, 24);
    }
}
