//! Sync engine: keeps the local mirror in step with the node

pub mod catch_up;
pub mod gaps;
pub mod jobs;
pub mod locator;
pub mod monitor;
pub mod scheduler;
pub mod service;

pub use catch_up::{CatchUpConfig, CatchUpEngine};
pub use gaps::GapDetector;
pub use jobs::SyncOutcome;
pub use locator::LocatorBuilder;
pub use monitor::{ChainMonitor, MonitorEvent};
pub use scheduler::{Job, Scheduler, TriggerHandle};
pub use service::IndexerService;
