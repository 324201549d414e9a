//! Pausable periodic triggers
//!
//! Each trigger owns one task that waits for its interval (or a nudge), then
//! runs its job to completion before waiting again. A tick that arrives while
//! the job is still running is absorbed, so runs of the same trigger never
//! overlap. Different triggers run independently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::Result;

/// Work run by a trigger. Returning an error logs it and re-arms the trigger.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<()>;
}

#[derive(Default)]
struct TriggerState {
    paused: AtomicBool,
    busy: AtomicBool,
    runs: AtomicU64,
    nudge: Notify,
}

/// Control side of a running trigger.
#[derive(Clone)]
pub struct TriggerHandle {
    name: &'static str,
    state: Arc<TriggerState>,
}

impl TriggerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.state.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.state.busy.load(Ordering::Acquire)
    }

    /// Completed runs, successful or not.
    pub fn runs(&self) -> u64 {
        self.state.runs.load(Ordering::Acquire)
    }

    /// Run as soon as the trigger is idle instead of waiting for the next
    /// tick. Nudges that arrive during a run collapse into one follow-up run.
    pub fn nudge(&self) {
        self.state.nudge.notify_one();
    }
}

pub struct Scheduler {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    triggers: HashMap<&'static str, TriggerHandle>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_tx,
            tasks: Vec::new(),
            triggers: HashMap::new(),
        }
    }

    /// Start a trigger running `job` every `period`.
    pub fn spawn(&mut self, job: Arc<dyn Job>, period: Duration, paused: bool) -> TriggerHandle {
        let handle = TriggerHandle {
            name: job.name(),
            state: Arc::new(TriggerState::default()),
        };
        handle.state.paused.store(paused, Ordering::Release);

        let shutdown_rx = self.shutdown_tx.subscribe();
        self.tasks.push(tokio::spawn(drive(job, period, handle.state.clone(), shutdown_rx)));
        self.triggers.insert(handle.name, handle.clone());
        handle
    }

    pub fn trigger(&self, name: &str) -> Option<&TriggerHandle> {
        self.triggers.get(name)
    }

    pub fn resume_all(&self) {
        for trigger in self.triggers.values() {
            trigger.resume();
        }
    }

    /// Stop every trigger, letting in-flight runs finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Trigger task ended abnormally: {}", e);
            }
        }
    }
}

async fn drive(job: Arc<dyn Job>, period: Duration, state: Arc<TriggerState>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {}
            _ = state.nudge.notified() => {}
        }

        if state.paused.load(Ordering::Acquire) {
            continue;
        }

        state.busy.store(true, Ordering::Release);
        let result = job.run().await;
        state.busy.store(false, Ordering::Release);
        state.runs.fetch_add(1, Ordering::AcqRel);

        if let Err(e) = result {
            warn!(trigger = job.name(), "Tick failed: {}", e);
        }
    }

    debug!(trigger = job.name(), "Trigger stopped");
}
