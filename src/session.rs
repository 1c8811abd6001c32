//! Background polling session driving the epoch tracker and the
//! auto-reveal pass.
//!
//! One session wraps one orchestrator. `start` spawns a polling task
//! that refreshes the epoch view on every tick and hands it to the
//! state machine; `stop` shuts the task down and waits for it to
//! finish. A stopped session can be started again.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};

use crate::orchestrator::Orchestrator;

/// Default poll cadence, half the block time.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

pub struct Session {
    orchestrator: Arc<Mutex<Orchestrator>>,
    poll_interval: Duration,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(orchestrator: Arc<Mutex<Orchestrator>>) -> Self {
        Self::with_interval(orchestrator, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_interval(orchestrator: Arc<Mutex<Orchestrator>>, poll_interval: Duration) -> Self {
        Self {
            orchestrator,
            poll_interval,
            shutdown: None,
            task: None,
        }
    }

    /// Shared handle to the orchestrator, for submitting orders while
    /// the poll task runs.
    pub fn orchestrator(&self) -> Arc<Mutex<Orchestrator>> {
        self.orchestrator.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Spawn the polling task. Starting a running session is a no-op.
    pub fn start(&mut self) {
        if self.is_running() {
            log::warn!("session already running; start ignored");
            return;
        }

        let (tx, mut rx) = watch::channel(false);
        let orchestrator = self.orchestrator.clone();
        let poll_interval = self.poll_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut orch = orchestrator.lock().await;
                        let info = orch.epochs.refresh().await;
                        if let Some(info) = info {
                            if let Err(err) = orch.on_epoch_tick(info).await {
                                log::warn!("epoch tick failed: {err}");
                            }
                        }
                    }
                    _ = rx.changed() => {
                        log::info!("session poll task shutting down");
                        break;
                    }
                }
            }
        });

        self.shutdown = Some(tx);
        self.task = Some(task);
        log::info!(
            "session started, polling every {}s",
            self.poll_interval.as_secs()
        );
    }

    /// Signal the polling task to stop and wait for it to exit.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                log::warn!("session poll task ended abnormally: {err}");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Dropping the sender closes the channel, which also wakes the
        // task out of `rx.changed()`.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
