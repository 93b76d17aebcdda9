//! Background reclamation of expired buckets.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::bucket::BucketStore;
use crate::error::{RatekeeperError, Result};

/// Periodically removes buckets whose window has elapsed.
///
/// The task runs on the tokio runtime that was current when it started.
/// Removal goes through [`BucketStore::sweep_expired`], so it never races
/// a concurrent rollover into an inconsistent state.
pub struct Sweeper {
    interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Sweeper {
    /// Start sweeping `store` every `interval`.
    ///
    /// Fails if called outside a tokio runtime or with a zero interval.
    pub fn start(store: Arc<BucketStore>, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(RatekeeperError::Config(
                "sweep interval must be greater than zero".to_string(),
            ));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RatekeeperError::Runtime(format!("cannot start sweeper: {}", e)))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runtime.spawn(run(store, interval, shutdown_rx));

        info!(interval = ?interval, "Bucket sweeper started");

        Ok(Self {
            interval,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Whether the background task has not been stopped yet.
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop the background task.
    ///
    /// Returns `false` if it was already stopped. Safe to call repeatedly.
    pub fn stop(&self) -> bool {
        let Some(handle) = self.handle.lock().take() else {
            return false;
        };

        // The receiver may already be gone if the task ended on its own.
        let _ = self.shutdown_tx.send(true);
        handle.abort();

        info!("Bucket sweeper stopped");
        true
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(store: Arc<BucketStore>, period: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = store.sweep_expired(Instant::now());
                debug!(removed = removed, live = store.len(), "Swept expired buckets");
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}
