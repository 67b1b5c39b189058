//! Background lease scanner.

use crate::SharedEngine;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default period between scans.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(1_000);

/// Periodically calls [`crate::QueueEngine::scan_timeouts`].
///
/// The task is owned by this handle: [`LeaseScanner::stop`] ends it
/// cleanly and dropping the handle aborts it.
pub struct LeaseScanner {
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl LeaseScanner {
    /// Spawn the scanner on the current runtime.
    pub fn start(engine: SharedEngine, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let period = interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_ms = period.as_millis() as u64, "Lease scanner started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = engine.lock().scan_timeouts();
                        if !report.is_empty() {
                            debug!(
                                expired = report.expired,
                                dead_lettered = report.dead_lettered,
                                released_delayed = report.released_delayed,
                                delivered = report.delivered,
                                "Lease scan"
                            );
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Lease scanner stopping");
                        break;
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Signal the scanner and wait for it to finish.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Lease scanner task failed");
            }
        }
    }
}

impl Drop for LeaseScanner {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
