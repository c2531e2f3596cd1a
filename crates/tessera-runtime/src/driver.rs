//! Drives the scheduler from a tokio task

use std::sync::Arc;
use std::time::Duration;

use tessera_time::Scheduler;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Runs due scheduler work on a fixed tick until shut down
pub struct Driver {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<u64>,
}

impl Driver {
    /// Spawn the driver on the current tokio runtime.
    /// A zero interval is raised to one millisecond.
    pub fn spawn(scheduler: Arc<Scheduler>, tick_interval: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let tick_interval = tick_interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut ran: u64 = 0;

            tracing::debug!(?tick_interval, "driver started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        ran += scheduler.run_due() as u64;
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }

            // last turn so nothing due is dropped
            ran += scheduler.run_due() as u64;
            tracing::debug!(ran, "driver stopped");
            ran
        });

        Driver { shutdown, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the loop and wait for it. Returns the number of tasks run.
    pub async fn shutdown(self) -> u64 {
        let _ = self.shutdown.send(true);
        match self.handle.await {
            Ok(ran) => ran,
            Err(e) => {
                tracing::warn!(error = %e, "driver task failed");
                0
            }
        }
    }
}
