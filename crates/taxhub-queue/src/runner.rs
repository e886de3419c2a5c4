//! Worker dispatch loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::service::JobService;

/// Drives job dispatch: fills free concurrency slots with eligible
/// jobs, then sleeps until woken or the poll interval elapses.
pub struct WorkerRunner {
    service: Arc<JobService>,
}

impl WorkerRunner {
    /// Create a runner over the given service.
    pub fn new(service: Arc<JobService>) -> Self {
        Self { service }
    }

    /// Run the dispatch loop until the shutdown signal fires, then
    /// drain in-flight jobs within the configured grace period.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let config = self.service.config().clone();
        if !config.enabled {
            info!("Job dispatch disabled by configuration");
            return;
        }

        let poll = Duration::from_millis(config.poll_interval_ms);
        info!(
            max_concurrent_jobs = config.max_concurrent_jobs,
            poll_interval_ms = config.poll_interval_ms,
            "Worker dispatch loop started"
        );

        loop {
            self.dispatch_ready().await;

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping dispatch");
                        break;
                    }
                }
                _ = self.service.wait_for_work() => {
                    debug!("Dispatch loop woken");
                }
                _ = tokio::time::sleep(poll) => {}
            }
        }

        info!(
            grace_seconds = config.shutdown_grace_seconds,
            "Waiting for in-flight jobs to settle"
        );
        let drained = tokio::time::timeout(
            Duration::from_secs(config.shutdown_grace_seconds),
            self.service.drain(),
        )
        .await;
        match drained {
            Ok(()) => info!("Worker dispatch loop stopped cleanly"),
            Err(_) => warn!("Shutdown grace period elapsed with jobs still in flight"),
        }
    }

    /// Claim and spawn eligible jobs until slots or work run out.
    /// A permit is acquired before claiming so a job is never popped
    /// without a slot to run it.
    async fn dispatch_ready(&self) {
        loop {
            let Some(permit) = self.service.try_acquire_slot() else {
                return;
            };
            match self.service.claim_next().await {
                Some(job) => self.service.spawn_attempt(job, permit),
                None => {
                    drop(permit);
                    return;
                }
            }
        }
    }
}
