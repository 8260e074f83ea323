//! Reconciliation loop
//!
//! Brings the capture queue back in line with the store after restarts and
//! crashes: pending observations nobody is working on get queued, and
//! running observations that stopped making progress are put back to
//! pending first.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use viewtrace_common::db::now_millis;
use viewtrace_common::ObservationStore;

use crate::config::ReconcilerConfig;
use crate::queue::CaptureQueue;

/// What one sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stale `running` observations moved back to `pending`
    pub requeued: usize,
    /// Observations handed to the queue
    pub enqueued: usize,
}

/// Reconciler that keeps the queue in step with the store
pub struct Reconciler {
    store: ObservationStore,
    queue: CaptureQueue,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(store: ObservationStore, queue: CaptureQueue, config: ReconcilerConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Sweep now and then every `sweep_interval` until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Reconciler started");

        loop {
            match self.reconcile_all() {
                Ok(report) if report != SweepReport::default() => {
                    info!(
                        "Reconciled observations: {} requeued, {} enqueued",
                        report.requeued, report.enqueued
                    );
                }
                Ok(_) => debug!("Nothing to reconcile"),
                Err(e) => error!("Reconciliation error: {}", e),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.sweep_interval()) => {}
            }
        }

        info!("Reconciler stopped");
    }

    /// One sweep.
    pub fn reconcile_all(&self) -> viewtrace_common::Result<SweepReport> {
        let mut report = SweepReport::default();

        let cutoff = now_millis() - self.config.stale_after().as_millis() as i64;
        for id in self.store.stale_running_ids(cutoff)? {
            if self.queue.is_tracked(&id) {
                continue;
            }
            if self.store.requeue_stale(&id, cutoff)? {
                warn!(observation_id = %id, "Requeued stale running observation");
                report.requeued += 1;
            }
        }

        let pending: Vec<String> = self
            .store
            .pending_ids()?
            .into_iter()
            .filter(|id| !self.queue.is_tracked(id))
            .collect();
        if !pending.is_empty() {
            report.enqueued = self.queue.enqueue(pending);
        }

        Ok(report)
    }
}
