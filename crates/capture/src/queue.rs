//! Supervised capture queue
//!
//! Batches of observation ids arrive over a bounded channel and are
//! consumed by a fixed number of supervisor tasks. A supervisor walks its
//! batch in request order, one observation at a time, so a single API call
//! never runs several browsers at once while separate batches still make
//! progress side by side.
//!
//! Each observation runs in its own spawned task: a panic inside a capture
//! is contained, recorded as a failure, and the batch moves on.

use dashmap::DashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::worker::CaptureWorker;

type Batch = Vec<String>;

/// Handle for submitting observations to the capture workers
#[derive(Clone)]
pub struct CaptureQueue {
    sender: mpsc::Sender<Batch>,
    /// Ids that are queued or being processed
    tracked: Arc<DashSet<String>>,
}

impl CaptureQueue {
    /// Start the supervisor tasks. They exit when `shutdown` fires, after
    /// the observation currently being processed finishes.
    pub fn start(
        worker: Arc<CaptureWorker>,
        config: &QueueConfig,
        shutdown: CancellationToken,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let tracked = Arc::new(DashSet::new());

        let supervisors = config.max_concurrent_batches.max(1);
        let handles = (0..supervisors)
            .map(|n| {
                tokio::spawn(supervise(
                    n,
                    worker.clone(),
                    receiver.clone(),
                    tracked.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        info!("Capture queue started with {} supervisors", supervisors);
        (Self { sender, tracked }, handles)
    }

    /// Queue a batch without waiting. Ids already queued or in flight are
    /// dropped from the batch. Returns how many ids were queued.
    ///
    /// When the channel is full or closed nothing is queued; the
    /// observations stay `pending` and the reconciler picks them up.
    pub fn enqueue(&self, ids: Vec<String>) -> usize {
        let batch: Batch = ids
            .into_iter()
            .filter(|id| self.tracked.insert(id.clone()))
            .collect();
        if batch.is_empty() {
            return 0;
        }

        let count = batch.len();
        match self.sender.try_send(batch) {
            Ok(()) => {
                debug!("Queued {} observations", count);
                count
            }
            Err(mpsc::error::TrySendError::Full(batch)) => {
                warn!(
                    "Capture queue is full; {} observations left for the reconciler",
                    batch.len()
                );
                self.untrack(&batch);
                0
            }
            Err(mpsc::error::TrySendError::Closed(batch)) => {
                warn!(
                    "Capture queue is shut down; {} observations left pending",
                    batch.len()
                );
                self.untrack(&batch);
                0
            }
        }
    }

    pub fn is_tracked(&self, id: &str) -> bool {
        self.tracked.contains(id)
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    fn untrack(&self, ids: &[String]) {
        for id in ids {
            self.tracked.remove(id);
        }
    }
}

async fn supervise(
    n: usize,
    worker: Arc<CaptureWorker>,
    receiver: Arc<Mutex<mpsc::Receiver<Batch>>>,
    tracked: Arc<DashSet<String>>,
    shutdown: CancellationToken,
) {
    debug!("Capture supervisor {} started", n);
    loop {
        let batch = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            batch = async { receiver.lock().await.recv().await } => batch,
        };
        let Some(batch) = batch else {
            break;
        };
        run_batch(&worker, &tracked, batch, &shutdown).await;
    }
    debug!("Capture supervisor {} stopped", n);
}

async fn run_batch(
    worker: &Arc<CaptureWorker>,
    tracked: &DashSet<String>,
    batch: Batch,
    shutdown: &CancellationToken,
) {
    let mut items = batch.into_iter();
    while let Some(id) = items.next() {
        if shutdown.is_cancelled() {
            // Still pending in the store; the next start picks them up.
            tracked.remove(&id);
            for rest in items.by_ref() {
                tracked.remove(&rest);
            }
            break;
        }

        let task = tokio::spawn({
            let worker = worker.clone();
            let id = id.clone();
            async move { worker.process(&id).await }
        });

        match task.await {
            Ok(outcome) => debug!(observation_id = %id, outcome = ?outcome, "Capture finished"),
            Err(e) if e.is_panic() => {
                error!(observation_id = %id, "Capture task panicked");
                worker.fail(&id, "capture task panicked").await;
            }
            Err(e) => warn!(observation_id = %id, "Capture task did not finish: {}", e),
        }
        tracked.remove(&id);
    }
}
