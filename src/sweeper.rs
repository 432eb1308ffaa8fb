//! Periodic recovery sweeper.
//!
//! Queues recover in-flight rows when they are opened. A long-running
//! process whose consumers can die mid-delivery also needs recovery while
//! it runs: the sweeper wakes on a fixed interval and requeues deliveries
//! that have stayed unacknowledged longer than `stale_after`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{Instrument, info, warn};

use crate::error::{Error, Result};
use crate::queue::{Discipline, Queue};
use crate::telemetry::queue::start_sweep_span;

/// When and what the sweeper recovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPolicy {
    /// Time between sweeps.
    pub interval: Duration,
    /// Minimum age of a delivery before it counts as abandoned.
    pub stale_after: Duration,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(300),
        }
    }
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for the current sweep to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            warn!("sweeper task ended abnormally: {e}");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a sweeper for `queue` on the current tokio runtime.
///
/// The sweeper stops on [`SweeperHandle::shutdown`] or once the queue or
/// its store is closed.
pub fn spawn<D: Discipline>(queue: Arc<Queue<D>>, policy: SweepPolicy) -> SweeperHandle {
    let shutdown = Arc::new(Notify::new());
    let task = tokio::spawn(run(queue, policy, Arc::clone(&shutdown)));
    SweeperHandle { shutdown, task }
}

async fn run<D: Discipline>(queue: Arc<Queue<D>>, policy: SweepPolicy, shutdown: Arc<Notify>) {
    info!(
        queue = queue.name(),
        interval_ms = policy.interval.as_millis() as u64,
        stale_after_ms = policy.stale_after.as_millis() as u64,
        "sweeper started"
    );

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!(queue = queue.name(), "sweeper shutting down");
                return;
            }
            _ = tokio::time::sleep(policy.interval) => {}
        }

        match sweep_once(&queue, policy.stale_after).await {
            Ok(_) => {}
            Err(Error::QueueClosed | Error::StoreClosed) => {
                info!(queue = queue.name(), "queue closed, sweeper stopping");
                return;
            }
            // Transient failures are retried on the next tick
            Err(e) => warn!(queue = queue.name(), "sweep failed: {e}"),
        }
    }
}

/// Run one stale sweep on the blocking pool. Returns how many rows were requeued.
pub async fn sweep_once<D: Discipline>(queue: &Arc<Queue<D>>, stale_after: Duration) -> Result<usize> {
    let span = start_sweep_span(queue.name());
    let q = Arc::clone(queue);
    let recovered = tokio::task::spawn_blocking(move || q.requeue_stale(stale_after))
        .instrument(span.clone())
        .await
        .map_err(|e| Error::Other(format!("sweep task failed: {e}")))??;
    span.record("sweep.recovered", recovered as u64);
    Ok(recovered)
}
