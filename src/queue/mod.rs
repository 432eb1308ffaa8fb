//! The queue state machine, shared by FIFO and priority queues.
//!
//! A queue is a handle on one table in the registry's store. Both variants
//! run the same protocol (pending → processing → done/deleted, recovery back
//! to pending); the [`Discipline`] type parameter only decides which pending
//! row a dequeue selects.

mod fifo;
mod priority;

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::*;
use crate::storage::{self, QueueName, Store};
use crate::telemetry::metrics;

mod sealed {
    pub trait Sealed {}
}

/// Selection rule for the next pending row.
pub trait Discipline: sealed::Sealed + Send + Sync + 'static {
    /// Table layout this discipline needs.
    const KIND: QueueKind;
    /// ORDER BY clause over pending rows; the first row is dequeued next.
    const ORDER_BY: &'static str;
}

/// Oldest first.
#[derive(Debug, Clone, Copy)]
pub struct Fifo;

/// Lowest priority value first, then oldest first.
#[derive(Debug, Clone, Copy)]
pub struct Priority;

impl sealed::Sealed for Fifo {}
impl sealed::Sealed for Priority {}

impl Discipline for Fifo {
    const KIND: QueueKind = QueueKind::Fifo;
    const ORDER_BY: &'static str = "created_at ASC, id ASC";
}

impl Discipline for Priority {
    const KIND: QueueKind = QueueKind::Priority;
    const ORDER_BY: &'static str = "priority ASC, created_at ASC, id ASC";
}

/// A durable work queue backed by one table.
///
/// Every operation is a single store transaction. Handles are `Send + Sync`;
/// share one behind an `Arc` between consumers.
pub struct Queue<D: Discipline = Fifo> {
    store: Arc<Store>,
    name: QueueName,
    retention: Retention,
    closed: AtomicBool,
    _discipline: PhantomData<fn() -> D>,
}

/// A queue served in priority order.
pub type PriorityQueue = Queue<Priority>;

impl<D: Discipline> Queue<D> {
    /// Provision the table and, unless disabled, recover in-flight rows
    /// left by a previous process.
    pub(crate) fn open(store: Arc<Store>, name: QueueName, options: &QueueOptions) -> Result<Self> {
        store.ensure_queue_table(&name, D::KIND)?;

        let queue = Self {
            store,
            name,
            retention: options.retention_for(D::KIND),
            closed: AtomicBool::new(false),
            _discipline: PhantomData,
        };

        if options.recover_on_open {
            queue.requeue_unacked()?;
        }

        info!(
            queue = %queue.name,
            kind = %D::KIND,
            retention = ?queue.retention,
            "queue opened"
        );
        Ok(queue)
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn kind(&self) -> QueueKind {
        D::KIND
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop accepting enqueues and handing out items. Idempotent.
    ///
    /// The store connection belongs to the registry and stays open.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(queue = %self.name, "queue closed");
        }
    }

    pub(crate) fn insert(&self, payload: &[u8], priority: Option<i64>) -> Result<ItemId> {
        if self.is_closed() {
            return Err(Error::QueueClosed);
        }
        let started = Instant::now();
        let result = self
            .store
            .with_transaction(|ctx| ctx.insert_item(&self.name, payload, priority));
        if let Ok(id) = &result {
            debug!(queue = %self.name, %id, ?priority, "enqueued");
        }
        self.observe("enqueue", started, result)
    }

    /// Remove and return the next pending payload, without acknowledgment.
    ///
    /// The row is deleted in the same statement that selects it, so a
    /// consumer crash after this call loses the item. `Ok(None)` when the
    /// queue is empty or closed.
    pub fn dequeue(&self) -> Result<Option<Vec<u8>>> {
        if self.is_closed() {
            return Ok(None);
        }
        let started = Instant::now();
        let result = self
            .store
            .with_transaction(|ctx| ctx.take_next(&self.name, D::ORDER_BY));
        let row = self.observe("dequeue", started, result)?;
        Ok(row.map(|(id, payload)| {
            debug!(queue = %self.name, %id, "dequeued");
            payload
        }))
    }

    /// Hand out the next pending item under a fresh ack id.
    ///
    /// The row stays in the table as `processing` until [`acknowledge`] or a
    /// recovery sweep. `Ok(None)` when the queue is empty or closed.
    ///
    /// [`acknowledge`]: Queue::acknowledge
    pub fn dequeue_with_ack(&self) -> Result<Option<Delivery>> {
        if self.is_closed() {
            return Ok(None);
        }
        let started = Instant::now();
        let ack_id = AckId::new();
        let result = self
            .store
            .with_transaction(|ctx| ctx.claim_next(&self.name, D::ORDER_BY, &ack_id));
        let row = self.observe("dequeue_with_ack", started, result)?;
        Ok(row.map(|(id, payload)| {
            debug!(queue = %self.name, %id, %ack_id, "delivered");
            Delivery {
                id,
                payload,
                ack_id,
            }
        }))
    }

    /// Dequeue and decode a payload written by `enqueue_json`.
    ///
    /// Decoding happens after the row is gone; a payload that fails to
    /// decode is lost.
    pub fn dequeue_json<T: serde::de::DeserializeOwned>(&self) -> Result<Option<T>> {
        self.dequeue()?
            .map(|payload| serde_json::from_slice(&payload).map_err(Error::from))
            .transpose()
    }

    /// Finalize the delivery identified by `ack_id`.
    ///
    /// Returns false when no in-flight row holds that id: already
    /// acknowledged, recovered by a sweep, unknown, or the queue is closed.
    pub fn acknowledge(&self, ack_id: &AckId) -> Result<bool> {
        if self.is_closed() {
            return Ok(false);
        }
        let started = Instant::now();
        let result = self
            .store
            .with_transaction(|ctx| ctx.finalize(&self.name, ack_id, self.retention));
        let acked = self.observe("acknowledge", started, result)?;
        if acked {
            debug!(queue = %self.name, %ack_id, retention = ?self.retention, "acknowledged");
        } else {
            debug!(queue = %self.name, %ack_id, "no in-flight item for ack id");
        }
        Ok(acked)
    }

    /// Return every `processing` row to `pending`, invalidating its ack id.
    ///
    /// Rows keep their `created_at`, so they go back to their original
    /// place in line. Returns how many rows were recovered.
    pub fn requeue_unacked(&self) -> Result<usize> {
        self.requeue(None)
    }

    /// Like [`requeue_unacked`], limited to deliveries older than `older_than`.
    ///
    /// Leaves recent deliveries to consumers that are still working on them.
    ///
    /// [`requeue_unacked`]: Queue::requeue_unacked
    pub fn requeue_stale(&self, older_than: Duration) -> Result<usize> {
        let cutoff = chrono::TimeDelta::from_std(older_than)
            .ok()
            .and_then(|age| chrono::Utc::now().checked_sub_signed(age));
        match cutoff {
            Some(cutoff) => self.requeue(Some(&storage::format_timestamp(cutoff))),
            // Older than any representable time: no delivery qualifies.
            None if self.is_closed() => Err(Error::QueueClosed),
            None => Ok(0),
        }
    }

    fn requeue(&self, updated_before: Option<&str>) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::QueueClosed);
        }
        let started = Instant::now();
        let result = self
            .store
            .with_transaction(|ctx| ctx.requeue_processing(&self.name, updated_before));
        let recovered = self.observe("requeue", started, result)?;
        if recovered > 0 {
            info!(queue = %self.name, recovered, "requeued unacknowledged items");
            metrics::items_recovered()
                .add(recovered as u64, &[KeyValue::new("queue", self.name.to_string())]);
        }
        Ok(recovered)
    }

    /// Snapshot of pending payloads in dequeue order.
    pub fn values(&self) -> Result<Vec<Vec<u8>>> {
        let started = Instant::now();
        let result = self
            .store
            .with_connection(|conn| storage::pending_payloads_on(conn, &self.name, D::ORDER_BY));
        self.observe("values", started, result)
    }

    /// Number of pending items.
    pub fn len(&self) -> Result<usize> {
        let started = Instant::now();
        let result = self
            .store
            .with_connection(|conn| storage::count_pending_on(conn, &self.name));
        self.observe("len", started, result)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Row counts per status.
    pub fn stats(&self) -> Result<QueueStats> {
        self.store
            .with_connection(|conn| storage::stats_on(conn, &self.name))
    }

    /// Delete every row of this queue, whatever its status.
    pub fn purge(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::QueueClosed);
        }
        let started = Instant::now();
        let result = self.store.with_transaction(|ctx| ctx.purge(&self.name));
        let removed = self.observe("purge", started, result)?;
        info!(queue = %self.name, removed, "queue purged");
        Ok(())
    }

    /// Record metrics for an operation and log its failure.
    fn observe<T>(&self, operation: &'static str, started: Instant, result: Result<T>) -> Result<T> {
        let outcome = if result.is_ok() { "ok" } else { "error" };
        if let Err(e) = &result {
            warn!(queue = %self.name, operation, error = %e, "queue operation failed");
        }
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", self.name.to_string()),
                KeyValue::new("operation", operation),
                KeyValue::new("result", outcome),
            ],
        );
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", operation)],
        );
        result
    }
}

impl<D: Discipline> std::fmt::Debug for Queue<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("kind", &D::KIND)
            .field("retention", &self.retention)
            .field("closed", &self.is_closed())
            .finish()
    }
}
