//! # ackq
//!
//! Durable single-node work queues on an embedded SQLite store.
//!
//! Items are delivered at least once through explicit acknowledgment
//! (`dequeue_with_ack` + `acknowledge`), or at most once through plain
//! `dequeue`. Unacknowledged deliveries are recovered by a sweep that runs
//! when a queue is opened, on demand, and optionally on a timer. Priority
//! queues serve the lowest priority value first and fall back to FIFO.
//!
//! ```no_run
//! use ackq::{QueueOptions, Registry};
//!
//! # fn main() -> ackq::Result<()> {
//! let registry = Registry::open("queues.db")?;
//! let tasks = registry.queue("tasks", QueueOptions::new())?;
//!
//! tasks.enqueue(b"resize image 42")?;
//! if let Some(delivery) = tasks.dequeue_with_ack()? {
//!     // ... process delivery.payload ...
//!     tasks.acknowledge(&delivery.ack_id)?;
//! }
//! registry.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod model;
pub mod queue;
pub mod registry;
pub mod storage;
pub mod sweeper;
pub mod telemetry;

pub use error::{Error, Result};
pub use model::{AckId, Delivery, ItemId, QueueKind, QueueOptions, QueueStats, Retention, Status};
pub use queue::{Discipline, Fifo, Priority, PriorityQueue, Queue};
pub use registry::Registry;
pub use storage::{JournalMode, StoreOptions};
