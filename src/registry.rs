//! Queue registry. Opens the store once and hands out named queues.
//!
//! Each queue owns one table in the shared store. The registry owns the
//! connection; closing it makes every queue derived from it unusable.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::model::QueueOptions;
use crate::queue::{PriorityQueue, Queue};
use crate::storage::{QueueName, Store, StoreOptions};

/// Owner of the shared store handle.
pub struct Registry {
    store: Arc<Store>,
}

impl Registry {
    /// Open or create a store file with default connection settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &StoreOptions::default())
    }

    /// Open or create a store file.
    pub fn open_with(path: impl AsRef<Path>, options: &StoreOptions) -> Result<Self> {
        let store = Store::open(path, options)?;
        info!(location = store.location(), "registry opened");
        Ok(Self {
            store: Arc::new(store),
        })
    }

    /// Create a registry over an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            store: Arc::new(Store::in_memory()?),
        })
    }

    /// Open the FIFO queue `name`, creating its table if needed.
    ///
    /// Runs the recovery sweep before returning unless `options` disables it.
    pub fn queue(&self, name: &str, options: QueueOptions) -> Result<Queue> {
        Queue::open(Arc::clone(&self.store), QueueName::new(name)?, &options)
    }

    /// Open the priority queue `name`, creating its table if needed.
    pub fn priority_queue(&self, name: &str, options: QueueOptions) -> Result<PriorityQueue> {
        PriorityQueue::open(Arc::clone(&self.store), QueueName::new(name)?, &options)
    }

    pub fn location(&self) -> &str {
        self.store.location()
    }

    pub fn is_closed(&self) -> bool {
        self.store.is_closed()
    }

    /// Close the shared store. Idempotent.
    pub fn close(&self) -> Result<()> {
        self.store.close()?;
        info!(location = self.store.location(), "registry closed");
        Ok(())
    }
}
