//! FIFO enqueue.

use serde::Serialize;

use super::{Fifo, Queue};
use crate::error::Result;
use crate::model::ItemId;

impl Queue<Fifo> {
    /// Append a pending item. Fails with `QueueClosed` after `close`.
    pub fn enqueue(&self, payload: impl AsRef<[u8]>) -> Result<ItemId> {
        self.insert(payload.as_ref(), None)
    }

    /// Append a value serialized as JSON.
    pub fn enqueue_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<ItemId> {
        let payload = serde_json::to_vec(value)?;
        self.insert(&payload, None)
    }
}
