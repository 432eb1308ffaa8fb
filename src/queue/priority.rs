//! Priority enqueue. Lower values are served first; no range is enforced.

use serde::Serialize;

use super::{Priority, Queue};
use crate::error::Result;
use crate::model::ItemId;

impl Queue<Priority> {
    /// Add a pending item at `priority`. Equal priorities are served oldest first.
    pub fn enqueue(&self, payload: impl AsRef<[u8]>, priority: i64) -> Result<ItemId> {
        self.insert(payload.as_ref(), Some(priority))
    }

    /// Add a value serialized as JSON at `priority`.
    pub fn enqueue_json<T: Serialize + ?Sized>(&self, value: &T, priority: i64) -> Result<ItemId> {
        let payload = serde_json::to_vec(value)?;
        self.insert(&payload, Some(priority))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::model::*;
    use crate::queue::PriorityQueue;
    use crate::storage::{QueueName, Store};

    fn test_queue() -> PriorityQueue {
        let store = Arc::new(Store::in_memory().unwrap());
        PriorityQueue::open(store, QueueName::new("urgent").unwrap(), &QueueOptions::new())
            .unwrap()
    }

    #[test]
    fn priority_defaults_to_removing_done_rows() {
        let queue = test_queue();
        assert_eq!(queue.kind(), QueueKind::Priority);
        assert_eq!(queue.retention(), Retention::Remove);
    }

    #[test]
    fn negative_and_large_priorities_order_numerically() {
        let queue = test_queue();
        queue.enqueue("max", i64::MAX).unwrap();
        queue.enqueue("zero", 0).unwrap();
        queue.enqueue("min", i64::MIN).unwrap();
        queue.enqueue("minus-one", -1).unwrap();

        let order: Vec<Vec<u8>> = std::iter::from_fn(|| queue.dequeue().unwrap()).collect();
        assert_eq!(
            order,
            vec![
                b"min".to_vec(),
                b"minus-one".to_vec(),
                b"zero".to_vec(),
                b"max".to_vec()
            ]
        );
    }

    #[test]
    fn values_follow_dequeue_order() {
        let queue = test_queue();
        queue.enqueue("later", 9).unwrap();
        queue.enqueue("sooner", 1).unwrap();

        assert_eq!(
            queue.values().unwrap(),
            vec![b"sooner".to_vec(), b"later".to_vec()]
        );
    }
}
