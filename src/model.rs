//! Core data model.
//!
//! An item is one enqueued unit of work: an opaque payload plus the
//! bookkeeping the dequeue/acknowledge protocol needs (status, ack id,
//! timestamps, and for priority queues a priority).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Store-assigned row id. Monotonic within a queue, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub i64);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token identifying one delivery attempt of an in-flight item.
///
/// Minted fresh on every pending → processing transition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AckId(pub String);

impl AckId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AckId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for AckId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AckId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an item row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Visible to dequeues.
    Pending,
    /// Delivered with an ack id, awaiting acknowledgment or recovery.
    Processing,
    /// Acknowledged and retained. Only persisted under `Retention::Keep`.
    Done,
}

impl Status {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Processing, Pending) // recovery sweep
                | (Processing, Done)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Processing => "processing",
            Status::Done => "done",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Status::Pending),
            "processing" => Ok(Status::Processing),
            "done" => Ok(Status::Done),
            _ => Err(Error::Other(format!("unknown status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// An item handed out by `dequeue_with_ack`. Finalize it with `acknowledge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: ItemId,
    pub payload: Vec<u8>,
    pub ack_id: AckId,
}

impl Delivery {
    /// Decode the payload as JSON written by `enqueue_json`.
    pub fn decode_json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Row counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub done: usize,
}

// ---------------------------------------------------------------------------
// Queue kind and options
// ---------------------------------------------------------------------------

/// Which ordering a queue's table is laid out for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    /// Oldest first.
    Fifo,
    /// Lowest priority value first, oldest first among equals.
    Priority,
}

impl QueueKind {
    /// Completion policy used when `QueueOptions` leaves it unset.
    ///
    /// FIFO queues keep acknowledged rows as `done`; priority queues delete
    /// them.
    pub fn default_retention(self) -> Retention {
        match self {
            QueueKind::Fifo => Retention::Keep,
            QueueKind::Priority => Retention::Remove,
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueueKind::Fifo => "fifo",
            QueueKind::Priority => "priority",
        };
        f.write_str(s)
    }
}

/// What happens to a row once it is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Mark `done` and `acknowledged`; the row stays for inspection.
    Keep,
    /// Delete the row.
    Remove,
}

/// Construction options for a queue. The registry's public API for tuning queues.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub(crate) retain_on_completion: Option<bool>,
    pub(crate) recover_on_open: bool,
}

impl QueueOptions {
    pub fn new() -> Self {
        Self {
            retain_on_completion: None,
            recover_on_open: true,
        }
    }

    /// Keep acknowledged rows as `done` (true) or delete them (false).
    pub fn retain_on_completion(mut self, retain: bool) -> Self {
        self.retain_on_completion = Some(retain);
        self
    }

    /// Requeue leftover `processing` rows when the queue is opened.
    pub fn recover_on_open(mut self, recover: bool) -> Self {
        self.recover_on_open = recover;
        self
    }

    pub(crate) fn retention_for(&self, kind: QueueKind) -> Retention {
        match self.retain_on_completion {
            Some(true) => Retention::Keep,
            Some(false) => Retention::Remove,
            None => kind.default_retention(),
        }
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::new()
    }
}
