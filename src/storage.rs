//! SQLite storage gateway.
//!
//! Owns the connection shared by every queue opened from one registry.
//! Each queue operation runs inside a single `BEGIN IMMEDIATE` transaction,
//! so the write lock is taken up front and two dequeuers (threads or
//! processes) can never select the same row.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::*;

/// Default busy timeout for lock contention between connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest accepted queue name, in bytes.
const MAX_QUEUE_NAME_LEN: usize = 64;

const BASE_COLUMNS: [&str; 7] = [
    "id",
    "payload",
    "status",
    "ack_id",
    "acknowledged",
    "created_at",
    "updated_at",
];

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    /// Write-ahead log: readers don't block the writer.
    #[default]
    Wal,
    /// Rollback journal.
    Delete,
}

impl JournalMode {
    fn pragma_value(self) -> &'static str {
        match self {
            JournalMode::Wal => "wal",
            JournalMode::Delete => "delete",
        }
    }
}

/// Connection settings applied when the store is opened.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long a transaction waits for another connection's write lock.
    pub busy_timeout: Duration,
    pub journal_mode: JournalMode,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            journal_mode: JournalMode::Wal,
        }
    }
}

// ---------------------------------------------------------------------------
// Queue names
// ---------------------------------------------------------------------------

/// A validated queue (table) name.
///
/// Names are interpolated into DDL and DML, so only `[A-Za-z_][A-Za-z0-9_]*`
/// is accepted, and every use is double-quoted on top of that.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueName(String);

impl QueueName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let mut chars = name.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !valid_start
            || !valid_rest
            || name.len() > MAX_QUEUE_NAME_LEN
            || name.to_ascii_lowercase().starts_with("sqlite_")
        {
            return Err(Error::InvalidQueueName(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Quoted identifier for use in SQL text.
    fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }

    fn index(&self, suffix: &str) -> String {
        format!("\"{}_{suffix}\"", self.0)
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Storage backend. Owns the SQLite connection until `close`.
pub struct Store {
    conn: Mutex<Option<Connection>>,
    location: String,
}

/// Handle for performing storage operations within a transaction.
///
/// Every method executes against the transaction's connection, so either
/// all of a caller's statements commit together or none do. Status changes
/// are guarded by the current status in each statement's WHERE clause.
pub(crate) struct TxContext<'a> {
    tx: &'a Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>, options: &StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        Self::init(conn, path.display().to_string(), options)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, ":memory:".to_string(), &StoreOptions::default())
    }

    fn init(conn: Connection, location: String, options: &StoreOptions) -> Result<Self> {
        conn.busy_timeout(options.busy_timeout)?;
        // journal_mode reports the resulting mode as a row
        let mode: String = conn.query_row(
            &format!("PRAGMA journal_mode={}", options.journal_mode.pragma_value()),
            [],
            |row| row.get(0),
        )?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        debug!(location = %location, journal_mode = %mode, "store opened");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            location,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    /// Close the connection. Idempotent; later operations fail with `StoreClosed`.
    pub fn close(&self) -> Result<()> {
        let Some(conn) = self.lock().take() else {
            return Ok(());
        };
        conn.close().map_err(|(_, e)| Error::Storage(e))?;
        debug!(location = %self.location, "store closed");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        // A panic mid-transaction drops the Transaction, which rolls back.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Execute a closure within an IMMEDIATE transaction.
    ///
    /// The transaction commits if the closure returns Ok, rolls back on Err.
    pub(crate) fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&TxContext) -> Result<T>,
    {
        let mut guard = self.lock();
        let conn = guard.as_mut().ok_or(Error::StoreClosed)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let ctx = TxContext { tx: &tx };
        let result = f(&ctx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Execute a read-only closure against the connection.
    ///
    /// A single SELECT is a consistent snapshot on its own.
    pub(crate) fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(Error::StoreClosed)?;
        f(conn)
    }

    // -----------------------------------------------------------------------
    // Table lifecycle
    // -----------------------------------------------------------------------

    /// Create the queue's table and indexes if absent, and check that an
    /// existing table has the layout `kind` needs.
    pub(crate) fn ensure_queue_table(&self, name: &QueueName, kind: QueueKind) -> Result<()> {
        self.with_transaction(|ctx| {
            ctx.create_table(name, kind)?;
            ctx.verify_schema(name, kind)?;
            ctx.create_indexes(name, kind)
        })
    }
}

impl TxContext<'_> {
    fn create_table(&self, name: &QueueName, kind: QueueKind) -> Result<()> {
        // AUTOINCREMENT keeps a per-table sequence in sqlite_sequence, so ids
        // of deleted rows are never handed out again.
        let priority_column = match kind {
            QueueKind::Fifo => "",
            QueueKind::Priority => ",\n                priority        INTEGER NOT NULL DEFAULT 0",
        };
        self.tx.execute_batch(&format!(
            "
            CREATE TABLE IF NOT EXISTS {table} (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                payload         BLOB NOT NULL,
                status          TEXT NOT NULL CHECK (status IN ('pending', 'processing', 'done')),
                ack_id          TEXT UNIQUE,
                acknowledged    INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL{priority_column}
            );
            ",
            table = name.quoted(),
        ))?;
        Ok(())
    }

    fn create_indexes(&self, name: &QueueName, kind: QueueKind) -> Result<()> {
        let table = name.quoted();
        let mut ddl = format!(
            "
            CREATE INDEX IF NOT EXISTS {status_idx} ON {table} (status, created_at);
            CREATE INDEX IF NOT EXISTS {status_ack_idx} ON {table} (status, acknowledged);
            CREATE INDEX IF NOT EXISTS {ack_id_idx} ON {table} (ack_id);
            ",
            status_idx = name.index("status_idx"),
            status_ack_idx = name.index("status_ack_idx"),
            ack_id_idx = name.index("ack_id_idx"),
        );
        if kind == QueueKind::Priority {
            ddl.push_str(&format!(
                "CREATE INDEX IF NOT EXISTS {priority_idx} ON {table} (priority ASC, created_at ASC);",
                priority_idx = name.index("priority_idx"),
            ));
        }
        self.tx.execute_batch(&ddl)?;
        Ok(())
    }

    fn verify_schema(&self, name: &QueueName, kind: QueueKind) -> Result<()> {
        let mut stmt = self
            .tx
            .prepare(&format!("PRAGMA table_info({})", name.quoted()))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let has_base = BASE_COLUMNS
            .iter()
            .all(|col| columns.iter().any(|c| c == col));
        let has_priority = columns.iter().any(|c| c == "priority");
        let expected_priority = kind == QueueKind::Priority;

        if !has_base || has_priority != expected_priority {
            return Err(Error::SchemaMismatch {
                queue: name.to_string(),
                expected: kind,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Items
    // -----------------------------------------------------------------------

    /// Insert a pending row. `priority` must be `Some` exactly for priority tables.
    pub fn insert_item(
        &self,
        name: &QueueName,
        payload: &[u8],
        priority: Option<i64>,
    ) -> Result<ItemId> {
        let now = timestamp_now();
        match priority {
            Some(priority) => self.tx.execute(
                &format!(
                    "INSERT INTO {} (payload, status, created_at, updated_at, priority)
                     VALUES (?1, 'pending', ?2, ?2, ?3)",
                    name.quoted()
                ),
                params![payload, now, priority],
            )?,
            None => self.tx.execute(
                &format!(
                    "INSERT INTO {} (payload, status, created_at, updated_at)
                     VALUES (?1, 'pending', ?2, ?2)",
                    name.quoted()
                ),
                params![payload, now],
            )?,
        };
        Ok(ItemId(self.tx.last_insert_rowid()))
    }

    /// Atomically delete the next pending row and return it.
    pub fn take_next(&self, name: &QueueName, order_by: &str) -> Result<Option<(ItemId, Vec<u8>)>> {
        let table = name.quoted();
        let row = self
            .tx
            .query_row(
                &format!(
                    "DELETE FROM {table}
                     WHERE id = (SELECT id FROM {table} WHERE status = 'pending' ORDER BY {order_by} LIMIT 1)
                     RETURNING id, payload"
                ),
                [],
                |row| Ok((ItemId(row.get(0)?), row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    /// Atomically move the next pending row to processing under `ack_id`.
    pub fn claim_next(
        &self,
        name: &QueueName,
        order_by: &str,
        ack_id: &AckId,
    ) -> Result<Option<(ItemId, Vec<u8>)>> {
        let table = name.quoted();
        let row = self
            .tx
            .query_row(
                &format!(
                    "UPDATE {table}
                     SET status = 'processing', ack_id = ?1, acknowledged = 0, updated_at = ?2
                     WHERE id = (SELECT id FROM {table} WHERE status = 'pending' ORDER BY {order_by} LIMIT 1)
                     RETURNING id, payload"
                ),
                params![ack_id.as_str(), timestamp_now()],
                |row| Ok((ItemId(row.get(0)?), row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    /// Finalize the in-flight row holding `ack_id`. Returns false if none does.
    pub fn finalize(&self, name: &QueueName, ack_id: &AckId, retention: Retention) -> Result<bool> {
        let rows = match retention {
            Retention::Keep => self.tx.execute(
                &format!(
                    "UPDATE {} SET status = 'done', acknowledged = 1, updated_at = ?2
                     WHERE ack_id = ?1 AND status = 'processing'",
                    name.quoted()
                ),
                params![ack_id.as_str(), timestamp_now()],
            )?,
            Retention::Remove => self.tx.execute(
                &format!(
                    "DELETE FROM {} WHERE ack_id = ?1 AND status = 'processing'",
                    name.quoted()
                ),
                params![ack_id.as_str()],
            )?,
        };
        Ok(rows == 1)
    }

    /// Return processing rows to pending, clearing their ack ids.
    ///
    /// With `updated_before`, only rows whose last transition is at or
    /// before that timestamp are touched.
    pub fn requeue_processing(
        &self,
        name: &QueueName,
        updated_before: Option<&str>,
    ) -> Result<usize> {
        let rows = self.tx.execute(
            &format!(
                "UPDATE {} SET status = 'pending', ack_id = NULL, updated_at = ?1
                 WHERE status = 'processing' AND (?2 IS NULL OR updated_at <= ?2)",
                name.quoted()
            ),
            params![timestamp_now(), updated_before],
        )?;
        Ok(rows)
    }

    /// Delete every row regardless of status.
    pub fn purge(&self, name: &QueueName) -> Result<usize> {
        let rows = self
            .tx
            .execute(&format!("DELETE FROM {}", name.quoted()), [])?;
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

pub(crate) fn count_pending_on(conn: &Connection, name: &QueueName) -> Result<usize> {
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} WHERE status = 'pending'",
            name.quoted()
        ),
        [],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

pub(crate) fn pending_payloads_on(
    conn: &Connection,
    name: &QueueName,
    order_by: &str,
) -> Result<Vec<Vec<u8>>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT payload FROM {} WHERE status = 'pending' ORDER BY {order_by}",
        name.quoted()
    ))?;
    let payloads = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(payloads)
}

pub(crate) fn stats_on(conn: &Connection, name: &QueueName) -> Result<QueueStats> {
    let mut stmt = conn.prepare(&format!(
        "SELECT status, COUNT(*) FROM {} GROUP BY status",
        name.quoted()
    ))?;
    let counts = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stats = QueueStats::default();
    for (status, count) in counts {
        let count = count as usize;
        match status.parse::<Status>()? {
            Status::Pending => stats.pending = count,
            Status::Processing => stats.processing = count,
            Status::Done => stats.done = count,
        }
    }
    Ok(stats)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fixed-width UTC timestamp, so text order equals time order.
pub(crate) fn timestamp_now() -> String {
    format_timestamp(Utc::now())
}

pub(crate) fn format_timestamp(at: chrono::DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> QueueName {
        QueueName::new(s).unwrap()
    }

    #[test]
    fn accepts_plain_identifiers() {
        for ok in ["tasks", "_private", "Jobs_2", "a"] {
            assert!(QueueName::new(ok).is_ok(), "{ok} should be accepted");
        }
    }

    #[test]
    fn rejects_injection_shaped_names() {
        for bad in [
            "",
            "1tasks",
            "tasks; DROP TABLE x",
            "tasks\"",
            "my-queue",
            "sqlite_master",
            "SQLITE_sequence",
            "naïve",
        ] {
            assert!(
                matches!(QueueName::new(bad), Err(Error::InvalidQueueName(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(QueueName::new("x".repeat(65)).is_err());
    }

    #[test]
    fn table_is_created_with_expected_columns() {
        let store = Store::in_memory().unwrap();
        store
            .ensure_queue_table(&name("jobs"), QueueKind::Priority)
            .unwrap();

        let columns: Vec<String> = store
            .with_connection(|conn| {
                let mut stmt = conn.prepare("PRAGMA table_info(\"jobs\")")?;
                let cols = stmt
                    .query_map([], |row| row.get(1))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(cols)
            })
            .unwrap();
        assert_eq!(columns.len(), 8);
        assert!(columns.contains(&"priority".to_string()));
    }

    #[test]
    fn reopening_with_other_kind_is_a_schema_mismatch() {
        let store = Store::in_memory().unwrap();
        store.ensure_queue_table(&name("jobs"), QueueKind::Fifo).unwrap();

        let err = store
            .ensure_queue_table(&name("jobs"), QueueKind::Priority)
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { expected: QueueKind::Priority, .. }));

        // Same kind again is fine.
        store.ensure_queue_table(&name("jobs"), QueueKind::Fifo).unwrap();
    }

    #[test]
    fn claim_and_finalize_in_one_transaction() {
        let store = Store::in_memory().unwrap();
        let jobs = name("jobs");
        store.ensure_queue_table(&jobs, QueueKind::Fifo).unwrap();

        let ack = AckId::new();
        let claimed = store
            .with_transaction(|ctx| {
                ctx.insert_item(&jobs, b"one", None)?;
                ctx.claim_next(&jobs, "created_at ASC, id ASC", &ack)
            })
            .unwrap()
            .expect("row should be claimed");
        assert_eq!(claimed.1, b"one");

        let finalized = store
            .with_transaction(|ctx| ctx.finalize(&jobs, &ack, Retention::Keep))
            .unwrap();
        assert!(finalized);

        let stats = store.with_connection(|conn| stats_on(conn, &jobs)).unwrap();
        assert_eq!(stats, QueueStats { pending: 0, processing: 0, done: 1 });
    }

    #[test]
    fn finalize_only_touches_rows_in_flight() {
        let store = Store::in_memory().unwrap();
        let jobs = name("jobs");
        store.ensure_queue_table(&jobs, QueueKind::Fifo).unwrap();

        let ack = AckId::new();
        store
            .with_transaction(|ctx| {
                ctx.insert_item(&jobs, b"one", None)?;
                ctx.claim_next(&jobs, "created_at ASC, id ASC", &ack)?;
                ctx.requeue_processing(&jobs, None)
            })
            .unwrap();

        // Back to pending with its ack id cleared: neither policy may finalize it.
        for retention in [Retention::Keep, Retention::Remove] {
            let finalized = store
                .with_transaction(|ctx| ctx.finalize(&jobs, &ack, retention))
                .unwrap();
            assert!(!finalized);
        }
        // A pending row is never requeued again.
        let requeued = store
            .with_transaction(|ctx| ctx.requeue_processing(&jobs, None))
            .unwrap();
        assert_eq!(requeued, 0);

        let stats = store.with_connection(|conn| stats_on(conn, &jobs)).unwrap();
        assert_eq!(stats, QueueStats { pending: 1, processing: 0, done: 0 });
    }

    #[test]
    fn failed_closure_rolls_back() {
        let store = Store::in_memory().unwrap();
        let jobs = name("jobs");
        store.ensure_queue_table(&jobs, QueueKind::Fifo).unwrap();

        let result: Result<()> = store.with_transaction(|ctx| {
            ctx.insert_item(&jobs, b"lost", None)?;
            Err(Error::Other("abort".into()))
        });
        assert!(result.is_err());

        let pending = store
            .with_connection(|conn| count_pending_on(conn, &jobs))
            .unwrap();
        assert_eq!(pending, 0);
    }

    #[test]
    fn closed_store_rejects_operations() {
        let store = Store::in_memory().unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());

        let err = store
            .ensure_queue_table(&name("jobs"), QueueKind::Fifo)
            .unwrap_err();
        assert!(matches!(err, Error::StoreClosed));
    }

    #[test]
    fn timestamps_sort_lexically() {
        let earlier = chrono::DateTime::parse_from_rfc3339("2026-01-01T09:59:59.5Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = chrono::DateTime::parse_from_rfc3339("2026-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(format_timestamp(earlier) < format_timestamp(later));
        assert_eq!(format_timestamp(later), "2026-01-01T10:00:00.000000Z");
    }
}
