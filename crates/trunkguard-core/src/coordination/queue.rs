//! Durable integration queue backed by `SQLite`.
//!
//! Every mutation runs inside one single-writer critical section: an
//! in-process async mutex, an advisory file lock next to the database (for
//! other processes sharing the file), and a database transaction. The section
//! covers exactly one read-modify-write and never an external call.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Sqlite, SqlitePool, Transaction,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    queue_entities::{
        format_ts, EventRow, QueueEntry, QueueEvent, QueueRow, QueueStats, RequestId,
    },
    queue_status::IntegrationStatus,
};
use crate::{
    filelock::{acquire_lock, FileLock, LockOptions},
    Error, Result,
};

const ENTRY_COLUMNS: &str = "id, source_branch, target_branch, requester_id, status, priority, \
     submitted_at, queued_at, started_at, completed_at, conflict_report, metrics, last_error, \
     trunk_before, trunk_after, updated_at";

/// Held for the duration of one store mutation.
struct WriteGuard {
    _mutex: OwnedMutexGuard<()>,
    _file: Option<FileLock>,
}

/// Persistent, ordered collection of integration requests.
#[derive(Clone)]
pub struct QueueStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
    lock_path: Option<PathBuf>,
    lock_options: LockOptions,
}

impl std::fmt::Debug for QueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueStore")
            .field("lock_path", &self.lock_path)
            .finish_non_exhaustive()
    }
}

impl QueueStore {
    /// Open (creating if needed) the database at `db_path`, guarded by `lock_path`.
    pub async fn open(db_path: &Path, lock_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::io_error(format!(
                    "Failed to create queue directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| {
                Error::database_error(format!(
                    "Failed to open queue database {}: {e}",
                    db_path.display()
                ))
            })?;

        let store = Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
            lock_path: Some(lock_path.to_path_buf()),
            lock_options: LockOptions::default(),
        };
        store.init().await?;
        Ok(store)
    }

    /// A private in-memory store; the single connection is never recycled.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
            lock_path: None,
            lock_options: LockOptions::default(),
        };
        store.init().await?;
        Ok(store)
    }

    /// Shared pool, for the lock and ledger tables living in the same file.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS integration_queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                source_branch TEXT NOT NULL,
                target_branch TEXT NOT NULL,
                requester_id TEXT NOT NULL,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL,
                submitted_at TEXT NOT NULL,
                queued_at TEXT,
                started_at TEXT,
                completed_at TEXT,
                conflict_report TEXT,
                metrics TEXT NOT NULL,
                last_error TEXT,
                trunk_before TEXT,
                trunk_after TEXT,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_integration_queue_order
             ON integration_queue(status, priority, seq)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS queue_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id TEXT NOT NULL,
                from_status TEXT,
                to_status TEXT NOT NULL,
                message TEXT,
                at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_queue_events_request ON queue_events(request_id, seq)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn exclusive(&self) -> Result<WriteGuard> {
        let mutex = Arc::clone(&self.write_lock).lock_owned().await;
        let file = match &self.lock_path {
            Some(path) => Some(acquire_lock(path, &self.lock_options).await?),
            None => None,
        };
        Ok(WriteGuard {
            _mutex: mutex,
            _file: file,
        })
    }

    // ════════════════════════════════════════════════════════════════════
    // MUTATIONS
    // ════════════════════════════════════════════════════════════════════

    /// Append a validated request. The entry must already be `QUEUED`.
    pub async fn enqueue(&self, entry: &QueueEntry) -> Result<RequestId> {
        if entry.status != IntegrationStatus::Queued {
            return Err(Error::invalid_transition(format!(
                "only QUEUED entries can be enqueued, got {}",
                entry.status
            )));
        }

        let _guard = self.exclusive().await?;
        let mut tx = self.pool.begin().await?;

        let insert = format!(
            "INSERT INTO integration_queue ({ENTRY_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        bind_entry(sqlx::query(&insert), entry)?
            .execute(&mut *tx)
            .await?;

        insert_event(
            &mut tx,
            entry.id,
            Some(IntegrationStatus::Submitted),
            IntegrationStatus::Queued,
            None,
            entry.updated_at,
        )
        .await?;

        tx.commit().await?;

        tracing::debug!(request_id = %entry.id, "Integration request stored");
        Ok(entry.id)
    }

    /// Claim the head of the queue: the `QUEUED` entry with the smallest
    /// `(priority, append order)`, moved to `CONFLICT_CHECK` in the same transaction.
    ///
    /// Append order is the order in which the store accepted submissions, so
    /// equal priorities are strict FIFO even when submitters race.
    pub async fn dequeue_next_queued(&self) -> Result<Option<QueueEntry>> {
        let _guard = self.exclusive().await?;
        let mut tx = self.pool.begin().await?;

        let select = format!(
            "SELECT {ENTRY_COLUMNS} FROM integration_queue
             WHERE status = ?
             ORDER BY priority ASC, seq ASC
             LIMIT 1"
        );
        let row: Option<QueueRow> = sqlx::query_as(&select)
            .bind(IntegrationStatus::Queued.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut entry = QueueEntry::try_from(row)?;
        entry.transition(IntegrationStatus::ConflictCheck, Utc::now())?;
        write_entry(&mut tx, &entry).await?;
        insert_event(
            &mut tx,
            entry.id,
            Some(IntegrationStatus::Queued),
            IntegrationStatus::ConflictCheck,
            None,
            entry.updated_at,
        )
        .await?;
        tx.commit().await?;

        tracing::debug!(request_id = %entry.id, "Dequeued integration request");
        Ok(Some(entry))
    }

    /// Read-modify-write one entry atomically.
    ///
    /// The mutator runs inside the critical section, so it must not perform
    /// I/O. If it fails, nothing is written. Status changes are appended to
    /// the event trail with the entry's `last_error` as message.
    pub async fn atomic_update<F>(&self, id: RequestId, mutator: F) -> Result<QueueEntry>
    where
        F: FnOnce(&mut QueueEntry) -> Result<()>,
    {
        let _guard = self.exclusive().await?;
        let mut tx = self.pool.begin().await?;

        let mut entry = fetch_entry(&mut tx, id).await?;
        let before = entry.status;
        mutator(&mut entry)?;

        write_entry(&mut tx, &entry).await?;
        if entry.status != before {
            insert_event(
                &mut tx,
                entry.id,
                Some(before),
                entry.status,
                entry.last_error.as_deref(),
                entry.updated_at,
            )
            .await?;
        }
        tx.commit().await?;

        if entry.status != before {
            tracing::info!(
                request_id = %entry.id,
                from = %before,
                to = %entry.status,
                "Integration request transitioned"
            );
        }
        Ok(entry)
    }

    /// Put entries interrupted by a crash back in line.
    ///
    /// `CONFLICT_CHECK`, `MERGING` and `REBASE_PENDING` return to `QUEUED`;
    /// `CONFLICT_DETECTED` (advisor verdict lost) goes to `MANUAL_REQUIRED`.
    pub async fn recover_interrupted(&self) -> Result<Vec<RequestId>> {
        let _guard = self.exclusive().await?;
        let mut tx = self.pool.begin().await?;

        let select = format!(
            "SELECT {ENTRY_COLUMNS} FROM integration_queue WHERE status IN (?, ?, ?, ?) ORDER BY seq"
        );
        let rows: Vec<QueueRow> = sqlx::query_as(&select)
            .bind(IntegrationStatus::ConflictCheck.as_str())
            .bind(IntegrationStatus::Merging.as_str())
            .bind(IntegrationStatus::RebasePending.as_str())
            .bind(IntegrationStatus::ConflictDetected.as_str())
            .fetch_all(&mut *tx)
            .await?;

        let now = Utc::now();
        let mut recovered = Vec::with_capacity(rows.len());
        for row in rows {
            let mut entry = QueueEntry::try_from(row)?;
            let before = entry.status;
            if before == IntegrationStatus::ConflictDetected {
                entry.transition(IntegrationStatus::ManualRequired, now)?;
            } else {
                entry.requeue_after(format!("recovered after interruption in {before}"), now)?;
            }
            write_entry(&mut tx, &entry).await?;
            insert_event(
                &mut tx,
                entry.id,
                Some(before),
                entry.status,
                entry.last_error.as_deref(),
                now,
            )
            .await?;
            recovered.push(entry.id);
        }
        tx.commit().await?;

        if !recovered.is_empty() {
            tracing::warn!(count = recovered.len(), "Recovered interrupted integration requests");
        }
        Ok(recovered)
    }

    // ════════════════════════════════════════════════════════════════════
    // QUERIES
    // ════════════════════════════════════════════════════════════════════

    pub async fn get(&self, id: RequestId) -> Result<QueueEntry> {
        let mut conn = self.pool.acquire().await?;
        let select = format!("SELECT {ENTRY_COLUMNS} FROM integration_queue WHERE id = ?");
        let row: Option<QueueRow> = sqlx::query_as(&select)
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?;
        row.ok_or_else(|| Error::not_found(format!("integration request {id}")))
            .and_then(QueueEntry::try_from)
    }

    /// All entries matching `predicate`, in submission order.
    pub async fn list<F>(&self, predicate: F) -> Result<Vec<QueueEntry>>
    where
        F: Fn(&QueueEntry) -> bool,
    {
        let select = format!("SELECT {ENTRY_COLUMNS} FROM integration_queue ORDER BY seq ASC");
        let rows: Vec<QueueRow> = sqlx::query_as(&select).fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(QueueEntry::try_from)
            .filter(|entry| entry.as_ref().map_or(true, &predicate))
            .collect()
    }

    /// 1-based position among `QUEUED` entries in dequeue order.
    pub async fn position(&self, id: RequestId) -> Result<Option<usize>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM integration_queue WHERE status = ?
             ORDER BY priority ASC, seq ASC",
        )
        .bind(IntegrationStatus::Queued.as_str())
        .fetch_all(&self.pool)
        .await?;
        let wanted = id.to_string();
        Ok(ids.iter().position(|(row_id,)| *row_id == wanted).map(|p| p + 1))
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let entries = self.list(|_| true).await?;
        let count = |wanted: &[IntegrationStatus]| {
            entries.iter().filter(|e| wanted.contains(&e.status)).count()
        };

        let picked_up: Vec<&QueueEntry> =
            entries.iter().filter(|e| e.started_at.is_some()).collect();
        let merged: Vec<&QueueEntry> = entries
            .iter()
            .filter(|e| e.status == IntegrationStatus::Merged)
            .collect();

        Ok(QueueStats {
            total: entries.len(),
            queued: count(&[IntegrationStatus::Queued]),
            in_flight: entries.iter().filter(|e| e.status.is_in_flight()).count(),
            manual_required: count(&[IntegrationStatus::ManualRequired]),
            merged: merged.len(),
            failed: count(&[IntegrationStatus::Failed]),
            canceled: count(&[IntegrationStatus::Canceled]),
            avg_wait_ms: average(picked_up.iter().map(|e| e.metrics.wait_ms)),
            avg_merge_ms: average(merged.iter().map(|e| e.metrics.merge_ms)),
        })
    }

    /// Transition audit trail for one request, oldest first.
    pub async fn events(&self, id: RequestId) -> Result<Vec<QueueEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT seq, request_id, from_status, to_status, message, at
             FROM queue_events WHERE request_id = ? ORDER BY seq ASC",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(QueueEvent::try_from).collect()
    }

    /// Most recent `MERGED` entry on `target`, by completion time.
    pub async fn last_merged(&self, target: &str) -> Result<Option<QueueEntry>> {
        let select = format!(
            "SELECT {ENTRY_COLUMNS} FROM integration_queue
             WHERE status = ? AND target_branch = ?
             ORDER BY completed_at DESC, seq DESC LIMIT 1"
        );
        let row: Option<QueueRow> = sqlx::query_as(&select)
            .bind(IntegrationStatus::Merged.as_str())
            .bind(target)
            .fetch_optional(&self.pool)
            .await?;
        row.map(QueueEntry::try_from).transpose()
    }

    /// Number of entries currently `MERGING` into `target`.
    pub async fn merging_count(&self, target: &str) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM integration_queue WHERE status = ? AND target_branch = ?",
        )
        .bind(IntegrationStatus::Merging.as_str())
        .bind(target)
        .fetch_one(&self.pool)
        .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

fn average(values: impl Iterator<Item = u64>) -> u64 {
    let (sum, n) = values.fold((0_u64, 0_u64), |(sum, n), v| (sum.saturating_add(v), n + 1));
    sum.checked_div(n).unwrap_or(0)
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_entry<'q>(query: SqliteQuery<'q>, entry: &QueueEntry) -> Result<SqliteQuery<'q>> {
    let conflict_report = entry
        .conflict_report
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let metrics = serde_json::to_string(&entry.metrics)?;

    Ok(query
        .bind(entry.id.to_string())
        .bind(entry.source_branch.clone())
        .bind(entry.target_branch.clone())
        .bind(entry.requester_id.clone())
        .bind(entry.status.as_str())
        .bind(i64::from(entry.priority))
        .bind(format_ts(entry.submitted_at))
        .bind(entry.queued_at.map(format_ts))
        .bind(entry.started_at.map(format_ts))
        .bind(entry.completed_at.map(format_ts))
        .bind(conflict_report)
        .bind(metrics)
        .bind(entry.last_error.clone())
        .bind(entry.trunk_before.as_ref().map(ToString::to_string))
        .bind(entry.trunk_after.as_ref().map(ToString::to_string))
        .bind(format_ts(entry.updated_at)))
}

async fn fetch_entry(tx: &mut Transaction<'_, Sqlite>, id: RequestId) -> Result<QueueEntry> {
    let select = format!("SELECT {ENTRY_COLUMNS} FROM integration_queue WHERE id = ?");
    let row: Option<QueueRow> = sqlx::query_as(&select)
        .bind(id.to_string())
        .fetch_optional(&mut **tx)
        .await?;
    row.ok_or_else(|| Error::not_found(format!("integration request {id}")))
        .and_then(QueueEntry::try_from)
}

async fn write_entry(tx: &mut Transaction<'_, Sqlite>, entry: &QueueEntry) -> Result<()> {
    let conflict_report = entry
        .conflict_report
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let metrics = serde_json::to_string(&entry.metrics)?;

    let updated = sqlx::query(
        "UPDATE integration_queue SET
            status = ?, priority = ?, queued_at = ?, started_at = ?, completed_at = ?,
            conflict_report = ?, metrics = ?, last_error = ?, trunk_before = ?, trunk_after = ?,
            updated_at = ?
         WHERE id = ?",
    )
    .bind(entry.status.as_str())
    .bind(i64::from(entry.priority))
    .bind(entry.queued_at.map(format_ts))
    .bind(entry.started_at.map(format_ts))
    .bind(entry.completed_at.map(format_ts))
    .bind(conflict_report)
    .bind(metrics)
    .bind(entry.last_error.clone())
    .bind(entry.trunk_before.as_ref().map(ToString::to_string))
    .bind(entry.trunk_after.as_ref().map(ToString::to_string))
    .bind(format_ts(entry.updated_at))
    .bind(entry.id.to_string())
    .execute(&mut **tx)
    .await?;

    if updated.rows_affected() == 1 {
        Ok(())
    } else {
        Err(Error::not_found(format!("integration request {}", entry.id)))
    }
}

async fn insert_event(
    tx: &mut Transaction<'_, Sqlite>,
    id: RequestId,
    from: Option<IntegrationStatus>,
    to: IntegrationStatus,
    message: Option<&str>,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO queue_events (request_id, from_status, to_status, message, at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(from.map(|s| s.as_str()))
    .bind(to.as_str())
    .bind(message.map(String::from))
    .bind(format_ts(at))
    .execute(&mut **tx)
    .await?;
    Ok(())
}
