//! Exclusive locks backed by `SQLite`.
//!
//! Two independent mutual-exclusion domains live here and never share a table:
//!
//! - [`ProcessorLock`]: single-owner lease that makes one scheduler the only
//!   consumer of a queue.
//! - [`MergeLock`]: one lease per target branch, held around every trunk
//!   mutation (merge or rollback).
//!
//! Leases carry a TTL so a crashed holder cannot wedge the system; a live
//! holder extends its lease with `heartbeat`.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{future::Future, time::Duration as StdDuration};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use super::queue_entities::{format_ts, parse_ts};
use crate::{Error, Result};

/// Resource name recorded in the audit trail for the processor lease.
const PROCESSOR_RESOURCE: &str = "processor";

/// Longest lease any lock grants, in seconds. Longer TTLs are clamped.
pub const MAX_LEASE_SECS: u64 = 7 * 24 * 60 * 60;

/// Information about an active lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockInfo {
    pub resource: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Audit log entry for lock operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockAuditEntry {
    pub resource: String,
    pub holder: String,
    /// `acquire`, `release`, `evict`, `timeout` or `double_release`.
    pub operation: String,
    pub at: DateTime<Utc>,
}

async fn init_audit(db: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS lock_audit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            resource TEXT NOT NULL,
            holder TEXT NOT NULL,
            operation TEXT NOT NULL,
            at TEXT NOT NULL
        )",
    )
    .execute(db)
    .await?;
    Ok(())
}

async fn log_operation(db: &SqlitePool, resource: &str, holder: &str, operation: &str) -> Result<()> {
    sqlx::query("INSERT INTO lock_audit (resource, holder, operation, at) VALUES (?, ?, ?, ?)")
        .bind(resource)
        .bind(holder)
        .bind(operation)
        .bind(format_ts(Utc::now()))
        .execute(db)
        .await?;
    Ok(())
}

/// Read the lock audit trail for one resource, oldest first.
pub async fn audit_trail(db: &SqlitePool, resource: &str) -> Result<Vec<LockAuditEntry>> {
    let rows: Vec<(String, String, String, String)> = sqlx::query_as(
        "SELECT resource, holder, operation, at FROM lock_audit WHERE resource = ? ORDER BY id",
    )
    .bind(resource)
    .fetch_all(db)
    .await?;

    rows.into_iter()
        .map(|(resource, holder, operation, at)| {
            Ok(LockAuditEntry {
                resource,
                holder,
                operation,
                at: parse_ts(&at)?,
            })
        })
        .collect()
}

fn to_chrono(duration: StdDuration) -> Duration {
    let capped = duration.min(StdDuration::from_secs(MAX_LEASE_SECS));
    Duration::from_std(capped).unwrap_or_else(|_| Duration::seconds(0))
}

/// Lease end for a grant at `now`; saturates at `now` when out of range.
fn lease_expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now.checked_add_signed(ttl).unwrap_or(now)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PROCESSOR LOCK
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Single-row leader lease: at most one scheduler processes a queue.
#[derive(Debug, Clone)]
pub struct ProcessorLock {
    db: SqlitePool,
    ttl: Duration,
}

impl ProcessorLock {
    pub fn new(db: SqlitePool, ttl: StdDuration) -> Self {
        Self {
            db,
            ttl: to_chrono(ttl),
        }
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS processor_lock (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                holder TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )",
        )
        .execute(&self.db)
        .await?;
        init_audit(&self.db).await
    }

    /// Take the lease if free, expired, or already ours.
    pub async fn try_acquire(&self, holder: &str) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO processor_lock (id, holder, acquired_at, expires_at) VALUES (1, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
             WHERE processor_lock.expires_at < excluded.acquired_at
                OR processor_lock.holder = excluded.holder",
        )
        .bind(holder)
        .bind(format_ts(now))
        .bind(format_ts(lease_expiry(now, self.ttl)))
        .execute(&self.db)
        .await?;

        let acquired = result.rows_affected() > 0;
        if acquired {
            log_operation(&self.db, PROCESSOR_RESOURCE, holder, "acquire").await?;
        }
        Ok(acquired)
    }

    /// Take the lease or fail with `LockHeld` naming the current holder.
    pub async fn acquire(&self, holder: &str) -> Result<LockInfo> {
        if self.try_acquire(holder).await? {
            return self
                .current()
                .await?
                .ok_or_else(|| Error::unknown("processor lock vanished after acquisition"));
        }
        let current = self
            .current()
            .await?
            .map_or_else(|| "unknown".to_string(), |info| info.holder);
        Err(Error::lock_held(PROCESSOR_RESOURCE, current))
    }

    /// Extend our lease. Returns false if we no longer hold it.
    pub async fn heartbeat(&self, holder: &str) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE processor_lock SET expires_at = ? WHERE id = 1 AND holder = ? AND expires_at >= ?",
        )
        .bind(format_ts(lease_expiry(now, self.ttl)))
        .bind(holder)
        .bind(format_ts(now))
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn release(&self, holder: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM processor_lock WHERE id = 1 AND holder = ?")
            .bind(holder)
            .execute(&self.db)
            .await?;
        let released = result.rows_affected() > 0;
        let operation = if released { "release" } else { "double_release" };
        log_operation(&self.db, PROCESSOR_RESOURCE, holder, operation).await?;
        Ok(released)
    }

    /// The live (unexpired) lease, if any.
    pub async fn current(&self) -> Result<Option<LockInfo>> {
        let row: Option<(String, String, String)> = sqlx::query_as(
            "SELECT holder, acquired_at, expires_at FROM processor_lock WHERE id = 1 AND expires_at >= ?",
        )
        .bind(format_ts(Utc::now()))
        .fetch_optional(&self.db)
        .await?;

        row.map(|(holder, acquired_at, expires_at)| {
            Ok(LockInfo {
                resource: PROCESSOR_RESOURCE.to_string(),
                holder,
                acquired_at: parse_ts(&acquired_at)?,
                expires_at: parse_ts(&expires_at)?,
            })
        })
        .transpose()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MERGE LOCK
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Timing knobs for [`MergeLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeLockSettings {
    /// Stale leases older than this are evicted.
    pub ttl: StdDuration,
    /// Give up acquiring after this long.
    pub timeout: StdDuration,
    /// Poll interval while waiting.
    pub retry: StdDuration,
}

impl Default for MergeLockSettings {
    fn default() -> Self {
        Self {
            ttl: StdDuration::from_secs(600),
            timeout: StdDuration::from_secs(60),
            retry: StdDuration::from_millis(250),
        }
    }
}

impl MergeLockSettings {
    pub fn from_config(config: &crate::config::MergeConfig) -> Self {
        Self {
            ttl: StdDuration::from_secs(config.lock_ttl_secs),
            timeout: StdDuration::from_secs(config.lock_timeout_secs),
            retry: StdDuration::from_millis(config.lock_retry_ms),
        }
    }
}

/// Per-target-branch trunk mutation lock.
#[derive(Debug, Clone)]
pub struct MergeLock {
    db: SqlitePool,
    settings: MergeLockSettings,
}

/// Audit resource name for a target branch.
fn merge_resource(target: &str) -> String {
    format!("merge:{target}")
}

impl MergeLock {
    pub const fn new(db: SqlitePool, settings: MergeLockSettings) -> Self {
        Self { db, settings }
    }

    pub const fn settings(&self) -> MergeLockSettings {
        self.settings
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS merge_locks (
                target TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )",
        )
        .execute(&self.db)
        .await?;
        init_audit(&self.db).await
    }

    /// One non-blocking attempt. Evicts an expired holder.
    pub async fn try_acquire(&self, target: &str, holder: &str) -> Result<bool> {
        let now = Utc::now();
        let ttl = to_chrono(self.settings.ttl);

        let stale: Option<(String,)> = sqlx::query_as(
            "SELECT holder FROM merge_locks WHERE target = ? AND expires_at < ? AND holder != ?",
        )
        .bind(target)
        .bind(format_ts(now))
        .bind(holder)
        .fetch_optional(&self.db)
        .await?;

        let result = sqlx::query(
            "INSERT INTO merge_locks (target, holder, acquired_at, expires_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(target) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
             WHERE merge_locks.expires_at < excluded.acquired_at
                OR merge_locks.holder = excluded.holder",
        )
        .bind(target)
        .bind(holder)
        .bind(format_ts(now))
        .bind(format_ts(lease_expiry(now, ttl)))
        .execute(&self.db)
        .await?;

        let acquired = result.rows_affected() > 0;
        if acquired {
            if let Some((evicted,)) = stale {
                tracing::warn!(target, evicted = %evicted, "Evicted stale merge lock");
                log_operation(&self.db, &merge_resource(target), &evicted, "evict").await?;
            }
            log_operation(&self.db, &merge_resource(target), holder, "acquire").await?;
        }
        Ok(acquired)
    }

    /// Wait for the lock, polling every `retry` up to `timeout`.
    ///
    /// Returns a `LOCK_TIMEOUT` error when the wait is exhausted.
    pub async fn acquire(&self, target: &str, holder: &str) -> Result<LockInfo> {
        let started = tokio::time::Instant::now();
        loop {
            if self.try_acquire(target, holder).await? {
                tracing::debug!(target, holder, "Merge lock acquired");
                return self
                    .holder(target)
                    .await?
                    .ok_or_else(|| Error::unknown("merge lock vanished after acquisition"));
            }

            let waited = started.elapsed();
            if waited >= self.settings.timeout {
                let waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(target, holder, waited_ms, "Timed out waiting for merge lock");
                log_operation(&self.db, &merge_resource(target), holder, "timeout").await?;
                return Err(Error::lock_timeout(merge_resource(target), waited_ms));
            }

            let remaining = self.settings.timeout.saturating_sub(waited);
            tokio::time::sleep(self.settings.retry.min(remaining)).await;
        }
    }

    /// Release the lock if `holder` owns it.
    pub async fn release(&self, target: &str, holder: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM merge_locks WHERE target = ? AND holder = ?")
            .bind(target)
            .bind(holder)
            .execute(&self.db)
            .await?;
        let released = result.rows_affected() > 0;
        let operation = if released { "release" } else { "double_release" };
        log_operation(&self.db, &merge_resource(target), holder, operation).await?;
        Ok(released)
    }

    /// Extend our lease on `target`.
    pub async fn heartbeat(&self, target: &str, holder: &str) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE merge_locks SET expires_at = ? WHERE target = ? AND holder = ? AND expires_at >= ?",
        )
        .bind(format_ts(lease_expiry(now, to_chrono(self.settings.ttl))))
        .bind(target)
        .bind(holder)
        .bind(format_ts(now))
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Run `work` while heartbeating `holder`'s lease on `target`.
    ///
    /// The lease is extended every third of its TTL, so a mutation that
    /// outlives one TTL is never evicted as stale. Heartbeat failures are
    /// logged and do not interrupt `work`.
    pub async fn hold_while<F: Future>(&self, target: &str, holder: &str, work: F) -> F::Output {
        let period = (self.settings.ttl / 3).max(StdDuration::from_millis(10));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(work);

        loop {
            tokio::select! {
                out = &mut work => return out,
                extended = async {
                    ticker.tick().await;
                    self.heartbeat(target, holder).await
                } => match extended {
                    Ok(true) => tracing::trace!(target, holder, "Merge lock extended"),
                    Ok(false) => tracing::warn!(target, holder, "Merge lock lease lost while held"),
                    Err(e) => tracing::warn!(target, holder, error = %e, "Merge lock heartbeat failed"),
                },
            }
        }
    }

    /// The live holder of `target`'s lock, if any.
    pub async fn holder(&self, target: &str) -> Result<Option<LockInfo>> {
        let row: Option<(String, String, String)> = sqlx::query_as(
            "SELECT holder, acquired_at, expires_at FROM merge_locks WHERE target = ? AND expires_at >= ?",
        )
        .bind(target)
        .bind(format_ts(Utc::now()))
        .fetch_optional(&self.db)
        .await?;

        row.map(|(holder, acquired_at, expires_at)| {
            Ok(LockInfo {
                resource: merge_resource(target),
                holder,
                acquired_at: parse_ts(&acquired_at)?,
                expires_at: parse_ts(&expires_at)?,
            })
        })
        .transpose()
    }

    pub async fn is_held(&self, target: &str) -> Result<bool> {
        Ok(self.holder(target).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;

    async fn pool() -> Result<SqlitePool> {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(Error::from)
    }

    fn quick() -> MergeLockSettings {
        MergeLockSettings {
            ttl: StdDuration::from_secs(60),
            timeout: StdDuration::from_millis(60),
            retry: StdDuration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_processor_lock_is_exclusive() -> Result<()> {
        let lock = ProcessorLock::new(pool().await?, StdDuration::from_secs(60));
        lock.init().await?;

        assert!(lock.try_acquire("scheduler-a").await?);
        assert!(!lock.try_acquire("scheduler-b").await?);
        assert!(lock.try_acquire("scheduler-a").await?, "re-entrant for holder");

        let err = lock.acquire("scheduler-b").await;
        assert!(matches!(err, Err(ref e) if e.to_string().contains("scheduler-a")));

        assert!(lock.release("scheduler-a").await?);
        assert!(lock.try_acquire("scheduler-b").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_processor_lease_can_be_taken() -> Result<()> {
        let lock = ProcessorLock::new(pool().await?, StdDuration::from_millis(1));
        lock.init().await?;
        assert!(lock.try_acquire("crashed").await?);
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert!(lock.try_acquire("fresh").await?);
        assert_eq!(lock.current().await?.map(|i| i.holder), None);
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_lock_times_out() -> Result<()> {
        let lock = MergeLock::new(pool().await?, quick());
        lock.init().await?;

        lock.acquire("main", "worker:1").await?;
        let err = lock.acquire("main", "worker:2").await;
        assert!(matches!(err, Err(ref e) if e.is_transient() && e.to_string().contains("LOCK_TIMEOUT")));
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_locks_are_per_target() -> Result<()> {
        let lock = MergeLock::new(pool().await?, quick());
        lock.init().await?;

        lock.acquire("main", "worker:1").await?;
        lock.acquire("release", "worker:2").await?;
        assert!(lock.is_held("main").await?);
        assert!(lock.is_held("release").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_release_by_non_holder_is_noop() -> Result<()> {
        let db = pool().await?;
        let lock = MergeLock::new(db.clone(), quick());
        lock.init().await?;

        lock.acquire("main", "worker:1").await?;
        assert!(!lock.release("main", "worker:2").await?);
        assert!(lock.is_held("main").await?);
        assert!(lock.release("main", "worker:1").await?);
        assert!(!lock.is_held("main").await?);

        let ops: Vec<String> = audit_trail(&db, "merge:main")
            .await?
            .into_iter()
            .map(|e| e.operation)
            .collect();
        assert_eq!(ops, vec!["acquire", "double_release", "release"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_oversized_ttl_is_clamped() -> Result<()> {
        let lock = MergeLock::new(
            pool().await?,
            MergeLockSettings {
                ttl: StdDuration::from_secs(u64::MAX),
                ..quick()
            },
        );
        lock.init().await?;
        let info = lock.acquire("main", "worker:1").await?;
        assert!(info.expires_at - info.acquired_at <= Duration::seconds(7 * 24 * 60 * 60));
        assert!(lock.heartbeat("main", "worker:1").await?);

        let processor = ProcessorLock::new(pool().await?, StdDuration::from_secs(u64::MAX));
        processor.init().await?;
        assert!(processor.try_acquire("scheduler-a").await?);
        assert!(processor.heartbeat("scheduler-a").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_lease_outlives_ttl_while_work_runs() -> Result<()> {
        let lock = MergeLock::new(
            pool().await?,
            MergeLockSettings {
                ttl: StdDuration::from_millis(300),
                ..quick()
            },
        );
        lock.init().await?;
        lock.acquire("main", "worker:1").await?;

        let contender = lock.clone();
        let taken = lock
            .hold_while("main", "worker:1", async {
                tokio::time::sleep(StdDuration::from_millis(900)).await;
                contender.try_acquire("main", "worker:2").await
            })
            .await?;
        assert!(!taken);
        assert_eq!(
            lock.holder("main").await?.map(|i| i.holder).as_deref(),
            Some("worker:1")
        );

        // Without heartbeats the same lease lapses.
        tokio::time::sleep(StdDuration::from_millis(400)).await;
        assert!(lock.try_acquire("main", "worker:2").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_merge_lock_is_evicted() -> Result<()> {
        let db = pool().await?;
        let short = MergeLock::new(
            db.clone(),
            MergeLockSettings {
                ttl: StdDuration::from_millis(1),
                ..quick()
            },
        );
        short.init().await?;
        short.acquire("main", "crashed:1").await?;
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let lock = MergeLock::new(db.clone(), quick());
        lock.acquire("main", "worker:2").await?;
        assert_eq!(
            lock.holder("main").await?.map(|i| i.holder).as_deref(),
            Some("worker:2")
        );
        Ok(())
    }
}
