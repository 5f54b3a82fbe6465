//! Append-only rollback audit trail.
//!
//! Decisions are never edited; each evaluation is a new row. An execution row
//! is opened when the trunk mutation starts and closed exactly once. A run that
//! never got to touch the trunk is written already closed as `ABORTED`.
//!
//! The latest `FAILED` execution on a trunk puts automatic rollback on hold
//! until an operator acknowledges it or a later run succeeds.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use super::decision::RollbackDecision;
use crate::{
    coordination::queue_entities::{format_ts, parse_ts},
    repository::CommitId,
    Error, Result,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDecision {
    pub id: i64,
    pub trunk: String,
    #[serde(flatten)]
    pub decision: RollbackDecision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    InProgress,
    Succeeded,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackExecution {
    pub id: i64,
    pub decision_id: i64,
    pub trunk: String,
    pub status: ExecutionStatus,
    pub backup_ref: Option<String>,
    pub trunk_before: Option<CommitId>,
    pub revert_commit: Option<CommitId>,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

type ExecutionRow = (
    i64,
    i64,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
);

const EXECUTION_COLUMNS: &str = "id, decision_id, trunk, status, backup_ref, trunk_before, \
     revert_commit, message, started_at, finished_at, acknowledged_at";

fn execution_from_row(row: ExecutionRow) -> Result<RollbackExecution> {
    let (id, decision_id, trunk, status, backup_ref, before, revert, message, started, finished, acked) =
        row;
    Ok(RollbackExecution {
        id,
        decision_id,
        trunk,
        status: status
            .parse()
            .map_err(|_| Error::parse_error(format!("Invalid execution status: {status}")))?,
        backup_ref,
        trunk_before: before.map(CommitId::new),
        revert_commit: revert.map(CommitId::new),
        message,
        started_at: parse_ts(&started)?,
        finished_at: finished.as_deref().map(parse_ts).transpose()?,
        acknowledged_at: acked.as_deref().map(parse_ts).transpose()?,
    })
}

#[derive(Debug, Clone)]
pub struct RollbackLedger {
    db: SqlitePool,
}

impl RollbackLedger {
    pub const fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rollback_decisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trunk TEXT NOT NULL,
                failure_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                recommendation TEXT NOT NULL,
                feasible INTEGER NOT NULL,
                evaluated_at TEXT NOT NULL,
                payload TEXT NOT NULL
            )",
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rollback_executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                decision_id INTEGER NOT NULL REFERENCES rollback_decisions(id),
                trunk TEXT NOT NULL,
                status TEXT NOT NULL,
                backup_ref TEXT,
                trunk_before TEXT,
                revert_commit TEXT,
                message TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                acknowledged_at TEXT
            )",
        )
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Append a decision and return its record id.
    pub async fn record_decision(&self, trunk: &str, decision: &RollbackDecision) -> Result<i64> {
        let payload = serde_json::to_string(decision)?;
        let result = sqlx::query(
            "INSERT INTO rollback_decisions
                (trunk, failure_type, severity, recommendation, feasible, evaluated_at, payload)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(trunk)
        .bind(decision.failure_type.to_string())
        .bind(decision.severity.to_string())
        .bind(decision.recommendation.to_string())
        .bind(decision.feasible)
        .bind(format_ts(decision.evaluated_at))
        .bind(payload)
        .execute(&self.db)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn decision(&self, id: i64) -> Result<StoredDecision> {
        let row: Option<(i64, String, String)> =
            sqlx::query_as("SELECT id, trunk, payload FROM rollback_decisions WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.db)
                .await?;
        let (id, trunk, payload) =
            row.ok_or_else(|| Error::not_found(format!("rollback decision {id}")))?;
        Ok(StoredDecision {
            id,
            trunk,
            decision: serde_json::from_str(&payload)?,
        })
    }

    /// Most recent decisions for `trunk`, newest first.
    pub async fn decisions(&self, trunk: &str, limit: u32) -> Result<Vec<StoredDecision>> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT id, trunk, payload FROM rollback_decisions
             WHERE trunk = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(trunk)
        .bind(i64::from(limit))
        .fetch_all(&self.db)
        .await?;
        rows.into_iter()
            .map(|(id, trunk, payload)| {
                Ok(StoredDecision {
                    id,
                    trunk,
                    decision: serde_json::from_str(&payload)?,
                })
            })
            .collect()
    }

    /// Open an execution record before the trunk is touched.
    pub async fn begin_execution(
        &self,
        decision_id: i64,
        trunk: &str,
        backup_ref: &str,
        trunk_before: &CommitId,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO rollback_executions
                (decision_id, trunk, status, backup_ref, trunk_before, started_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(decision_id)
        .bind(trunk)
        .bind(ExecutionStatus::InProgress.to_string())
        .bind(backup_ref)
        .bind(trunk_before.as_str())
        .bind(format_ts(Utc::now()))
        .execute(&self.db)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Close an open execution. Closing twice is an error.
    pub async fn finish_execution(
        &self,
        id: i64,
        status: ExecutionStatus,
        revert_commit: Option<&CommitId>,
        message: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE rollback_executions
             SET status = ?, revert_commit = COALESCE(?, revert_commit), message = ?, finished_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(status.to_string())
        .bind(revert_commit.map(CommitId::as_str))
        .bind(message)
        .bind(format_ts(Utc::now()))
        .bind(id)
        .bind(ExecutionStatus::InProgress.to_string())
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::invalid_transition(format!(
                "rollback execution {id} is not in progress"
            )));
        }
        Ok(())
    }

    /// Write a closed `ABORTED` row for a run that never touched the trunk.
    pub async fn record_aborted(
        &self,
        decision_id: i64,
        trunk: &str,
        trunk_before: Option<&CommitId>,
        message: &str,
    ) -> Result<i64> {
        let now = format_ts(Utc::now());
        let result = sqlx::query(
            "INSERT INTO rollback_executions
                (decision_id, trunk, status, trunk_before, message, started_at, finished_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(decision_id)
        .bind(trunk)
        .bind(ExecutionStatus::Aborted.to_string())
        .bind(trunk_before.map(CommitId::as_str))
        .bind(message)
        .bind(now.as_str())
        .bind(now.as_str())
        .execute(&self.db)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// The failed execution holding automatic rollback back on `trunk`, if any.
    ///
    /// Only the newest `SUCCEEDED` or `FAILED` row counts; aborted and open
    /// rows never changed the trunk.
    pub async fn unresolved_failure(&self, trunk: &str) -> Result<Option<RollbackExecution>> {
        let select = format!(
            "SELECT {EXECUTION_COLUMNS} FROM rollback_executions
             WHERE trunk = ? AND status IN (?, ?) ORDER BY id DESC LIMIT 1"
        );
        let row: Option<ExecutionRow> = sqlx::query_as(&select)
            .bind(trunk)
            .bind(ExecutionStatus::Succeeded.to_string())
            .bind(ExecutionStatus::Failed.to_string())
            .fetch_optional(&self.db)
            .await?;
        let latest = row.map(execution_from_row).transpose()?;
        Ok(latest.filter(|e| e.status == ExecutionStatus::Failed && e.acknowledged_at.is_none()))
    }

    /// Operator sign-off on a failed execution; lifts the hold it placed.
    pub async fn acknowledge(&self, id: i64) -> Result<RollbackExecution> {
        let execution = self.execution(id).await?;
        if execution.status != ExecutionStatus::Failed {
            return Err(Error::invalid_transition(format!(
                "rollback execution {id} is {}, only FAILED executions can be acknowledged",
                execution.status
            )));
        }
        sqlx::query(
            "UPDATE rollback_executions SET acknowledged_at = COALESCE(acknowledged_at, ?)
             WHERE id = ?",
        )
        .bind(format_ts(Utc::now()))
        .bind(id)
        .execute(&self.db)
        .await?;
        self.execution(id).await
    }

    /// Whether a rollback is mutating `trunk` right now.
    pub async fn in_progress(&self, trunk: &str) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM rollback_executions WHERE trunk = ? AND status = ?",
        )
        .bind(trunk)
        .bind(ExecutionStatus::InProgress.to_string())
        .fetch_one(&self.db)
        .await?;
        Ok(count > 0)
    }

    pub async fn execution(&self, id: i64) -> Result<RollbackExecution> {
        let select = format!("SELECT {EXECUTION_COLUMNS} FROM rollback_executions WHERE id = ?");
        let row: Option<ExecutionRow> = sqlx::query_as(&select)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.ok_or_else(|| Error::not_found(format!("rollback execution {id}")))
            .and_then(execution_from_row)
    }

    /// Executions on `trunk`, newest first.
    pub async fn executions(&self, trunk: &str) -> Result<Vec<RollbackExecution>> {
        let select = format!(
            "SELECT {EXECUTION_COLUMNS} FROM rollback_executions WHERE trunk = ? ORDER BY id DESC"
        );
        let rows: Vec<ExecutionRow> = sqlx::query_as(&select).bind(trunk).fetch_all(&self.db).await?;
        rows.into_iter().map(execution_from_row).collect()
    }
}
