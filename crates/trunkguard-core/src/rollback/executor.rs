//! Reverts the trunk to a decision's target and verifies recovery.
//!
//! The revert is one new commit on top of the current tip whose tree equals
//! the target's tree; history is kept. It runs under the same per-target
//! merge lock as integrations, so the two can never interleave.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;

use super::{
    decision::RollbackDecision,
    ledger::{ExecutionStatus, RollbackLedger},
};
use crate::{
    alerts::{AlertEvent, AlertKind, AlertSeverity, AlertSink},
    config::RollbackConfig,
    coordination::MergeLock,
    repository::{backup_ref, CommitId, RepositoryClient},
    Error, Result,
};

/// Answers "has the service recovered?" after a rollback.
#[async_trait]
pub trait HealthVerifier: Send + Sync {
    async fn is_healthy(&self) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifySettings {
    pub retries: u32,
    pub delay: Duration,
}

impl VerifySettings {
    pub const fn from_config(config: &RollbackConfig) -> Self {
        Self {
            retries: config.verify_retries,
            delay: Duration::from_secs(config.verify_delay_secs),
        }
    }
}

/// What an executed rollback did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    pub execution_id: i64,
    pub decision_id: i64,
    pub trunk: String,
    pub status: ExecutionStatus,
    pub backup_ref: String,
    pub reverted_from: CommitId,
    pub revert_commit: CommitId,
    pub target_version: CommitId,
    /// Health checks performed before the verdict.
    pub verify_attempts: u32,
}

#[derive(Clone)]
pub struct RollbackExecutor {
    repo: Arc<dyn RepositoryClient>,
    merge_lock: MergeLock,
    ledger: RollbackLedger,
    verifier: Arc<dyn HealthVerifier>,
    alerts: Arc<dyn AlertSink>,
    verify: VerifySettings,
    worker_id: String,
}

impl std::fmt::Debug for RollbackExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackExecutor")
            .field("verify", &self.verify)
            .field("worker_id", &self.worker_id)
            .finish_non_exhaustive()
    }
}

impl RollbackExecutor {
    pub fn new(
        repo: Arc<dyn RepositoryClient>,
        merge_lock: MergeLock,
        ledger: RollbackLedger,
        verifier: Arc<dyn HealthVerifier>,
        alerts: Arc<dyn AlertSink>,
        verify: VerifySettings,
    ) -> Self {
        Self {
            repo,
            merge_lock,
            ledger,
            verifier,
            alerts,
            verify,
            worker_id: format!("rollback-{}", std::process::id()),
        }
    }

    /// Revert `trunk` to `decision.target_version`, then verify health.
    ///
    /// # Errors
    ///
    /// - `RollbackInfeasible` when the decision carries blocking reasons; nothing is touched
    /// - `InvalidRequest` when the decision does not recommend a rollback
    /// - `LockTimeout` when the trunk stays busy (recorded as `ABORTED`)
    /// - any repository error before the backup exists (recorded as `ABORTED`)
    /// - any repository error from the revert itself (recorded as `FAILED`)
    ///
    /// Every recorded outcome other than success raises a `RollbackFailed` alert.
    ///
    /// A revert that was pushed but did not restore health returns a report
    /// with status `FAILED` and raises a critical alert.
    pub async fn execute(
        &self,
        trunk: &str,
        decision_id: i64,
        decision: &RollbackDecision,
    ) -> Result<RollbackReport> {
        if !decision.feasible {
            return Err(Error::rollback_infeasible(decision.blocking_reasons.clone()));
        }
        if !decision.recommendation.is_actionable() {
            return Err(Error::invalid_request(format!(
                "decision {decision_id} recommends {}; there is nothing to execute",
                decision.recommendation
            )));
        }
        let target = decision.target_version.clone().ok_or_else(|| {
            Error::rollback_infeasible(vec!["decision has no target revert point".to_string()])
        })?;

        let holder = format!("{}:decision-{decision_id}", self.worker_id);
        if let Err(e) = self.merge_lock.acquire(trunk, &holder).await {
            self.record_abort(trunk, decision_id, None, &e).await;
            return Err(e);
        }
        let reverted = self
            .merge_lock
            .hold_while(trunk, &holder, self.revert_locked(trunk, decision_id, decision, &target))
            .await;
        if let Err(e) = self.merge_lock.release(trunk, &holder).await {
            tracing::error!(trunk, error = %e, "Failed to release merge lock after rollback");
        }
        let (execution_id, backup, tip, revert_commit) = reverted?;

        let (healthy, attempts) = self.verify_health().await;
        let status = if healthy {
            ExecutionStatus::Succeeded
        } else {
            ExecutionStatus::Failed
        };
        let message = if healthy {
            format!("healthy after {attempts} check(s)")
        } else {
            format!("health did not recover after {attempts} check(s)")
        };
        self.ledger
            .finish_execution(execution_id, status, Some(&revert_commit), Some(&message))
            .await?;

        if healthy {
            tracing::info!(trunk, execution_id, revert = %revert_commit.short(), "Rollback verified");
            self.alerts.emit(
                &AlertEvent::new(
                    AlertKind::RollbackSucceeded,
                    AlertSeverity::Info,
                    format!("'{trunk}' rolled back to {} and is healthy", target.short()),
                )
                .with_target(trunk),
            );
        } else {
            tracing::error!(trunk, execution_id, "Rollback did not restore health");
            self.alerts.emit(
                &AlertEvent::new(
                    AlertKind::RollbackFailed,
                    AlertSeverity::Critical,
                    format!(
                        "'{trunk}' was rolled back to {} but {message}; human action required (backup at {backup})",
                        target.short()
                    ),
                )
                .with_target(trunk),
            );
        }

        Ok(RollbackReport {
            execution_id,
            decision_id,
            trunk: trunk.to_string(),
            status,
            backup_ref: backup,
            reverted_from: tip,
            revert_commit,
            target_version: target,
            verify_attempts: attempts,
        })
    }

    /// Backup, revert commit, push. Runs under the merge lock.
    async fn revert_locked(
        &self,
        trunk: &str,
        decision_id: i64,
        decision: &RollbackDecision,
        target: &CommitId,
    ) -> Result<(i64, String, CommitId, CommitId)> {
        let tip = match self.repo.fetch(trunk).await {
            Ok(tip) => tip,
            Err(e) => {
                self.record_abort(trunk, decision_id, None, &e).await;
                return Err(e);
            }
        };
        let backup = backup_ref(&format!("{trunk}/rollback-{decision_id}"));
        if let Err(e) = self.repo.create_ref(&backup, &tip).await {
            self.record_abort(trunk, decision_id, Some(&tip), &e).await;
            return Err(e);
        }
        let execution_id = self
            .ledger
            .begin_execution(decision_id, trunk, &backup, &tip)
            .await?;

        let pushed = async {
            let tree = self.repo.tree_of(target).await?;
            let message = format!(
                "Revert '{trunk}' to {}\n\nRollback-Decision: {decision_id}\nFailure-Type: {}\nSeverity: {}\n",
                target.short(),
                decision.failure_type,
                decision.severity
            );
            let commit = self
                .repo
                .create_commit(&tree, std::slice::from_ref(&tip), &message)
                .await?;
            self.repo.push(trunk, &commit, &tip).await?;
            Ok::<_, Error>(commit)
        }
        .await;

        match pushed {
            Ok(commit) => {
                tracing::info!(
                    trunk,
                    from = %tip.short(),
                    to = %target.short(),
                    revert = %commit.short(),
                    "Trunk reverted"
                );
                Ok((execution_id, backup, tip, commit))
            }
            Err(e) => {
                let message = e.to_string();
                self.ledger
                    .finish_execution(execution_id, ExecutionStatus::Failed, None, Some(&message))
                    .await?;
                self.alerts.emit(
                    &AlertEvent::new(
                        AlertKind::RollbackFailed,
                        AlertSeverity::Critical,
                        format!("rollback of '{trunk}' failed before completion: {message}"),
                    )
                    .with_target(trunk),
                );
                Err(e)
            }
        }
    }

    /// Ledger row and alert for a run that never touched the trunk.
    async fn record_abort(&self, trunk: &str, decision_id: i64, tip: Option<&CommitId>, error: &Error) {
        let message = error.to_string();
        match self.ledger.record_aborted(decision_id, trunk, tip, &message).await {
            Ok(execution_id) => {
                tracing::warn!(trunk, decision_id, execution_id, error = %error, "Rollback aborted");
            }
            Err(e) => tracing::error!(trunk, decision_id, error = %e, "Failed to record aborted rollback"),
        }
        self.alerts.emit(
            &AlertEvent::new(
                AlertKind::RollbackFailed,
                AlertSeverity::Error,
                format!("rollback of '{trunk}' (decision {decision_id}) aborted before touching the trunk: {message}"),
            )
            .with_target(trunk),
        );
    }

    /// Poll the verifier up to `retries` times, `delay` apart.
    async fn verify_health(&self) -> (bool, u32) {
        for attempt in 1..=self.verify.retries {
            tokio::time::sleep(self.verify.delay).await;
            match self.verifier.is_healthy().await {
                Ok(true) => return (true, attempt),
                Ok(false) => tracing::warn!(attempt, "Still unhealthy after rollback"),
                Err(e) => tracing::warn!(attempt, error = %e, "Health verification failed"),
            }
        }
        (false, self.verify.retries)
    }
}
