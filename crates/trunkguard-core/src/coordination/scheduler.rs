//! The single-consumer processing loop.
//!
//! Each iteration claims the head of the queue, prechecks it, and routes it:
//! clean reports go to the [`MergeExecutor`], conflicts go through the
//! [`RebaseAdvisor`]. Exactly one scheduler may run per queue, enforced by
//! the [`ProcessorLock`].

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

use super::{
    locks::{MergeLock, MergeLockSettings, ProcessorLock},
    merge_executor::{MergeExecutor, MergeOutcome},
    precheck::ConflictPrechecker,
    queue::QueueStore,
    queue_entities::{QueueEntry, Recommendation, RequestId},
    queue_status::IntegrationStatus,
    rebase_advisor::RebaseAdvisor,
};
use crate::{
    alerts::{AlertEvent, AlertKind, AlertSeverity, AlertSink},
    config::Config,
    repository::{backup_ref, RebaseOutcome, RepositoryClient},
    shutdown::ShutdownSignal,
    Error, Result,
};

/// Tunables pulled from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub processor_lock_ttl: Duration,
    pub merge_lock: MergeLockSettings,
    pub prefer_source: bool,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            worker_id: format!("scheduler-{}", std::process::id()),
            poll_interval: Duration::from_secs(config.scheduler.poll_interval_secs),
            processor_lock_ttl: Duration::from_secs(config.scheduler.processor_lock_ttl_secs),
            merge_lock: MergeLockSettings::from_config(&config.merge),
            prefer_source: config.rebase.prefer_source,
        }
    }

    #[must_use]
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }
}

/// Result of processing one claimed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Processed {
    Merged { id: RequestId, fast_forward: bool },
    AlreadyIntegrated { id: RequestId },
    Requeued { id: RequestId, reason: String },
    Rebased { id: RequestId, retry_count: u32 },
    ManualRequired { id: RequestId, files: Vec<String> },
    Failed { id: RequestId, error: String },
}

impl Processed {
    pub const fn id(&self) -> RequestId {
        match self {
            Self::Merged { id, .. }
            | Self::AlreadyIntegrated { id }
            | Self::Requeued { id, .. }
            | Self::Rebased { id, .. }
            | Self::ManualRequired { id, .. }
            | Self::Failed { id, .. } => *id,
        }
    }
}

/// Totals for a `run` invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub iterations: u64,
    pub merged: u64,
    pub failed: u64,
    pub requeued: u64,
    pub manual: u64,
}

impl RunSummary {
    fn record(&mut self, processed: &Processed) {
        self.iterations += 1;
        match processed {
            Processed::Merged { .. } | Processed::AlreadyIntegrated { .. } => self.merged += 1,
            Processed::Failed { .. } => self.failed += 1,
            Processed::Requeued { .. } | Processed::Rebased { .. } => self.requeued += 1,
            Processed::ManualRequired { .. } => self.manual += 1,
        }
    }
}

pub struct Scheduler {
    store: QueueStore,
    repo: Arc<dyn RepositoryClient>,
    prechecker: ConflictPrechecker,
    advisor: RebaseAdvisor,
    executor: MergeExecutor,
    processor_lock: ProcessorLock,
    alerts: Arc<dyn AlertSink>,
    settings: SchedulerSettings,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(
        store: QueueStore,
        repo: Arc<dyn RepositoryClient>,
        advisor: RebaseAdvisor,
        alerts: Arc<dyn AlertSink>,
        settings: SchedulerSettings,
    ) -> Self {
        let merge_lock = MergeLock::new(store.pool().clone(), settings.merge_lock);
        let executor = MergeExecutor::new(
            Arc::clone(&repo),
            store.clone(),
            merge_lock,
            settings.worker_id.clone(),
        );
        let processor_lock = ProcessorLock::new(store.pool().clone(), settings.processor_lock_ttl);
        Self {
            prechecker: ConflictPrechecker::new(Arc::clone(&repo)),
            store,
            repo,
            advisor,
            executor,
            processor_lock,
            alerts,
            settings,
        }
    }

    pub fn from_config(
        config: &Config,
        store: QueueStore,
        repo: Arc<dyn RepositoryClient>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self::new(
            store,
            repo,
            RebaseAdvisor::from_config(&config.queue, &config.rebase),
            alerts,
            SchedulerSettings::from_config(config),
        )
    }

    pub const fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Become the queue's only consumer and resume anything a crash left behind.
    ///
    /// # Errors
    ///
    /// `LockHeld` if another scheduler is active on this queue.
    pub async fn start(&self) -> Result<Vec<RequestId>> {
        self.processor_lock.init().await?;
        MergeLock::new(self.store.pool().clone(), self.settings.merge_lock)
            .init()
            .await?;
        self.processor_lock.acquire(&self.settings.worker_id).await?;
        tracing::info!(worker = %self.settings.worker_id, "Scheduler holds the processor lock");
        self.store.recover_interrupted().await
    }

    pub async fn stop(&self) -> Result<()> {
        self.processor_lock.release(&self.settings.worker_id).await?;
        tracing::info!(worker = %self.settings.worker_id, "Scheduler released the processor lock");
        Ok(())
    }

    /// Claim and process the head of the queue. `None` when the queue is empty.
    pub async fn run_once(&self) -> Result<Option<Processed>> {
        if !self
            .processor_lock
            .heartbeat(&self.settings.worker_id)
            .await?
        {
            let holder = self
                .processor_lock
                .current()
                .await?
                .map_or_else(|| "nobody".to_string(), |info| info.holder);
            return Err(Error::lock_held("processor", holder));
        }

        let Some(entry) = self.store.dequeue_next_queued().await? else {
            return Ok(None);
        };
        tracing::info!(
            request_id = %entry.id,
            source = %entry.source_branch,
            target = %entry.target_branch,
            "Processing integration request"
        );
        self.process(entry).await.map(Some)
    }

    /// Loop until a shutdown signal arrives. Releases the processor lock on exit.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<ShutdownSignal>) -> Result<RunSummary> {
        self.start().await?;
        let mut summary = RunSummary::default();

        let result = loop {
            let idle = match self.run_once().await {
                Ok(Some(processed)) => {
                    summary.record(&processed);
                    false
                }
                Ok(None) => true,
                Err(e @ Error::Execution(crate::error::ExecutionError::LockHeld { .. })) => {
                    break Err(e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Scheduler iteration failed");
                    true
                }
            };

            match shutdown.try_recv() {
                Ok(_) | Err(broadcast::error::TryRecvError::Closed) => break Ok(()),
                Err(_) => {}
            }

            if idle {
                tokio::select! {
                    _ = shutdown.recv() => break Ok(()),
                    () = tokio::time::sleep(self.settings.poll_interval) => {}
                }
            }
        };

        if let Err(e) = self.stop().await {
            tracing::warn!(error = %e, "Failed to release processor lock");
        }
        tracing::info!(
            iterations = summary.iterations,
            merged = summary.merged,
            failed = summary.failed,
            "Scheduler stopped"
        );
        result.map(|()| summary)
    }

    /// Process until no `QUEUED` entry remains. Useful for `--once` and tests.
    pub async fn drain(&self) -> Result<Vec<Processed>> {
        let mut processed = Vec::new();
        while let Some(step) = self.run_once().await? {
            processed.push(step);
        }
        Ok(processed)
    }

    async fn process(&self, entry: QueueEntry) -> Result<Processed> {
        let report = match self
            .prechecker
            .precheck(&entry.source_branch, &entry.target_branch)
            .await
        {
            Ok(report) => report,
            Err(e) => return self.abandon_precheck(&entry, &e).await,
        };

        if report.is_clean() {
            let entry = self
                .store
                .atomic_update(entry.id, |e| {
                    e.conflict_report = Some(report);
                    Ok(())
                })
                .await?;
            return self.merge(&entry).await;
        }

        let recommendation = self.advisor.advise(&report, entry.metrics.retry_count);
        let files = report.files.clone();
        let entry = self
            .store
            .atomic_update(entry.id, |e| {
                e.conflict_report = Some(report.with_recommendation(recommendation));
                Ok(e.transition(IntegrationStatus::ConflictDetected, Utc::now())?)
            })
            .await?;

        if recommendation == Recommendation::AutoRebase {
            self.rebase(&entry).await
        } else {
            self.require_manual(&entry, files).await
        }
    }

    async fn merge(&self, entry: &QueueEntry) -> Result<Processed> {
        match self.executor.execute(entry).await {
            Ok(MergeOutcome::Merged {
                entry,
                fast_forward,
            }) => {
                self.alerts.emit(
                    &AlertEvent::new(
                        AlertKind::IntegrationMerged,
                        AlertSeverity::Info,
                        format!("'{}' merged into '{}'", entry.source_branch, entry.target_branch),
                    )
                    .with_request(entry.id)
                    .with_target(entry.target_branch.clone()),
                );
                Ok(Processed::Merged {
                    id: entry.id,
                    fast_forward,
                })
            }
            Ok(MergeOutcome::AlreadyIntegrated { entry }) => {
                Ok(Processed::AlreadyIntegrated { id: entry.id })
            }
            Ok(MergeOutcome::Requeued { entry, conflicts }) => Ok(Processed::Requeued {
                id: entry.id,
                reason: format!("{} file(s) conflict after trunk moved", conflicts.len()),
            }),
            Err(e) => {
                let stored = self.store.get(entry.id).await?;
                if stored.status == IntegrationStatus::Failed {
                    self.alert_failed(&stored, &e.to_string());
                    Ok(Processed::Failed {
                        id: entry.id,
                        error: e.to_string(),
                    })
                } else {
                    Ok(Processed::Requeued {
                        id: entry.id,
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    /// Rebase `source` onto `target` behind a backup ref.
    async fn rebase(&self, entry: &QueueEntry) -> Result<Processed> {
        let id = entry.id;
        self.store
            .atomic_update(id, |e| {
                Ok(e.transition(IntegrationStatus::RebasePending, Utc::now())?)
            })
            .await?;

        let source = entry.source_branch.as_str();
        let original = match self.repo.resolve(source).await {
            Ok(Some(tip)) => tip,
            Ok(None) => {
                return self
                    .finalize_failed(entry, Error::branch_not_found(source).to_string())
                    .await;
            }
            Err(e) => return self.abandon_rebase(entry, &e).await,
        };
        let backup = backup_ref(&format!("{source}/{id}"));
        if let Err(e) = self.repo.create_ref(&backup, &original).await {
            return self.abandon_rebase(entry, &e).await;
        }

        let attempt = self
            .repo
            .rebase(source, &entry.target_branch, self.settings.prefer_source)
            .await;

        match attempt {
            Ok(RebaseOutcome::Rebased { new_tip }) => {
                self.discard_backup(&backup).await;
                let entry = self
                    .store
                    .atomic_update(id, |e| {
                        e.metrics.retry_count = e.metrics.retry_count.saturating_add(1);
                        Ok(e.transition(IntegrationStatus::Queued, Utc::now())?)
                    })
                    .await?;
                tracing::info!(
                    request_id = %id,
                    new_tip = %new_tip.short(),
                    retry_count = entry.metrics.retry_count,
                    "Rebased and re-queued"
                );
                Ok(Processed::Rebased {
                    id,
                    retry_count: entry.metrics.retry_count,
                })
            }
            Ok(RebaseOutcome::Conflicted { files }) => {
                let reason = format!(
                    "rebase onto '{}' conflicted in {}; branch restored",
                    entry.target_branch,
                    files.join(", ")
                );
                self.restore_and_fail(entry, &backup, &original, reason).await
            }
            Err(e) => {
                let reason = format!("rebase onto '{}' failed: {e}; branch restored", entry.target_branch);
                self.restore_and_fail(entry, &backup, &original, reason).await
            }
        }
    }

    async fn restore_and_fail(
        &self,
        entry: &QueueEntry,
        backup: &str,
        original: &crate::repository::CommitId,
        reason: String,
    ) -> Result<Processed> {
        match self.repo.restore_branch(&entry.source_branch, original).await {
            Ok(()) => {
                self.discard_backup(backup).await;
                self.finalize_failed(entry, reason).await
            }
            Err(e) => {
                let reason = format!("{reason}; restore failed ({e}), backup kept at {backup}");
                self.finalize_failed(entry, reason).await
            }
        }
    }

    /// Leave `REBASE_PENDING` before the branch was touched: transient
    /// errors re-queue, anything else fails the request.
    async fn abandon_rebase(&self, entry: &QueueEntry, error: &Error) -> Result<Processed> {
        let reason = format!("rebase could not start: {error}");
        if error.is_transient() {
            self.store
                .atomic_update(entry.id, |e| Ok(e.requeue_after(reason.clone(), Utc::now())?))
                .await?;
            tracing::warn!(request_id = %entry.id, error = %error, "Rebase deferred");
            return Ok(Processed::Requeued {
                id: entry.id,
                reason,
            });
        }
        self.finalize_failed(entry, reason).await
    }

    /// Drop a backup ref that is no longer needed. A leftover ref is harmless.
    async fn discard_backup(&self, backup: &str) {
        if let Err(e) = self.repo.delete_ref(backup).await {
            tracing::warn!(backup, error = %e, "Failed to delete backup ref");
        }
    }

    async fn require_manual(&self, entry: &QueueEntry, files: Vec<String>) -> Result<Processed> {
        let entry = self
            .store
            .atomic_update(entry.id, |e| {
                Ok(e.transition(IntegrationStatus::ManualRequired, Utc::now())?)
            })
            .await?;
        self.alerts.emit(
            &AlertEvent::new(
                AlertKind::ManualRequired,
                AlertSeverity::Warning,
                format!(
                    "'{}' conflicts with '{}' in {} file(s); manual resolution required",
                    entry.source_branch,
                    entry.target_branch,
                    files.len()
                ),
            )
            .with_request(entry.id)
            .with_target(entry.target_branch.clone()),
        );
        Ok(Processed::ManualRequired {
            id: entry.id,
            files,
        })
    }

    async fn abandon_precheck(&self, entry: &QueueEntry, error: &Error) -> Result<Processed> {
        if error.is_transient() {
            let reason = error.to_string();
            self.store
                .atomic_update(entry.id, |e| Ok(e.requeue_after(reason.clone(), Utc::now())?))
                .await?;
            tracing::warn!(request_id = %entry.id, error = %error, "Precheck deferred");
            return Ok(Processed::Requeued {
                id: entry.id,
                reason,
            });
        }
        self.finalize_failed(entry, format!("precheck failed: {error}")).await
    }

    async fn finalize_failed(&self, entry: &QueueEntry, reason: String) -> Result<Processed> {
        let stored = self
            .store
            .atomic_update(entry.id, |e| Ok(e.fail(reason.clone(), Utc::now())?))
            .await?;
        tracing::error!(request_id = %entry.id, error = %reason, "Integration request failed");
        self.alert_failed(&stored, &reason);
        Ok(Processed::Failed {
            id: entry.id,
            error: reason,
        })
    }

    fn alert_failed(&self, entry: &QueueEntry, reason: &str) {
        self.alerts.emit(
            &AlertEvent::new(
                AlertKind::IntegrationFailed,
                AlertSeverity::Error,
                format!(
                    "'{}' could not be integrated into '{}': {reason}",
                    entry.source_branch, entry.target_branch
                ),
            )
            .with_request(entry.id)
            .with_target(entry.target_branch.clone()),
        );
    }
}
