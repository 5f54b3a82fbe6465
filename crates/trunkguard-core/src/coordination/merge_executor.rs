//! Trunk mutation under the per-target merge lock.
//!
//! Nothing visible changes until the final compare-and-swap push: the merge
//! tree and commit are built as loose objects first, so an abort anywhere in
//! the critical section leaves the trunk exactly as it was.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{sync::Arc, time::Instant};

use chrono::Utc;

use super::{
    locks::MergeLock,
    queue::QueueStore,
    queue_entities::{ConflictReport, QueueEntry},
    queue_status::IntegrationStatus,
};
use crate::{
    repository::{CommitId, RepositoryClient},
    Error, Result,
};

/// How an executed request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Trunk moved to include the source.
    Merged {
        entry: QueueEntry,
        fast_forward: bool,
    },
    /// The source was already contained in the trunk; nothing was pushed.
    AlreadyIntegrated { entry: QueueEntry },
    /// The trunk moved since the precheck and now conflicts. Back in line.
    Requeued { entry: QueueEntry, conflicts: Vec<String> },
}

impl MergeOutcome {
    pub const fn entry(&self) -> &QueueEntry {
        match self {
            Self::Merged { entry, .. }
            | Self::AlreadyIntegrated { entry }
            | Self::Requeued { entry, .. } => entry,
        }
    }
}

/// What happened inside the critical section.
enum Integration {
    Pushed {
        before: CommitId,
        after: CommitId,
        fast_forward: bool,
    },
    AlreadyContained {
        tip: CommitId,
    },
    Conflicted {
        files: Vec<String>,
    },
}

#[derive(Clone)]
pub struct MergeExecutor {
    repo: Arc<dyn RepositoryClient>,
    store: QueueStore,
    lock: MergeLock,
    worker_id: String,
}

impl std::fmt::Debug for MergeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeExecutor")
            .field("worker_id", &self.worker_id)
            .finish_non_exhaustive()
    }
}

impl MergeExecutor {
    pub fn new(
        repo: Arc<dyn RepositoryClient>,
        store: QueueStore,
        lock: MergeLock,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            store,
            lock,
            worker_id: worker_id.into(),
        }
    }

    /// Integrate a prechecked (`CONFLICT_CHECK`) entry into its target.
    ///
    /// # Errors
    ///
    /// The entry is always left in a consistent state before an error is
    /// returned: `QUEUED` for transient failures (`LOCK_TIMEOUT`, network),
    /// `FAILED` with the error attached for everything else.
    pub async fn execute(&self, entry: &QueueEntry) -> Result<MergeOutcome> {
        let id = entry.id;
        let target = entry.target_branch.as_str();
        let holder = format!("{}:{id}", self.worker_id);

        if let Err(e) = self.lock.acquire(target, &holder).await {
            self.settle_error(entry, &e).await?;
            return Err(e);
        }

        let outcome = self
            .lock
            .hold_while(target, &holder, self.run_locked(entry))
            .await;

        if let Err(e) = self.lock.release(target, &holder).await {
            tracing::error!(request_id = %id, target, error = %e, "Failed to release merge lock");
        }
        outcome
    }

    async fn run_locked(&self, entry: &QueueEntry) -> Result<MergeOutcome> {
        let id = entry.id;
        if let Err(e) = self
            .store
            .atomic_update(id, |e| Ok(e.transition(IntegrationStatus::Merging, Utc::now())?))
            .await
        {
            self.settle_error(entry, &e).await?;
            return Err(e);
        }

        let started = Instant::now();
        let result = self.integrate(entry).await;
        let merge_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(Integration::Pushed {
                before,
                after,
                fast_forward,
            }) => {
                let entry = self
                    .store
                    .atomic_update(id, |e| {
                        e.metrics.merge_ms = merge_ms;
                        e.trunk_before = Some(before.clone());
                        e.trunk_after = Some(after.clone());
                        Ok(e.transition(IntegrationStatus::Merged, Utc::now())?)
                    })
                    .await?;
                tracing::info!(
                    request_id = %id,
                    target = %entry.target_branch,
                    before = %before.short(),
                    after = %after.short(),
                    fast_forward,
                    merge_ms,
                    "Integrated into trunk"
                );
                Ok(MergeOutcome::Merged {
                    entry,
                    fast_forward,
                })
            }
            Ok(Integration::AlreadyContained { tip }) => {
                let entry = self
                    .store
                    .atomic_update(id, |e| {
                        e.metrics.merge_ms = merge_ms;
                        e.trunk_before = Some(tip.clone());
                        e.trunk_after = Some(tip.clone());
                        Ok(e.transition(IntegrationStatus::Merged, Utc::now())?)
                    })
                    .await?;
                tracing::info!(request_id = %id, "Source already contained in trunk");
                Ok(MergeOutcome::AlreadyIntegrated { entry })
            }
            Ok(Integration::Conflicted { files }) => {
                let reason = format!(
                    "trunk moved since precheck; {} file(s) now conflict",
                    files.len()
                );
                let entry = self
                    .store
                    .atomic_update(id, |e| Ok(e.requeue_after(reason.clone(), Utc::now())?))
                    .await?;
                tracing::warn!(request_id = %id, conflicts = files.len(), "Re-queued after late conflict");
                Ok(MergeOutcome::Requeued {
                    entry,
                    conflicts: files,
                })
            }
            Err(e) => {
                self.settle_error(entry, &e).await?;
                Err(e)
            }
        }
    }

    /// Fetch, merge or fast-forward, push. The push is the only mutation.
    async fn integrate(&self, entry: &QueueEntry) -> Result<Integration> {
        let target = entry.target_branch.as_str();
        let source = entry.source_branch.as_str();

        let trunk = self.repo.fetch(target).await?;
        let source_tip = self
            .repo
            .resolve(source)
            .await?
            .ok_or_else(|| Error::branch_not_found(source))?;

        if self.repo.is_ancestor(source_tip.as_str(), trunk.as_str()).await? {
            return Ok(Integration::AlreadyContained { tip: trunk });
        }

        let (new_tip, fast_forward) =
            if self.repo.is_ancestor(trunk.as_str(), source_tip.as_str()).await? {
                (source_tip, true)
            } else {
                let base = self
                    .repo
                    .merge_base(trunk.as_str(), source_tip.as_str())
                    .await?
                    .ok_or_else(|| {
                        Error::repository("merge-base", format!("{source} and {target} share no history"))
                    })?;
                let simulation = self.repo.simulate_merge(&base, &trunk, &source_tip).await?;
                if !simulation.is_clean() {
                    return Ok(Integration::Conflicted {
                        files: ConflictReport::with_files(simulation.conflicts).files,
                    });
                }
                let message = merge_message(entry);
                let commit = self
                    .repo
                    .create_commit(&simulation.tree, &[trunk.clone(), source_tip], &message)
                    .await?;
                (commit, false)
            };

        self.repo.push(target, &new_tip, &trunk).await?;
        Ok(Integration::Pushed {
            before: trunk,
            after: new_tip,
            fast_forward,
        })
    }

    /// Record a failure on the entry: transient ones re-queue, the rest fail.
    async fn settle_error(&self, entry: &QueueEntry, error: &Error) -> Result<()> {
        let message = error.to_string();
        let transient = error.is_transient();
        let settled = self
            .store
            .atomic_update(entry.id, |e| {
                let now = Utc::now();
                if transient && e.status.can_transition_to(IntegrationStatus::Queued) {
                    e.requeue_after(message.clone(), now)?;
                } else if e.status.can_transition_to(IntegrationStatus::Failed) {
                    e.fail(message.clone(), now)?;
                }
                Ok(())
            })
            .await?;

        if settled.status == IntegrationStatus::Failed {
            tracing::error!(request_id = %entry.id, error = %error, "Integration failed");
        } else {
            tracing::warn!(request_id = %entry.id, error = %error, "Integration re-queued after transient failure");
        }
        Ok(())
    }
}

fn merge_message(entry: &QueueEntry) -> String {
    format!(
        "Merge '{}' into '{}'\n\nIntegration-Request: {}\nRequested-By: {}\n",
        entry.source_branch, entry.target_branch, entry.id, entry.requester_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_message_references_request() {
        let entry = QueueEntry::new("feature/a", "main", "term-7", 5, Utc::now());
        let message = merge_message(&entry);
        assert!(message.starts_with("Merge 'feature/a' into 'main'"));
        assert!(message.contains(&entry.id.to_string()));
        assert!(message.contains("Requested-By: term-7"));
    }
}
