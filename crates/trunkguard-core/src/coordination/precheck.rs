//! Side-effect-free conflict prediction.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::sync::Arc;

use super::queue_entities::ConflictReport;
use crate::{
    repository::{CommitId, RepositoryClient},
    Error, Result,
};

/// Simulates `source` into `target` at tree level and reports conflicting files.
///
/// Only read-only repository operations are used, so calling it twice with
/// the same branch tips yields the same report and moves no ref.
#[derive(Clone)]
pub struct ConflictPrechecker {
    repo: Arc<dyn RepositoryClient>,
}

impl std::fmt::Debug for ConflictPrechecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictPrechecker").finish_non_exhaustive()
    }
}

impl ConflictPrechecker {
    pub fn new(repo: Arc<dyn RepositoryClient>) -> Self {
        Self { repo }
    }

    pub async fn precheck(&self, source: &str, target: &str) -> Result<ConflictReport> {
        let source_tip = self.tip(source).await?;
        let target_tip = self.tip(target).await?;
        self.precheck_commits(&source_tip, &target_tip).await
    }

    /// Same as [`precheck`](Self::precheck) for already-resolved tips.
    pub async fn precheck_commits(
        &self,
        source_tip: &CommitId,
        target_tip: &CommitId,
    ) -> Result<ConflictReport> {
        let base = self
            .repo
            .merge_base(source_tip.as_str(), target_tip.as_str())
            .await?
            .ok_or_else(|| {
                Error::repository(
                    "merge-base",
                    format!("{source_tip} and {target_tip} share no history"),
                )
            })?;

        let simulation = self.repo.simulate_merge(&base, target_tip, source_tip).await?;

        tracing::debug!(
            source = %source_tip.short(),
            target = %target_tip.short(),
            base = %base.short(),
            conflicts = simulation.conflicts.len(),
            "Merge simulated"
        );
        Ok(ConflictReport::with_files(simulation.conflicts))
    }

    async fn tip(&self, branch: &str) -> Result<CommitId> {
        self.repo
            .resolve(branch)
            .await?
            .ok_or_else(|| Error::branch_not_found(branch))
    }
}
