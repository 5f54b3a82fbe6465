//! Gathers the facts a rollback decision is made on.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::sync::Arc;

use chrono::Utc;
use regex::Regex;

use super::{decision::RollbackContext, ledger::RollbackLedger};
use crate::{
    coordination::{MergeLock, QueueStore},
    repository::RepositoryClient,
    Error, Result,
};

/// Reads the queue, locks, ledger and repository into a [`RollbackContext`].
///
/// Every call is read-only.
#[derive(Clone)]
pub struct ContextGatherer {
    store: QueueStore,
    repo: Arc<dyn RepositoryClient>,
    merge_lock: MergeLock,
    ledger: RollbackLedger,
    migration_patterns: Vec<Regex>,
}

impl std::fmt::Debug for ContextGatherer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextGatherer")
            .field("migration_patterns", &self.migration_patterns)
            .finish_non_exhaustive()
    }
}

/// Compile `[rollback].migration_patterns`.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p)
                .map_err(|e| Error::invalid_config(format!("invalid migration pattern '{p}': {e}")))
        })
        .collect()
}

impl ContextGatherer {
    pub const fn new(
        store: QueueStore,
        repo: Arc<dyn RepositoryClient>,
        merge_lock: MergeLock,
        ledger: RollbackLedger,
        migration_patterns: Vec<Regex>,
    ) -> Self {
        Self {
            store,
            repo,
            merge_lock,
            ledger,
            migration_patterns,
        }
    }

    /// Build the context for a signal of `magnitude` on `trunk`.
    ///
    /// `requested_target` overrides the default revert point, which is the
    /// trunk tip before the most recent integration.
    pub async fn gather(
        &self,
        trunk: &str,
        magnitude: f64,
        requested_target: Option<&str>,
    ) -> Result<RollbackContext> {
        let evaluated_at = Utc::now();
        let last = self.store.last_merged(trunk).await?;

        let target_rev = requested_target
            .map(str::to_string)
            .or_else(|| last.as_ref().and_then(|e| e.trunk_before.as_ref()).map(ToString::to_string));
        let target = match &target_rev {
            Some(rev) => self.repo.resolve(rev).await?,
            None => None,
        };
        let tip = self.repo.resolve(trunk).await?;

        let (commits_to_revert, trunk_matches_target, migration_files) = match (&target, &tip) {
            (Some(target), Some(tip)) => {
                let commits = self.repo.commits_ahead(target.as_str(), tip.as_str()).await?;
                let changed = self.repo.changed_files(target, tip).await?;
                (commits, changed.is_empty(), self.migrations_in(changed))
            }
            _ => (0, false, Vec::new()),
        };

        let operation_in_flight = self.merge_lock.is_held(trunk).await?
            || self.store.merging_count(trunk).await? > 0
            || self.ledger.in_progress(trunk).await?;

        let available_bytes = match self.repo.available_space().await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(error = %e, "Could not determine free space");
                None
            }
        };

        Ok(RollbackContext {
            trunk: trunk.to_string(),
            magnitude,
            evaluated_at,
            last_integration_at: last.and_then(|e| e.completed_at),
            target_exists: target.is_some(),
            // A requested target that does not resolve is still reported by name.
            target_version: target.or_else(|| target_rev.map(crate::repository::CommitId::new)),
            commits_to_revert,
            trunk_matches_target,
            operation_in_flight,
            available_bytes,
            migration_files,
        })
    }

    fn migrations_in(&self, changed: Vec<String>) -> Vec<String> {
        changed
            .into_iter()
            .filter(|path| self.migration_patterns.iter().any(|re| re.is_match(path)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_patterns_compile_and_match() -> Result<()> {
        let patterns = compile_patterns(&crate::config::RollbackConfig::default().migration_patterns)?;
        let hit = |p: &str| patterns.iter().any(|re| re.is_match(p));
        assert!(hit("db/migrations/0001_init.sql"));
        assert!(hit("migration/up.rs"));
        assert!(hit("schema.sql"));
        assert!(!hit("src/lib.rs"));
        Ok(())
    }

    #[test]
    fn test_bad_pattern_is_config_error() {
        let err = compile_patterns(&["(".to_string()]);
        assert!(matches!(err, Err(Error::Validation(_))));
    }
}
