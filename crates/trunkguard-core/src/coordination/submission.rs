//! Request intake: validation, cancel and human re-queue.
//!
//! Validation happens while the request is still `SUBMITTED`, so a malformed
//! request never occupies a place in queue order.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;

use super::{
    queue::QueueStore,
    queue_entities::{QueueEntry, RequestId},
    queue_status::IntegrationStatus,
};
use crate::{repository::RepositoryClient, Error, Result};

/// What a terminal asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub source_branch: String,
    pub target_branch: String,
    pub requester_id: String,
    /// Lower runs first. `None` takes the configured default.
    pub priority: Option<i32>,
}

impl SubmitRequest {
    pub fn new(
        source_branch: impl Into<String>,
        target_branch: impl Into<String>,
        requester_id: impl Into<String>,
    ) -> Self {
        Self {
            source_branch: source_branch.into(),
            target_branch: target_branch.into(),
            requester_id: requester_id.into(),
            priority: None,
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

fn branch_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$").ok())
        .as_ref()
}

/// Reject names git itself would refuse, before asking the repository.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::invalid_request("branch name cannot be empty"));
    }

    let well_formed = branch_name_pattern().is_some_and(|re| re.is_match(name))
        && !name.contains("..")
        && !name.contains("//")
        && !name.ends_with('/')
        && !name.ends_with(".lock")
        && !name.ends_with('.');

    if well_formed {
        Ok(())
    } else {
        Err(Error::invalid_request(format!("invalid branch name '{name}'")))
    }
}

fn validate_requester(requester: &str) -> Result<()> {
    if requester.trim().is_empty() {
        Err(Error::invalid_request("requester id cannot be empty"))
    } else {
        Ok(())
    }
}

/// Validate and enqueue a request. Returns the stored `QUEUED` entry.
///
/// # Errors
///
/// - `InvalidRequest` for malformed fields or `source == target`
/// - `BranchNotFound` when either branch is missing
/// - `NothingToIntegrate` when `source` has no commits beyond `target`
pub async fn submit(
    store: &QueueStore,
    repo: &dyn RepositoryClient,
    request: SubmitRequest,
    default_priority: i32,
) -> Result<QueueEntry> {
    validate_branch_name(&request.source_branch)?;
    validate_branch_name(&request.target_branch)?;
    validate_requester(&request.requester_id)?;

    if request.source_branch == request.target_branch {
        return Err(Error::invalid_request(format!(
            "source and target are both '{}'",
            request.source_branch
        )));
    }

    for branch in [&request.source_branch, &request.target_branch] {
        if !repo.branch_exists(branch).await? {
            return Err(Error::branch_not_found(branch.as_str()));
        }
    }

    let ahead = repo
        .commits_ahead(&request.target_branch, &request.source_branch)
        .await?;
    if ahead == 0 {
        return Err(Error::nothing_to_integrate(
            request.source_branch,
            request.target_branch,
        ));
    }

    let now = Utc::now();
    let mut entry = QueueEntry::new(
        request.source_branch,
        request.target_branch,
        request.requester_id,
        request.priority.unwrap_or(default_priority),
        now,
    );
    entry.transition(IntegrationStatus::Queued, now)?;
    store.enqueue(&entry).await?;

    tracing::info!(
        request_id = %entry.id,
        source = %entry.source_branch,
        target = %entry.target_branch,
        requester = %entry.requester_id,
        ahead,
        "Integration request queued"
    );
    Ok(entry)
}

/// Cancel a `QUEUED` or `MANUAL_REQUIRED` request.
///
/// When `requester` is given it must match the submitting requester.
pub async fn cancel(store: &QueueStore, id: RequestId, requester: Option<&str>) -> Result<QueueEntry> {
    let entry = store
        .atomic_update(id, |entry| {
            if let Some(requester) = requester {
                if requester != entry.requester_id {
                    return Err(Error::not_requester(
                        entry.id.to_string(),
                        entry.requester_id.clone(),
                    ));
                }
            }
            if !entry.status.is_cancelable() {
                return Err(Error::invalid_transition(format!(
                    "request {} is {} and can no longer be canceled",
                    entry.id, entry.status
                )));
            }
            entry.transition(IntegrationStatus::Canceled, Utc::now())?;
            Ok(())
        })
        .await?;

    tracing::info!(request_id = %entry.id, "Integration request canceled");
    Ok(entry)
}

/// Put a `MANUAL_REQUIRED` request back in line after a human resolved it.
pub async fn requeue(store: &QueueStore, id: RequestId) -> Result<QueueEntry> {
    store
        .atomic_update(id, |entry| {
            if entry.status != IntegrationStatus::ManualRequired {
                return Err(Error::invalid_transition(format!(
                    "request {} is {}; only MANUAL_REQUIRED requests can be re-queued",
                    entry.id, entry.status
                )));
            }
            entry.transition(IntegrationStatus::Queued, Utc::now())?;
            Ok(())
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_names() {
        for ok in ["main", "feature/login", "release-1.2", "user.name/fix_3"] {
            assert!(validate_branch_name(ok).is_ok(), "{ok} should be accepted");
        }
        for bad in ["", " ", "-x", "/x", "a..b", "a//b", "x/", "x.lock", "has space", "x."] {
            assert!(validate_branch_name(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_request_builder() {
        let request = SubmitRequest::new("feature", "main", "term-1").with_priority(1);
        assert_eq!(request.priority, Some(1));
        assert_eq!(request.requester_id, "term-1");
    }

    #[tokio::test]
    async fn test_requeue_rejects_queued_entry() -> Result<()> {
        let store = QueueStore::open_in_memory().await?;
        let now = Utc::now();
        let mut entry = QueueEntry::new("feature", "main", "term-1", 5, now);
        entry.transition(IntegrationStatus::Queued, now)?;
        store.enqueue(&entry).await?;

        let err = requeue(&store, entry.id).await;
        assert!(matches!(err, Err(Error::Execution(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_checks_requester() -> Result<()> {
        let store = QueueStore::open_in_memory().await?;
        let now = Utc::now();
        let mut entry = QueueEntry::new("feature", "main", "term-1", 5, now);
        entry.transition(IntegrationStatus::Queued, now)?;
        store.enqueue(&entry).await?;

        assert!(cancel(&store, entry.id, Some("term-2")).await.is_err());
        assert_eq!(store.get(entry.id).await?.status, IntegrationStatus::Queued);

        let canceled = cancel(&store, entry.id, Some("term-1")).await?;
        assert_eq!(canceled.status, IntegrationStatus::Canceled);
        assert!(canceled.completed_at.is_some());

        assert!(cancel(&store, entry.id, None).await.is_err(), "terminal stays terminal");
        Ok(())
    }
}
