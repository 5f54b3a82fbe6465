//! Repository client boundary.
//!
//! Everything the coordinator needs from version control is one of the
//! operations on [`RepositoryClient`]. The core never shells out itself; the
//! [`GitCli`] implementation does, and tests substitute an in-memory model.

mod git;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use git::GitCli;

use crate::Result;

/// Namespace for refs the service creates for itself.
pub const BACKUP_REF_PREFIX: &str = "refs/trunkguard/backup";

/// A commit identifier as understood by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines and messages.
    pub fn short(&self) -> &str {
        self.0.get(..10).unwrap_or(&self.0)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tree (snapshot) identifier as understood by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreeId(String);

impl TreeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a side-effect-free three-way merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSimulation {
    /// Tree the merge would produce. Contains conflict markers when `conflicts` is non-empty.
    pub tree: TreeId,
    /// Paths that would conflict, sorted and de-duplicated.
    pub conflicts: Vec<String>,
}

impl MergeSimulation {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Outcome of an attempted rebase of a branch onto another revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseOutcome {
    /// Branch now points at `new_tip`.
    Rebased { new_tip: CommitId },
    /// Rebase stopped on conflicts; the branch was left untouched.
    Conflicted { files: Vec<String> },
}

/// Backup ref name for a branch snapshot taken on behalf of `tag`.
pub fn backup_ref(tag: &str) -> String {
    format!("{BACKUP_REF_PREFIX}/{tag}")
}

/// Primitive version-control operations consumed by the coordinator.
///
/// Revisions are passed as strings (branch names or commit ids). Only
/// `fetch`, `push`, `create_ref`, `delete_ref`, `rebase` and `restore_branch`
/// may move refs; every other operation is read-only.
#[async_trait]
pub trait RepositoryClient: Send + Sync {
    /// Whether a local branch with this name exists.
    async fn branch_exists(&self, branch: &str) -> Result<bool>;

    /// Resolve a revision to a commit, `None` when it does not exist.
    async fn resolve(&self, rev: &str) -> Result<Option<CommitId>>;

    /// Best common ancestor of two revisions, `None` for unrelated histories.
    async fn merge_base(&self, a: &str, b: &str) -> Result<Option<CommitId>>;

    /// Whether `ancestor` is reachable from `descendant` (fast-forward check).
    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;

    /// Number of commits reachable from `tip` but not from `base`.
    async fn commits_ahead(&self, base: &str, tip: &str) -> Result<usize>;

    /// Three-way merge of `ours` and `theirs` over `base` without touching any ref or working tree.
    async fn simulate_merge(
        &self,
        base: &CommitId,
        ours: &CommitId,
        theirs: &CommitId,
    ) -> Result<MergeSimulation>;

    /// Refresh `branch` from the remote (if any) and return its latest tip.
    async fn fetch(&self, branch: &str) -> Result<CommitId>;

    /// Root tree of a commit.
    async fn tree_of(&self, commit: &CommitId) -> Result<TreeId>;

    /// Create a commit object without moving any ref.
    async fn create_commit(
        &self,
        tree: &TreeId,
        parents: &[CommitId],
        message: &str,
    ) -> Result<CommitId>;

    /// Compare-and-swap `branch` from `expected_old` to `new`, publishing it to the remote when configured.
    async fn push(&self, branch: &str, new: &CommitId, expected_old: &CommitId) -> Result<()>;

    /// Create or overwrite a ref.
    async fn create_ref(&self, name: &str, target: &CommitId) -> Result<()>;

    /// Delete a ref if it exists.
    async fn delete_ref(&self, name: &str) -> Result<()>;

    /// Rebase `branch` onto `onto`. When `prefer_source` is set, conflicting hunks take the branch's side.
    async fn rebase(&self, branch: &str, onto: &str, prefer_source: bool) -> Result<RebaseOutcome>;

    /// Force `branch` back to `target`.
    async fn restore_branch(&self, branch: &str, target: &CommitId) -> Result<()>;

    /// Paths that differ between two commits.
    async fn changed_files(&self, from: &CommitId, to: &CommitId) -> Result<Vec<String>>;

    /// Free bytes on the filesystem holding the repository.
    async fn available_space(&self) -> Result<u64>;
}
