//! `git` command-line implementation of [`RepositoryClient`].
//!
//! Merges are computed with `git merge-tree --write-tree` and committed with
//! `git commit-tree`, so nothing touches a working tree until a ref moves.
//! Rebases run in a throwaway detached worktree.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::{
    path::{Path, PathBuf},
    process::Output,
};

use async_trait::async_trait;
use itertools::Itertools;
use tokio::process::Command;

use super::{CommitId, MergeSimulation, RebaseOutcome, RepositoryClient, TreeId};
use crate::{Error, Result};

/// Identity used for commits the service itself creates.
const SERVICE_NAME: &str = "trunkguard";
const SERVICE_EMAIL: &str = "trunkguard@localhost";

/// Substrings of git stderr that indicate the remote could not be reached.
const NETWORK_MARKERS: &[&str] = &[
    "Could not resolve host",
    "Connection refused",
    "Connection timed out",
    "Connection reset",
    "unable to access",
    "Could not read from remote repository",
    "early EOF",
];

/// Substrings of git stderr that indicate the remote refused a ref update.
const REJECTION_MARKERS: &[&str] = &["stale info", "rejected", "non-fast-forward", "but expected"];

/// Repository client backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_path: PathBuf,
    remote: Option<String>,
}

impl GitCli {
    pub fn new(repo_path: impl Into<PathBuf>, remote: Option<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
            remote,
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    async fn output_in(&self, dir: &Path, operation: &str, args: &[&str]) -> Result<Output> {
        tracing::trace!(operation, ?args, "git");
        Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .map_err(|e| Error::command_error(format!("Failed to execute git {operation}: {e}")))
    }

    async fn output(&self, operation: &str, args: &[&str]) -> Result<Output> {
        self.output_in(&self.repo_path, operation, args).await
    }

    /// Run git and require success, returning trimmed stdout.
    async fn run(&self, operation: &str, args: &[&str]) -> Result<String> {
        let output = self.output(operation, args).await?;
        if output.status.success() {
            Ok(stdout_of(&output))
        } else {
            Err(classify_failure(operation, &output))
        }
    }

    /// Run git where exit code 1 means "no" rather than failure.
    async fn run_predicate(&self, operation: &str, args: &[&str]) -> Result<bool> {
        let output = self.output(operation, args).await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(classify_failure(operation, &output)),
        }
    }

    fn tracking_ref(&self, branch: &str) -> Option<String> {
        self.remote
            .as_ref()
            .map(|remote| format!("refs/remotes/{remote}/{branch}"))
    }

    async fn rebase_in_worktree(
        &self,
        worktree: &Path,
        branch: &str,
        old_tip: &CommitId,
        onto: &str,
        prefer_source: bool,
    ) -> Result<RebaseOutcome> {
        let onto_commit = self
            .resolve(onto)
            .await?
            .ok_or_else(|| Error::branch_not_found(onto))?;

        let mut args = vec!["rebase"];
        if prefer_source {
            // During a rebase "theirs" is the commit being replayed.
            args.extend(["-X", "theirs"]);
        }
        args.push(onto_commit.as_str());

        let output = Command::new("git")
            .arg("-C")
            .arg(worktree)
            .args(&args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_EDITOR", "true")
            .env("GIT_COMMITTER_NAME", SERVICE_NAME)
            .env("GIT_COMMITTER_EMAIL", SERVICE_EMAIL)
            .output()
            .await
            .map_err(|e| Error::command_error(format!("Failed to execute git rebase: {e}")))?;

        if output.status.success() {
            let head = self.output_in(worktree, "rev-parse", &["rev-parse", "HEAD"]).await?;
            if !head.status.success() {
                return Err(classify_failure("rev-parse", &head));
            }
            let new_tip = CommitId::new(stdout_of(&head));
            let branch_ref = format!("refs/heads/{branch}");
            self.run(
                "update-ref",
                &["update-ref", &branch_ref, new_tip.as_str(), old_tip.as_str()],
            )
            .await?;
            return Ok(RebaseOutcome::Rebased { new_tip });
        }

        let unmerged = self
            .output_in(worktree, "diff", &["diff", "--name-only", "--diff-filter=U"])
            .await?;
        let files = lines_of(&stdout_of(&unmerged));

        let abort = self
            .output_in(worktree, "rebase --abort", &["rebase", "--abort"])
            .await?;
        if !abort.status.success() {
            tracing::warn!(branch, "git rebase --abort failed in scratch worktree");
        }

        if files.is_empty() {
            Err(classify_failure("rebase", &output))
        } else {
            Ok(RebaseOutcome::Conflicted { files })
        }
    }
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn lines_of(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .sorted()
        .dedup()
        .collect()
}

fn classify_failure(operation: &str, output: &Output) -> Error {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if NETWORK_MARKERS.iter().any(|m| stderr.contains(m)) {
        Error::network(format!("git {operation}: {stderr}"))
    } else {
        Error::repository(operation, stderr)
    }
}

#[async_trait]
impl RepositoryClient for GitCli {
    async fn branch_exists(&self, branch: &str) -> Result<bool> {
        let full = format!("refs/heads/{branch}");
        self.run_predicate("show-ref", &["show-ref", "--verify", "--quiet", &full])
            .await
    }

    async fn resolve(&self, rev: &str) -> Result<Option<CommitId>> {
        let rev_expr = format!("{rev}^{{commit}}");
        let output = self
            .output("rev-parse", &["rev-parse", "--verify", "--quiet", &rev_expr])
            .await?;
        if output.status.success() {
            Ok(Some(CommitId::new(stdout_of(&output))))
        } else {
            Ok(None)
        }
    }

    async fn merge_base(&self, a: &str, b: &str) -> Result<Option<CommitId>> {
        let output = self.output("merge-base", &["merge-base", a, b]).await?;
        match output.status.code() {
            Some(0) => Ok(Some(CommitId::new(stdout_of(&output)))),
            Some(1) => Ok(None),
            _ => Err(classify_failure("merge-base", &output)),
        }
    }

    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        self.run_predicate(
            "merge-base --is-ancestor",
            &["merge-base", "--is-ancestor", ancestor, descendant],
        )
        .await
    }

    async fn commits_ahead(&self, base: &str, tip: &str) -> Result<usize> {
        let range = format!("{base}..{tip}");
        let count = self.run("rev-list", &["rev-list", "--count", &range]).await?;
        count
            .parse()
            .map_err(|e| Error::parse_error(format!("Unexpected rev-list output '{count}': {e}")))
    }

    async fn simulate_merge(
        &self,
        base: &CommitId,
        ours: &CommitId,
        theirs: &CommitId,
    ) -> Result<MergeSimulation> {
        let merge_base = format!("--merge-base={base}");
        let output = self
            .output(
                "merge-tree",
                &[
                    "merge-tree",
                    "--write-tree",
                    "--name-only",
                    "--no-messages",
                    &merge_base,
                    ours.as_str(),
                    theirs.as_str(),
                ],
            )
            .await?;

        let clean = match output.status.code() {
            Some(0) => true,
            Some(1) => false,
            _ => return Err(classify_failure("merge-tree", &output)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let mut lines = stdout.lines();
        let tree = lines
            .next()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(TreeId::new)
            .ok_or_else(|| Error::repository("merge-tree", "no tree id in output"))?;

        let conflicts = if clean {
            Vec::new()
        } else {
            // Conflicted paths follow the tree id up to the first blank line.
            lines_of(&lines.take_while(|line| !line.trim().is_empty()).join("\n"))
        };

        Ok(MergeSimulation { tree, conflicts })
    }

    async fn fetch(&self, branch: &str) -> Result<CommitId> {
        let tip_ref = match (&self.remote, self.tracking_ref(branch)) {
            (Some(remote), Some(tracking)) => {
                let refspec = format!("+refs/heads/{branch}:{tracking}");
                self.run("fetch", &["fetch", "--quiet", remote, &refspec])
                    .await?;
                tracking
            }
            _ => format!("refs/heads/{branch}"),
        };
        self.resolve(&tip_ref)
            .await?
            .ok_or_else(|| Error::branch_not_found(branch))
    }

    async fn tree_of(&self, commit: &CommitId) -> Result<TreeId> {
        let rev_expr = format!("{commit}^{{tree}}");
        self.run("rev-parse", &["rev-parse", &rev_expr])
            .await
            .map(TreeId::new)
    }

    async fn create_commit(
        &self,
        tree: &TreeId,
        parents: &[CommitId],
        message: &str,
    ) -> Result<CommitId> {
        let mut args = vec!["commit-tree", tree.as_str()];
        for parent in parents {
            args.extend(["-p", parent.as_str()]);
        }
        args.extend(["-m", message]);

        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .args(&args)
            .env("GIT_AUTHOR_NAME", SERVICE_NAME)
            .env("GIT_AUTHOR_EMAIL", SERVICE_EMAIL)
            .env("GIT_COMMITTER_NAME", SERVICE_NAME)
            .env("GIT_COMMITTER_EMAIL", SERVICE_EMAIL)
            .output()
            .await
            .map_err(|e| Error::command_error(format!("Failed to execute git commit-tree: {e}")))?;

        if output.status.success() {
            Ok(CommitId::new(stdout_of(&output)))
        } else {
            Err(classify_failure("commit-tree", &output))
        }
    }

    async fn push(&self, branch: &str, new: &CommitId, expected_old: &CommitId) -> Result<()> {
        let branch_ref = format!("refs/heads/{branch}");

        let (operation, output) = match (&self.remote, self.tracking_ref(branch)) {
            (Some(remote), Some(tracking)) => {
                let lease = format!("--force-with-lease={branch_ref}:{expected_old}");
                let refspec = format!("{new}:{branch_ref}");
                let output = self
                    .output("push", &["push", "--porcelain", &lease, remote, &refspec])
                    .await?;
                if output.status.success() {
                    self.run("update-ref", &["update-ref", &tracking, new.as_str()])
                        .await?;
                }
                ("push", output)
            }
            _ => {
                let output = self
                    .output(
                        "update-ref",
                        &[
                            "update-ref",
                            "-m",
                            "trunkguard: integrate",
                            &branch_ref,
                            new.as_str(),
                            expected_old.as_str(),
                        ],
                    )
                    .await?;
                ("update-ref", output)
            }
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if REJECTION_MARKERS
            .iter()
            .any(|m| stderr.contains(m) || stdout.contains(m))
        {
            Err(Error::push_rejected(branch, stderr.trim()))
        } else {
            Err(classify_failure(operation, &output))
        }
    }

    async fn create_ref(&self, name: &str, target: &CommitId) -> Result<()> {
        self.run("update-ref", &["update-ref", name, target.as_str()])
            .await
            .map(|_| ())
    }

    async fn delete_ref(&self, name: &str) -> Result<()> {
        let exists = self
            .run_predicate("show-ref", &["show-ref", "--verify", "--quiet", name])
            .await?;
        if exists {
            self.run("update-ref", &["update-ref", "-d", name]).await?;
        }
        Ok(())
    }

    async fn rebase(&self, branch: &str, onto: &str, prefer_source: bool) -> Result<RebaseOutcome> {
        let old_tip = self
            .resolve(&format!("refs/heads/{branch}"))
            .await?
            .ok_or_else(|| Error::branch_not_found(branch))?;

        let worktree =
            std::env::temp_dir().join(format!("trunkguard-rebase-{}", uuid::Uuid::now_v7()));
        let worktree_arg = worktree.display().to_string();
        self.run(
            "worktree add",
            &["worktree", "add", "--detach", &worktree_arg, old_tip.as_str()],
        )
        .await?;

        let outcome = self
            .rebase_in_worktree(&worktree, branch, &old_tip, onto, prefer_source)
            .await;

        let cleanup = self
            .output(
                "worktree remove",
                &["worktree", "remove", "--force", &worktree_arg],
            )
            .await;
        if !matches!(cleanup, Ok(ref out) if out.status.success()) {
            tracing::warn!(path = %worktree.display(), "Failed to remove scratch worktree");
        }

        outcome
    }

    async fn restore_branch(&self, branch: &str, target: &CommitId) -> Result<()> {
        let branch_ref = format!("refs/heads/{branch}");
        self.run(
            "update-ref",
            &["update-ref", "-m", "trunkguard: restore", &branch_ref, target.as_str()],
        )
        .await
        .map(|_| ())
    }

    async fn changed_files(&self, from: &CommitId, to: &CommitId) -> Result<Vec<String>> {
        self.run("diff", &["diff", "--name-only", from.as_str(), to.as_str()])
            .await
            .map(|out| lines_of(&out))
    }

    async fn available_space(&self) -> Result<u64> {
        fs2::available_space(&self.repo_path).map_err(|e| {
            Error::io_error(format!(
                "Failed to query free space for {}: {e}",
                self.repo_path.display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_of_sorts_and_dedups() {
        assert_eq!(
            lines_of("b.rs\n a.rs \n\nb.rs\n"),
            vec!["a.rs".to_string(), "b.rs".to_string()]
        );
    }

    #[test]
    fn test_tracking_ref_only_with_remote() {
        let local = GitCli::new("/repo", None);
        assert_eq!(local.tracking_ref("main"), None);

        let remote = GitCli::new("/repo", Some("origin".to_string()));
        assert_eq!(
            remote.tracking_ref("main"),
            Some("refs/remotes/origin/main".to_string())
        );
    }
}
