//! Common test utilities and relaxed clippy settings for trunkguard-core integration tests
//!
//! [`FakeRepository`] models commits as whole-file snapshots and merges them
//! per file, which is enough to exercise every routing path without git.

#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo,
    clippy::unreachable,
    clippy::indexing_slicing,
    // Test code ergonomics
    clippy::too_many_lines,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::uninlined_format_args,
    clippy::significant_drop_tightening,
)]

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use trunkguard_core::{
    alerts::{AlertEvent, AlertKind, AlertSink},
    repository::{CommitId, MergeSimulation, RebaseOutcome, RepositoryClient, TreeId},
    rollback::HealthVerifier,
    Error, Result,
};

pub type Files = BTreeMap<String, String>;

#[derive(Debug, Clone)]
struct Commit {
    parents: Vec<String>,
    files: Files,
    generation: usize,
}

#[derive(Debug, Default)]
struct State {
    commits: HashMap<String, Commit>,
    refs: HashMap<String, String>,
    trees: HashMap<String, Files>,
    next_id: usize,
    push_failures: VecDeque<Error>,
    create_ref_failures: VecDeque<Error>,
    delete_ref_failures: VecDeque<Error>,
    push_delay_ms: u64,
}

impl State {
    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:06}", self.next_id)
    }

    fn resolve(&self, rev: &str) -> Option<String> {
        self.refs
            .get(rev)
            .cloned()
            .or_else(|| self.commits.contains_key(rev).then(|| rev.to_string()))
    }

    fn must_resolve(&self, rev: &str) -> Result<String> {
        self.resolve(rev)
            .ok_or_else(|| Error::repository("resolve", format!("unknown revision '{rev}'")))
    }

    fn ancestors(&self, id: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![id.to_string()];
        while let Some(next) = stack.pop() {
            if seen.insert(next.clone()) {
                if let Some(commit) = self.commits.get(&next) {
                    stack.extend(commit.parents.iter().cloned());
                }
            }
        }
        seen
    }

    fn merge_base(&self, a: &str, b: &str) -> Option<String> {
        let left = self.ancestors(a);
        let right = self.ancestors(b);
        left.intersection(&right)
            .max_by_key(|id| self.commits.get(*id).map_or(0, |c| c.generation))
            .cloned()
    }

    fn add_commit(&mut self, parents: Vec<String>, files: Files) -> String {
        let generation = parents
            .iter()
            .filter_map(|p| self.commits.get(p))
            .map(|c| c.generation + 1)
            .max()
            .unwrap_or(0);
        let id = self.fresh_id("c");
        self.commits.insert(
            id.clone(),
            Commit {
                parents,
                files,
                generation,
            },
        );
        id
    }

    fn files(&self, id: &str) -> Files {
        self.commits.get(id).map(|c| c.files.clone()).unwrap_or_default()
    }
}

/// Per-file three-way merge. Conflicting paths keep `ours` unless `prefer_theirs`.
pub fn three_way(base: &Files, ours: &Files, theirs: &Files, prefer_theirs: bool) -> (Files, Vec<String>) {
    let paths: BTreeSet<&String> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();
    let mut merged = Files::new();
    let mut conflicts = Vec::new();
    for path in paths {
        let b = base.get(path);
        let o = ours.get(path);
        let t = theirs.get(path);
        let chosen = if o == t || t == b {
            o
        } else if o == b {
            t
        } else {
            conflicts.push(path.clone());
            if prefer_theirs {
                t
            } else {
                o
            }
        };
        if let Some(content) = chosen {
            merged.insert(path.clone(), content.clone());
        }
    }
    (merged, conflicts)
}

/// In-memory repository with a single `main` branch holding `README`.
#[derive(Clone, Default)]
pub struct FakeRepository {
    state: Arc<Mutex<State>>,
    ref_mutations: Arc<AtomicUsize>,
}

impl FakeRepository {
    pub fn new() -> Self {
        let repo = Self::default();
        {
            let mut state = repo.state.lock().unwrap();
            let root = state.add_commit(Vec::new(), files(&[("README", "hello\n")]));
            state.refs.insert("main".to_string(), root);
        }
        repo
    }

    /// Create `name` at the tip of `from`.
    pub fn branch(&self, name: &str, from: &str) -> CommitId {
        let mut state = self.state.lock().unwrap();
        let tip = state.must_resolve(from).unwrap();
        state.refs.insert(name.to_string(), tip.clone());
        CommitId::new(tip)
    }

    /// Commit `changes` on top of `branch`; a `None` content deletes the path.
    pub fn commit(&self, branch: &str, changes: &[(&str, Option<&str>)]) -> CommitId {
        let mut state = self.state.lock().unwrap();
        let parent = state.must_resolve(branch).unwrap();
        let mut tree = state.files(&parent);
        for (path, content) in changes {
            match content {
                Some(c) => {
                    tree.insert((*path).to_string(), (*c).to_string());
                }
                None => {
                    tree.remove(*path);
                }
            }
        }
        let id = state.add_commit(vec![parent], tree);
        state.refs.insert(branch.to_string(), id.clone());
        CommitId::new(id)
    }

    /// Shorthand for a branch off `main` with one commit writing `path`.
    pub fn feature(&self, name: &str, path: &str, content: &str) -> CommitId {
        self.branch(name, "main");
        self.commit(name, &[(path, Some(content))])
    }

    pub fn tip(&self, rev: &str) -> Option<CommitId> {
        self.state.lock().unwrap().resolve(rev).map(CommitId::new)
    }

    pub fn files_at(&self, rev: &str) -> Files {
        let state = self.state.lock().unwrap();
        state.resolve(rev).map(|id| state.files(&id)).unwrap_or_default()
    }

    pub fn parents_of(&self, rev: &str) -> Vec<CommitId> {
        let state = self.state.lock().unwrap();
        state
            .resolve(rev)
            .and_then(|id| state.commits.get(&id).map(|c| c.parents.clone()))
            .unwrap_or_default()
            .into_iter()
            .map(CommitId::new)
            .collect()
    }

    pub fn has_ref(&self, name: &str) -> bool {
        self.state.lock().unwrap().refs.contains_key(name)
    }

    pub fn ref_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().unwrap().refs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Count of ref-moving calls made through [`RepositoryClient`].
    pub fn ref_mutations(&self) -> usize {
        self.ref_mutations.load(Ordering::SeqCst)
    }

    /// Make the next `push` fail with `error` instead of updating the branch.
    pub fn fail_next_push(&self, error: Error) {
        self.state.lock().unwrap().push_failures.push_back(error);
    }

    /// Make the next `create_ref` fail with `error`.
    pub fn fail_next_create_ref(&self, error: Error) {
        self.state.lock().unwrap().create_ref_failures.push_back(error);
    }

    /// Make the next `delete_ref` fail with `error`.
    pub fn fail_next_delete_ref(&self, error: Error) {
        self.state.lock().unwrap().delete_ref_failures.push_back(error);
    }

    /// Sleep inside `push`, widening the window for interleaving.
    pub fn set_push_delay_ms(&self, ms: u64) {
        self.state.lock().unwrap().push_delay_ms = ms;
    }

    fn mutated(&self) {
        self.ref_mutations.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn files(entries: &[(&str, &str)]) -> Files {
    entries
        .iter()
        .map(|(p, c)| ((*p).to_string(), (*c).to_string()))
        .collect()
}

#[async_trait]
impl RepositoryClient for FakeRepository {
    async fn branch_exists(&self, branch: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().refs.contains_key(branch))
    }

    async fn resolve(&self, rev: &str) -> Result<Option<CommitId>> {
        Ok(self.state.lock().unwrap().resolve(rev).map(CommitId::new))
    }

    async fn merge_base(&self, a: &str, b: &str) -> Result<Option<CommitId>> {
        let state = self.state.lock().unwrap();
        let a = state.must_resolve(a)?;
        let b = state.must_resolve(b)?;
        Ok(state.merge_base(&a, &b).map(CommitId::new))
    }

    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        let ancestor = state.must_resolve(ancestor)?;
        let descendant = state.must_resolve(descendant)?;
        Ok(state.ancestors(&descendant).contains(&ancestor))
    }

    async fn commits_ahead(&self, base: &str, tip: &str) -> Result<usize> {
        let state = self.state.lock().unwrap();
        let base = state.must_resolve(base)?;
        let tip = state.must_resolve(tip)?;
        let excluded = state.ancestors(&base);
        Ok(state.ancestors(&tip).difference(&excluded).count())
    }

    async fn simulate_merge(
        &self,
        base: &CommitId,
        ours: &CommitId,
        theirs: &CommitId,
    ) -> Result<MergeSimulation> {
        let mut state = self.state.lock().unwrap();
        let (tree, conflicts) = three_way(
            &state.files(base.as_str()),
            &state.files(ours.as_str()),
            &state.files(theirs.as_str()),
            false,
        );
        let id = state.fresh_id("t");
        state.trees.insert(id.clone(), tree);
        Ok(MergeSimulation {
            tree: TreeId::new(id),
            conflicts,
        })
    }

    async fn fetch(&self, branch: &str) -> Result<CommitId> {
        self.state
            .lock()
            .unwrap()
            .refs
            .get(branch)
            .cloned()
            .map(CommitId::new)
            .ok_or_else(|| Error::branch_not_found(branch))
    }

    async fn tree_of(&self, commit: &CommitId) -> Result<TreeId> {
        let mut state = self.state.lock().unwrap();
        let id = state.must_resolve(commit.as_str())?;
        let tree = state.files(&id);
        let tree_id = state.fresh_id("t");
        state.trees.insert(tree_id.clone(), tree);
        Ok(TreeId::new(tree_id))
    }

    async fn create_commit(
        &self,
        tree: &TreeId,
        parents: &[CommitId],
        _message: &str,
    ) -> Result<CommitId> {
        let mut state = self.state.lock().unwrap();
        let files = state
            .trees
            .get(tree.as_str())
            .cloned()
            .ok_or_else(|| Error::repository("commit-tree", format!("unknown tree {tree}")))?;
        let parents = parents.iter().map(|p| p.as_str().to_string()).collect();
        Ok(CommitId::new(state.add_commit(parents, files)))
    }

    async fn push(&self, branch: &str, new: &CommitId, expected_old: &CommitId) -> Result<()> {
        let delay = self.state.lock().unwrap().push_delay_ms;
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.push_failures.pop_front() {
            return Err(error);
        }
        let current = state.refs.get(branch).cloned();
        if current.as_deref() != Some(expected_old.as_str()) {
            return Err(Error::push_rejected(branch, "stale expected tip"));
        }
        state.refs.insert(branch.to_string(), new.as_str().to_string());
        drop(state);
        self.mutated();
        Ok(())
    }

    async fn create_ref(&self, name: &str, target: &CommitId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.create_ref_failures.pop_front() {
            return Err(error);
        }
        state.refs.insert(name.to_string(), target.as_str().to_string());
        drop(state);
        self.mutated();
        Ok(())
    }

    async fn delete_ref(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.delete_ref_failures.pop_front() {
            return Err(error);
        }
        state.refs.remove(name);
        drop(state);
        self.mutated();
        Ok(())
    }

    async fn rebase(&self, branch: &str, onto: &str, prefer_source: bool) -> Result<RebaseOutcome> {
        let mut state = self.state.lock().unwrap();
        let tip = state.must_resolve(branch)?;
        let onto_tip = state.must_resolve(onto)?;
        let base = state.merge_base(&tip, &onto_tip).unwrap_or_default();
        let (tree, conflicts) = three_way(
            &state.files(&base),
            &state.files(&onto_tip),
            &state.files(&tip),
            prefer_source,
        );
        if !conflicts.is_empty() && !prefer_source {
            return Ok(RebaseOutcome::Conflicted { files: conflicts });
        }
        let new_tip = state.add_commit(vec![onto_tip], tree);
        state.refs.insert(branch.to_string(), new_tip.clone());
        drop(state);
        self.mutated();
        Ok(RebaseOutcome::Rebased {
            new_tip: CommitId::new(new_tip),
        })
    }

    async fn restore_branch(&self, branch: &str, target: &CommitId) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .refs
            .insert(branch.to_string(), target.as_str().to_string());
        self.mutated();
        Ok(())
    }

    async fn changed_files(&self, from: &CommitId, to: &CommitId) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        let a = state.files(from.as_str());
        let b = state.files(to.as_str());
        let paths: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
        Ok(paths
            .into_iter()
            .filter(|p| a.get(*p) != b.get(*p))
            .cloned()
            .collect())
    }

    async fn available_space(&self) -> Result<u64> {
        Ok(u64::MAX)
    }
}

/// Alert sink that keeps everything it receives.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<AlertEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AlertEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<AlertKind> {
        self.events().iter().map(|e| e.kind).collect()
    }
}

impl AlertSink for RecordingSink {
    fn emit(&self, event: &AlertEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Health verifier with a fixed answer.
#[derive(Clone)]
pub struct FixedVerifier {
    healthy: Arc<AtomicBool>,
    checks: Arc<AtomicUsize>,
}

impl FixedVerifier {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: Arc::new(AtomicBool::new(healthy)),
            checks: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthVerifier for FixedVerifier {
    async fn is_healthy(&self) -> Result<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.healthy.load(Ordering::SeqCst))
    }
}
