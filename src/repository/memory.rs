//! In-memory repository handle.
//!
//! Models remote repositories (commits with parents and files, named refs),
//! the local discovery store and work trees without touching the network or
//! the disk. Every call is recorded so callers can assert exactly which
//! operations a phase performed, and failures can be injected per
//! repository and operation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{CommitId, RepositoryHandle};
use crate::error::{Error, Result};
use crate::identity::RepositoryIdentity;

/// Operations of the `RepositoryHandle` interface, as recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Fetch,
    ResolveRef,
    ReadFile,
    IsAncestor,
    CurrentRef,
    Clone,
    FetchInto,
    Checkout,
}

impl Operation {
    /// Operations that change local state.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Operation::Fetch | Operation::Clone | Operation::FetchInto | Operation::Checkout
        )
    }
}

/// One recorded handle call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleCall {
    pub operation: Operation,
    /// Canonical key of the repository.
    pub identity: String,
    pub detail: String,
}

#[derive(Debug, Default)]
struct Commit {
    parents: Vec<CommitId>,
    files: HashMap<PathBuf, Vec<u8>>,
}

#[derive(Debug, Default)]
struct Remote {
    commits: HashMap<CommitId, Commit>,
    refs: HashMap<String, CommitId>,
}

impl Remote {
    fn resolve(&self, r#ref: &str) -> Option<CommitId> {
        if let Some(commit) = self.refs.get(r#ref) {
            return Some(commit.clone());
        }
        let commit = CommitId::new(r#ref);
        self.commits.contains_key(&commit).then_some(commit)
    }
}

#[derive(Debug)]
struct WorkTree {
    head: Option<CommitId>,
    known: HashSet<CommitId>,
}

#[derive(Debug, Default)]
struct State {
    remotes: HashMap<String, Remote>,
    present: HashSet<String>,
    work_trees: HashMap<PathBuf, WorkTree>,
    failures: HashMap<(String, Operation), u32>,
}

/// Repository handle that keeps everything in memory.
#[derive(Debug, Default)]
pub struct InMemoryRepositories {
    state: Mutex<State>,
    calls: Mutex<Vec<HandleCall>>,
}

impl InMemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| Error::LockPoisoned {
            context: "in-memory repository state".to_string(),
        })
    }

    /// Adds a commit to the remote `repo`, creating the remote if needed.
    pub fn add_commit(
        &self,
        repo: &str,
        commit: &str,
        parents: &[&str],
        files: &[(&str, &str)],
    ) -> Result<()> {
        let identity = RepositoryIdentity::parse(repo)?;
        let mut state = self.state()?;
        let remote = state.remotes.entry(identity.key().to_string()).or_default();
        remote.commits.insert(
            CommitId::new(commit),
            Commit {
                parents: parents.iter().map(|p| CommitId::new(*p)).collect(),
                files: files
                    .iter()
                    .map(|(path, content)| (PathBuf::from(path), content.as_bytes().to_vec()))
                    .collect(),
            },
        );
        Ok(())
    }

    /// Points a branch or tag of `repo` at `commit`.
    pub fn set_ref(&self, repo: &str, name: &str, commit: &str) -> Result<()> {
        let identity = RepositoryIdentity::parse(repo)?;
        let mut state = self.state()?;
        let remote = state
            .remotes
            .get_mut(identity.key())
            .ok_or_else(|| Error::RefNotFound {
                identity: identity.clone(),
                r#ref: commit.to_string(),
            })?;
        remote
            .refs
            .insert(name.to_string(), CommitId::new(commit));
        Ok(())
    }

    /// Makes the next `times` calls of `operation` on `repo` fail with a
    /// transient error.
    pub fn fail_next(&self, repo: &str, operation: Operation, times: u32) -> Result<()> {
        let identity = RepositoryIdentity::parse(repo)?;
        self.state()?
            .failures
            .insert((identity.key().to_string(), operation), times);
        Ok(())
    }

    /// Every call recorded so far, in call order.
    pub fn calls(&self) -> Vec<HandleCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Number of recorded calls of `operation`.
    pub fn count(&self, operation: Operation) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    /// Number of recorded calls that changed local state.
    pub fn mutating_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.operation.is_mutating())
            .count()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    /// Commit checked out at `path`, if any.
    pub fn work_tree_head(&self, path: &Path) -> Option<CommitId> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.work_trees.get(path).and_then(|tree| tree.head.clone()))
    }

    fn record(
        &self,
        operation: Operation,
        identity: &RepositoryIdentity,
        detail: String,
    ) -> Result<()> {
        self.calls
            .lock()
            .map_err(|_| Error::LockPoisoned {
                context: "in-memory call log".to_string(),
            })?
            .push(HandleCall {
                operation,
                identity: identity.key().to_string(),
                detail,
            });

        let mut state = self.state()?;
        let key = (identity.key().to_string(), operation);
        if let Some(remaining) = state.failures.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::RepositoryUnavailable {
                    identity: identity.clone(),
                    operation: format!("{:?}", operation).to_lowercase(),
                    message: "injected failure".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn no_remote(identity: &RepositoryIdentity, operation: &str) -> Error {
    Error::RepositoryUnavailable {
        identity: identity.clone(),
        operation: operation.to_string(),
        message: "repository not found".to_string(),
    }
}

fn not_fetched(identity: &RepositoryIdentity, operation: &str) -> Error {
    Error::RepositoryUnavailable {
        identity: identity.clone(),
        operation: operation.to_string(),
        message: "repository has not been fetched".to_string(),
    }
}

fn lookup<'a>(
    state: &'a State,
    identity: &RepositoryIdentity,
    operation: &str,
) -> Result<&'a Remote> {
    if !state.present.contains(identity.key()) {
        return Err(not_fetched(identity, operation));
    }
    state
        .remotes
        .get(identity.key())
        .ok_or_else(|| no_remote(identity, operation))
}

impl RepositoryHandle for InMemoryRepositories {
    fn is_present(&self, identity: &RepositoryIdentity) -> bool {
        self.state
            .lock()
            .map(|state| state.present.contains(identity.key()))
            .unwrap_or(false)
    }

    fn fetch(&self, identity: &RepositoryIdentity) -> Result<()> {
        self.record(Operation::Fetch, identity, String::new())?;
        let mut state = self.state()?;
        if !state.remotes.contains_key(identity.key()) {
            return Err(no_remote(identity, "fetch"));
        }
        state.present.insert(identity.key().to_string());
        Ok(())
    }

    fn resolve_ref(&self, identity: &RepositoryIdentity, r#ref: &str) -> Result<CommitId> {
        self.record(Operation::ResolveRef, identity, r#ref.to_string())?;
        let state = self.state()?;
        lookup(&state, identity, "resolve ref")?
            .resolve(r#ref)
            .ok_or_else(|| Error::RefNotFound {
                identity: identity.clone(),
                r#ref: r#ref.to_string(),
            })
    }

    fn read_file_at_ref(
        &self,
        identity: &RepositoryIdentity,
        r#ref: &str,
        path: &Path,
    ) -> Result<Option<Vec<u8>>> {
        self.record(
            Operation::ReadFile,
            identity,
            format!("{}:{}", r#ref, path.display()),
        )?;
        let state = self.state()?;
        let remote = lookup(&state, identity, "read file")?;
        let commit = remote.resolve(r#ref).ok_or_else(|| Error::RefNotFound {
            identity: identity.clone(),
            r#ref: r#ref.to_string(),
        })?;
        Ok(remote
            .commits
            .get(&commit)
            .and_then(|commit| commit.files.get(path).cloned()))
    }

    fn is_ancestor(
        &self,
        identity: &RepositoryIdentity,
        ancestor: &CommitId,
        descendant: &CommitId,
    ) -> Result<bool> {
        self.record(
            Operation::IsAncestor,
            identity,
            format!("{}..{}", ancestor, descendant),
        )?;
        let state = self.state()?;
        let remote = lookup(&state, identity, "ancestry check")?;

        let mut queue = VecDeque::from([descendant.clone()]);
        let mut seen = HashSet::new();
        while let Some(commit) = queue.pop_front() {
            if &commit == ancestor {
                return Ok(true);
            }
            if !seen.insert(commit.clone()) {
                continue;
            }
            if let Some(data) = remote.commits.get(&commit) {
                queue.extend(data.parents.iter().cloned());
            }
        }
        Ok(false)
    }

    fn current_checked_out_ref(
        &self,
        identity: &RepositoryIdentity,
        path: &Path,
    ) -> Result<Option<CommitId>> {
        self.record(Operation::CurrentRef, identity, path.display().to_string())?;
        Ok(self
            .state()?
            .work_trees
            .get(path)
            .and_then(|tree| tree.head.clone()))
    }

    fn clone_into(&self, identity: &RepositoryIdentity, path: &Path) -> Result<()> {
        self.record(Operation::Clone, identity, path.display().to_string())?;
        let mut state = self.state()?;
        if state.work_trees.contains_key(path) {
            return Err(Error::RepositoryUnavailable {
                identity: identity.clone(),
                operation: "clone".to_string(),
                message: format!("destination {} already exists", path.display()),
            });
        }
        let known = state
            .remotes
            .get(identity.key())
            .ok_or_else(|| no_remote(identity, "clone"))?
            .commits
            .keys()
            .cloned()
            .collect();
        state
            .work_trees
            .insert(path.to_path_buf(), WorkTree { head: None, known });
        Ok(())
    }

    fn fetch_into(&self, identity: &RepositoryIdentity, path: &Path) -> Result<()> {
        self.record(Operation::FetchInto, identity, path.display().to_string())?;
        let mut state = self.state()?;
        let commits: HashSet<CommitId> = state
            .remotes
            .get(identity.key())
            .ok_or_else(|| no_remote(identity, "fetch"))?
            .commits
            .keys()
            .cloned()
            .collect();
        let tree = state
            .work_trees
            .get_mut(path)
            .ok_or_else(|| Error::RepositoryUnavailable {
                identity: identity.clone(),
                operation: "fetch".to_string(),
                message: format!("no work tree at {}", path.display()),
            })?;
        tree.known.extend(commits);
        Ok(())
    }

    fn checkout(
        &self,
        identity: &RepositoryIdentity,
        path: &Path,
        commit: &CommitId,
    ) -> Result<()> {
        self.record(
            Operation::Checkout,
            identity,
            format!("{}@{}", path.display(), commit),
        )?;
        let mut state = self.state()?;
        let tree = state
            .work_trees
            .get_mut(path)
            .ok_or_else(|| Error::RepositoryUnavailable {
                identity: identity.clone(),
                operation: "checkout".to_string(),
                message: format!("no work tree at {}", path.display()),
            })?;
        if !tree.known.contains(commit) {
            return Err(Error::RefNotFound {
                identity: identity.clone(),
                r#ref: commit.to_string(),
            });
        }
        tree.head = Some(commit.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIB: &str = "https://github.com/acme/lib";

    fn lib() -> RepositoryIdentity {
        RepositoryIdentity::parse(LIB).unwrap()
    }

    fn fixture() -> InMemoryRepositories {
        let repos = InMemoryRepositories::new();
        repos.add_commit(LIB, "c1", &[], &[("README", "one")]).unwrap();
        repos.add_commit(LIB, "c2", &["c1"], &[("README", "two")]).unwrap();
        repos.add_commit(LIB, "x1", &[], &[]).unwrap();
        repos.set_ref(LIB, "main", "c2").unwrap();
        repos.set_ref(LIB, "v1", "c1").unwrap();
        repos
    }

    #[test]
    fn test_requires_fetch_before_reads() {
        let repos = fixture();
        assert!(!repos.is_present(&lib()));
        assert!(repos.resolve_ref(&lib(), "main").is_err());

        repos.fetch(&lib()).unwrap();
        assert!(repos.is_present(&lib()));
        assert_eq!(repos.resolve_ref(&lib(), "main").unwrap(), CommitId::new("c2"));
        assert_eq!(repos.resolve_ref(&lib(), "c1").unwrap(), CommitId::new("c1"));
        assert!(matches!(
            repos.resolve_ref(&lib(), "nope"),
            Err(Error::RefNotFound { .. })
        ));
    }

    #[test]
    fn test_read_file_missing_is_none() {
        let repos = fixture();
        repos.fetch(&lib()).unwrap();
        let content = repos
            .read_file_at_ref(&lib(), "v1", Path::new("README"))
            .unwrap();
        assert_eq!(content, Some(b"one".to_vec()));
        let missing = repos
            .read_file_at_ref(&lib(), "v1", Path::new(".gitdeps"))
            .unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_ancestry() {
        let repos = fixture();
        repos.fetch(&lib()).unwrap();
        let c1 = CommitId::new("c1");
        let c2 = CommitId::new("c2");
        let x1 = CommitId::new("x1");
        assert!(repos.is_ancestor(&lib(), &c1, &c2).unwrap());
        assert!(repos.is_ancestor(&lib(), &c2, &c2).unwrap());
        assert!(!repos.is_ancestor(&lib(), &c2, &c1).unwrap());
        assert!(!repos.is_ancestor(&lib(), &x1, &c2).unwrap());
    }

    #[test]
    fn test_work_tree_lifecycle() {
        let repos = fixture();
        let path = Path::new("/ws/lib");
        assert_eq!(repos.current_checked_out_ref(&lib(), path).unwrap(), None);

        repos.clone_into(&lib(), path).unwrap();
        repos.checkout(&lib(), path, &CommitId::new("c1")).unwrap();
        assert_eq!(repos.work_tree_head(path), Some(CommitId::new("c1")));
        assert!(repos.clone_into(&lib(), path).is_err());

        repos.add_commit(LIB, "c3", &["c2"], &[]).unwrap();
        assert!(repos.checkout(&lib(), path, &CommitId::new("c3")).is_err());
        repos.fetch_into(&lib(), path).unwrap();
        repos.checkout(&lib(), path, &CommitId::new("c3")).unwrap();
        assert_eq!(repos.work_tree_head(path), Some(CommitId::new("c3")));
    }

    #[test]
    fn test_injected_failures_are_transient_and_counted() {
        let repos = fixture();
        repos.fail_next(LIB, Operation::Fetch, 2).unwrap();
        assert!(repos.fetch(&lib()).unwrap_err().is_transient());
        assert!(repos.fetch(&lib()).is_err());
        assert!(repos.fetch(&lib()).is_ok());
        assert_eq!(repos.count(Operation::Fetch), 3);
        assert_eq!(repos.mutating_calls(), 3);

        repos.clear_calls();
        assert!(repos.calls().is_empty());
    }
}
