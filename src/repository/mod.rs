//! # Repository Handles
//!
//! The `RepositoryHandle` trait is the only way the discovery, resolution and
//! synchronization phases touch version-control state. Every method is a
//! potential suspension and failure point: implementations are allowed to
//! hit the network or the disk on every call.
//!
//! ## Implementations
//!
//! - **`GitRepositories`**: drives the system `git` binary. Discovery reads
//!   from one bare mirror per identity under a cache directory; work trees
//!   are plain clones at their workspace layout paths.
//! - **`memory::InMemoryRepositories`**: a fully in-memory model of commits,
//!   refs and work trees that records every call. Used by tests, benches and
//!   dry runs.

pub mod memory;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::git;
use crate::identity::RepositoryIdentity;

/// A full commit id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for human-facing output.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(10)
            .map(|(index, _)| index)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Version-control operations consumed by the dependency engine.
pub trait RepositoryHandle: Send + Sync {
    /// Whether the repository's history is available locally for discovery.
    fn is_present(&self, identity: &RepositoryIdentity) -> bool;

    /// Makes the repository's history available locally (clone when absent,
    /// update otherwise).
    fn fetch(&self, identity: &RepositoryIdentity) -> Result<()>;

    /// Resolves a branch, tag or commit to a commit id.
    fn resolve_ref(&self, identity: &RepositoryIdentity, r#ref: &str) -> Result<CommitId>;

    /// Reads a file at a ref. A missing file is `Ok(None)`.
    fn read_file_at_ref(
        &self,
        identity: &RepositoryIdentity,
        r#ref: &str,
        path: &Path,
    ) -> Result<Option<Vec<u8>>>;

    /// Whether `ancestor` is equal to or reachable from `descendant`.
    fn is_ancestor(
        &self,
        identity: &RepositoryIdentity,
        ancestor: &CommitId,
        descendant: &CommitId,
    ) -> Result<bool>;

    /// Commit checked out in the work tree at `path`, `None` when the path
    /// holds no work tree yet.
    fn current_checked_out_ref(
        &self,
        identity: &RepositoryIdentity,
        path: &Path,
    ) -> Result<Option<CommitId>>;

    /// Creates a work tree for the repository at `path`.
    fn clone_into(&self, identity: &RepositoryIdentity, path: &Path) -> Result<()>;

    /// Makes every ref of the repository available inside the work tree.
    fn fetch_into(&self, identity: &RepositoryIdentity, path: &Path) -> Result<()>;

    /// Checks out `commit` in the work tree at `path`.
    fn checkout(&self, identity: &RepositoryIdentity, path: &Path, commit: &CommitId)
        -> Result<()>;
}

/// Repository handle backed by the system `git` binary.
#[derive(Debug, Clone)]
pub struct GitRepositories {
    cache_root: PathBuf,
}

impl GitRepositories {
    /// Creates a handle that keeps discovery mirrors under `cache_root`.
    pub fn new(cache_root: PathBuf) -> Self {
        Self { cache_root }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    fn mirror(&self, identity: &RepositoryIdentity) -> PathBuf {
        git::mirror_path(&self.cache_root, identity.key())
    }

    fn present_mirror(&self, identity: &RepositoryIdentity, operation: &str) -> Result<PathBuf> {
        let mirror = self.mirror(identity);
        if mirror.exists() {
            Ok(mirror)
        } else {
            Err(Error::RepositoryUnavailable {
                identity: identity.clone(),
                operation: operation.to_string(),
                message: "repository has not been fetched".to_string(),
            })
        }
    }
}

/// Attaches the repository and the operation to a git failure.
fn unavailable(identity: &RepositoryIdentity, operation: &str) -> impl Fn(Error) -> Error {
    let identity = identity.clone();
    let operation = operation.to_string();
    move |error| match error {
        Error::GitCommand { stderr, .. } => Error::RepositoryUnavailable {
            identity: identity.clone(),
            operation: operation.clone(),
            message: stderr,
        },
        Error::Io(e) => Error::RepositoryUnavailable {
            identity: identity.clone(),
            operation: operation.clone(),
            message: e.to_string(),
        },
        other => other,
    }
}

impl RepositoryHandle for GitRepositories {
    fn is_present(&self, identity: &RepositoryIdentity) -> bool {
        self.mirror(identity).is_dir()
    }

    fn fetch(&self, identity: &RepositoryIdentity) -> Result<()> {
        let mirror = self.mirror(identity);
        let result = if mirror.is_dir() {
            git::update_mirror(&mirror)
        } else {
            git::clone_mirror(identity.url(), &mirror)
        };
        result.map_err(unavailable(identity, "fetch"))
    }

    fn resolve_ref(&self, identity: &RepositoryIdentity, r#ref: &str) -> Result<CommitId> {
        let mirror = self.present_mirror(identity, "resolve ref")?;
        git::rev_parse(&mirror, r#ref)
            .map_err(unavailable(identity, "resolve ref"))?
            .map(CommitId::new)
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
        let commit = self.resolve_ref(identity, r#ref)?;
        let mirror = self.present_mirror(identity, "read file")?;
        let path = path.to_string_lossy().replace('\\', "/");
        git::read_blob(&mirror, commit.as_str(), &path).map_err(unavailable(identity, "read file"))
    }

    fn is_ancestor(
        &self,
        identity: &RepositoryIdentity,
        ancestor: &CommitId,
        descendant: &CommitId,
    ) -> Result<bool> {
        let mirror = self.present_mirror(identity, "ancestry check")?;
        git::is_ancestor(&mirror, ancestor.as_str(), descendant.as_str())
            .map_err(unavailable(identity, "ancestry check"))
    }

    fn current_checked_out_ref(
        &self,
        identity: &RepositoryIdentity,
        path: &Path,
    ) -> Result<Option<CommitId>> {
        Ok(git::head_commit(path)
            .map_err(unavailable(identity, "read HEAD"))?
            .map(CommitId::new))
    }

    fn clone_into(&self, identity: &RepositoryIdentity, path: &Path) -> Result<()> {
        git::clone_no_checkout(identity.url(), path).map_err(unavailable(identity, "clone"))
    }

    fn fetch_into(&self, identity: &RepositoryIdentity, path: &Path) -> Result<()> {
        git::fetch(path, identity.url()).map_err(unavailable(identity, "fetch"))
    }

    fn checkout(
        &self,
        identity: &RepositoryIdentity,
        path: &Path,
        commit: &CommitId,
    ) -> Result<()> {
        git::checkout_detached(path, commit.as_str()).map_err(unavailable(identity, "checkout"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn identity() -> RepositoryIdentity {
        RepositoryIdentity::parse("https://github.com/acme/lib.git").unwrap()
    }

    #[test]
    fn test_commit_id_short() {
        let commit = CommitId::new("0123456789abcdef0123456789abcdef01234567");
        assert_eq!(commit.short(), "0123456789");
        assert_eq!(CommitId::new("abc").short(), "abc");
    }

    #[test]
    fn test_git_repositories_absent_mirror() {
        let temp = TempDir::new().unwrap();
        let repos = GitRepositories::new(temp.path().to_path_buf());

        assert!(!repos.is_present(&identity()));
        let result = repos.resolve_ref(&identity(), "main");
        assert!(matches!(
            result,
            Err(Error::RepositoryUnavailable { ref operation, .. }) if operation == "resolve ref"
        ));
    }

    #[test]
    fn test_git_repositories_uninitialized_work_tree() {
        let temp = TempDir::new().unwrap();
        let repos = GitRepositories::new(temp.path().join("cache"));
        let current = repos
            .current_checked_out_ref(&identity(), &temp.path().join("lib"))
            .unwrap();
        assert_eq!(current, None);
    }

    #[test]
    fn test_unavailable_wraps_git_failures() {
        let wrap = unavailable(&identity(), "clone");
        let error = wrap(Error::GitCommand {
            command: "clone".to_string(),
            stderr: "fatal: repository not found".to_string(),
        });
        assert!(error.is_transient());
        assert!(error.to_string().contains("github.com/acme/lib unavailable during clone"));

        let passthrough = wrap(Error::Config {
            message: "x".to_string(),
        });
        assert!(!passthrough.is_transient());
    }
}
