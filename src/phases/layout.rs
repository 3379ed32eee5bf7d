//! Phase 4: Workspace Layout
//!
//! Maps every resolved repository to an absolute path under the workspace
//! root and rejects layouts where two repositories share a path. Paths may
//! nest (`lib` and `lib/vendor/proto`); nesting decides which repositories
//! must be synchronized before which.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::Resolution;
use crate::error::{Error, Result};
use crate::identity::RepositoryIdentity;

/// Absolute checkout path of every repository, built once and threaded into
/// synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    root: PathBuf,
    paths: BTreeMap<RepositoryIdentity, PathBuf>,
}

impl WorkspaceLayout {
    /// Executes Phase 4: lay out `resolution` under `workspace_root`.
    ///
    /// Every collision is reported, not only the first.
    pub fn build(workspace_root: &Path, resolution: &Resolution) -> Result<Self> {
        let mut by_path: BTreeMap<PathBuf, Vec<RepositoryIdentity>> = BTreeMap::new();
        for repository in &resolution.repositories {
            by_path
                .entry(workspace_root.join(&repository.path))
                .or_default()
                .push(repository.identity.clone());
        }

        let mut errors = Vec::new();
        let mut paths = BTreeMap::new();
        for (path, identities) in by_path {
            if identities.len() > 1 {
                errors.push(Error::LayoutCollision { path, identities });
                continue;
            }
            for identity in identities {
                paths.insert(identity, path.clone());
            }
        }
        Error::from_collected(errors)?;

        Ok(Self {
            root: workspace_root.to_path_buf(),
            paths,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, identity: &RepositoryIdentity) -> Option<&Path> {
        self.paths.get(identity).map(PathBuf::as_path)
    }

    /// Entries sorted by identity.
    pub fn iter(&self) -> impl Iterator<Item = (&RepositoryIdentity, &Path)> {
        self.paths.iter().map(|(identity, path)| (identity, path.as_path()))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// The repository whose path most closely encloses `identity`'s path.
    pub fn parent_of(&self, identity: &RepositoryIdentity) -> Option<&RepositoryIdentity> {
        let path = self.paths.get(identity)?;
        self.paths
            .iter()
            .filter(|(other, other_path)| *other != identity && path.starts_with(other_path))
            .max_by_key(|(_, other_path)| other_path.components().count())
            .map(|(other, _)| other)
    }

    /// Number of enclosing repositories.
    pub fn depth_of(&self, identity: &RepositoryIdentity) -> usize {
        let mut depth = 0;
        let mut current = identity;
        while let Some(parent) = self.parent_of(current) {
            depth += 1;
            current = parent;
        }
        depth
    }

    /// Groups `order` into waves by nesting depth. Waves must run one after
    /// another; repositories within a wave never share a path prefix with
    /// each other and may run concurrently. Each wave keeps `order`.
    pub fn waves(&self, order: &[RepositoryIdentity]) -> Vec<Vec<RepositoryIdentity>> {
        let mut waves: Vec<Vec<RepositoryIdentity>> = Vec::new();
        for identity in order {
            if !self.paths.contains_key(identity) {
                continue;
            }
            let depth = self.depth_of(identity);
            if waves.len() <= depth {
                waves.resize_with(depth + 1, Vec::new);
            }
            waves[depth].push(identity.clone());
        }
        waves
    }
}
