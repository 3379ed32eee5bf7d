//! # Resolved Workspace Manifest
//!
//! The lockfile (`.gitdeps.lock`) records the outcome of a successful
//! resolution: every repository with its chosen ref, commit and checkout
//! path, sorted by identity so the file is stable across runs on the same
//! input.
//!
//! ```yaml
//! version: 1
//! repositories:
//!   - identity: github.com/acme/lib
//!     url: https://github.com/acme/lib.git
//!     ref: v1.2.0
//!     commit: 4f1c0d2e9a...
//!     path: lib
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::phases::Resolution;

/// Default lockfile name, relative to the workspace root.
pub const DEFAULT_LOCKFILE_NAME: &str = ".gitdeps.lock";

/// Format version written by this crate.
pub const LOCKFILE_VERSION: u32 = 1;

/// One locked repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockedRepository {
    pub identity: String,
    pub url: String,
    #[serde(rename = "ref")]
    pub r#ref: String,
    pub commit: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Lockfile {
    pub version: u32,
    #[serde(default)]
    pub repositories: Vec<LockedRepository>,
}

/// How a repository differs between two lockfiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockChange {
    Added(LockedRepository),
    Removed(LockedRepository),
    Changed {
        before: LockedRepository,
        after: LockedRepository,
    },
}

impl Lockfile {
    pub fn from_resolution(resolution: &Resolution) -> Self {
        let mut repositories: Vec<LockedRepository> = resolution
            .repositories
            .iter()
            .map(|repository| LockedRepository {
                identity: repository.identity.key().to_string(),
                url: repository.identity.url().to_string(),
                r#ref: repository.r#ref.clone(),
                commit: repository.commit.to_string(),
                path: repository.path.clone(),
            })
            .collect();
        repositories.sort_by(|a, b| a.identity.cmp(&b.identity));
        Self {
            version: LOCKFILE_VERSION,
            repositories,
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let lockfile: Lockfile = serde_yaml::from_str(text)?;
        if lockfile.version != LOCKFILE_VERSION {
            return Err(Error::Lockfile {
                message: format!(
                    "unsupported lockfile version {} (expected {})",
                    lockfile.version, LOCKFILE_VERSION
                ),
            });
        }
        Ok(lockfile)
    }

    /// Loads a lockfile; a missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text).map(Some).map_err(|e| Error::Lockfile {
            message: format!("{}: {}", path.display(), e),
        })
    }

    /// Writes the lockfile, leaving an identical file untouched.
    pub fn save(&self, path: &Path) -> Result<bool> {
        let text = self.to_yaml()?;
        if std::fs::read_to_string(path).is_ok_and(|existing| existing == text) {
            return Ok(false);
        }
        std::fs::write(path, text)?;
        Ok(true)
    }

    pub fn get(&self, identity: &str) -> Option<&LockedRepository> {
        self.repositories
            .iter()
            .find(|repository| repository.identity == identity)
    }

    /// Differences from `previous` to `self`, in identity order.
    pub fn changes_since(&self, previous: &Lockfile) -> Vec<LockChange> {
        let mut changes = Vec::new();
        for after in &self.repositories {
            match previous.get(&after.identity) {
                None => changes.push(LockChange::Added(after.clone())),
                Some(before) if before != after => changes.push(LockChange::Changed {
                    before: before.clone(),
                    after: after.clone(),
                }),
                Some(_) => {}
            }
        }
        for before in &previous.repositories {
            if self.get(&before.identity).is_none() {
                changes.push(LockChange::Removed(before.clone()));
            }
        }
        changes.sort_by(|a, b| a.identity().cmp(b.identity()));
        changes
    }
}

impl LockChange {
    pub fn identity(&self) -> &str {
        match self {
            LockChange::Added(repository) | LockChange::Removed(repository) => &repository.identity,
            LockChange::Changed { after, .. } => &after.identity,
        }
    }
}
