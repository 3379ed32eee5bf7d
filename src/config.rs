//! # Workspace Settings
//!
//! This module defines the optional `gitdep.yaml` settings file read from the
//! workspace root, and the defaults used when it is absent.
//!
//! ```yaml
//! manifest: .gitdeps
//! jobs: 8
//! retries: 3
//! backoff_ms: 200
//! conflict_policy: ancestor   # or: strict
//! cache_dir: ~/.cache/gitdep
//! lockfile: .gitdeps.lock
//! ```
//!
//! Every field is optional. Unknown keys are rejected so that typos do not
//! silently fall back to defaults. Command-line flags and environment
//! variables take precedence over this file; that layering happens in the
//! binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lockfile::DEFAULT_LOCKFILE_NAME;
use crate::manifest::DEFAULT_MANIFEST_NAME;
use crate::phases::resolution::ConflictPolicy;
use crate::retry::RetryPolicy;

/// Settings file name, relative to the workspace root.
pub const SETTINGS_FILE_NAME: &str = "gitdep.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Manifest file name inside every repository.
    pub manifest: PathBuf,
    /// Worker pool size; defaults to the available parallelism.
    pub jobs: Option<usize>,
    /// Attempts per repository operation, including the first.
    pub retries: u32,
    /// Initial retry backoff in milliseconds.
    pub backoff_ms: u64,
    pub conflict_policy: ConflictPolicy,
    /// Directory for discovery mirrors.
    pub cache_dir: Option<PathBuf>,
    /// Lockfile path, relative to the workspace root.
    pub lockfile: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from(DEFAULT_MANIFEST_NAME),
            jobs: None,
            retries: 3,
            backoff_ms: 200,
            conflict_policy: ConflictPolicy::default(),
            cache_dir: None,
            lockfile: PathBuf::from(DEFAULT_LOCKFILE_NAME),
        }
    }
}

impl Settings {
    /// Parses settings YAML. An empty document yields the defaults.
    pub fn parse(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Settings = serde_yaml::from_str(yaml).map_err(|e| Error::Config {
            message: format!("invalid settings: {}", e),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads `gitdep.yaml` from the workspace root, or the defaults when the
    /// file does not exist.
    pub fn load(workspace_root: &Path) -> Result<Self> {
        let path = workspace_root.join(SETTINGS_FILE_NAME);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        Self::parse(&text).map_err(|e| Error::Config {
            message: format!("{}: {}", path.display(), e),
        })
    }

    fn validate(&self) -> Result<()> {
        if self.manifest.as_os_str().is_empty() {
            return Err(Error::Config {
                message: "manifest must not be empty".to_string(),
            });
        }
        if self.jobs == Some(0) {
            return Err(Error::Config {
                message: "jobs must be at least 1".to_string(),
            });
        }
        if self.retries == 0 {
            return Err(Error::Config {
                message: "retries must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Effective worker pool size.
    pub fn jobs(&self) -> usize {
        self.jobs
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
            .max(1)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retries,
            initial_backoff: Duration::from_millis(self.backoff_ms),
            ..RetryPolicy::default()
        }
    }

    /// Effective mirror cache directory. A leading `~` is the home directory;
    /// other relative paths are taken from `workspace_root`.
    pub fn cache_dir(&self, workspace_root: &Path) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => match (dir.strip_prefix("~"), dirs::home_dir()) {
                (Ok(rest), Some(home)) => home.join(rest),
                _ => workspace_root.join(dir),
            },
            None => dirs::cache_dir()
                .map(|dir| dir.join("gitdep"))
                .unwrap_or_else(|| workspace_root.join(".gitdep-cache")),
        }
    }

    pub fn lockfile_path(&self, workspace_root: &Path) -> PathBuf {
        workspace_root.join(&self.lockfile)
    }
}
