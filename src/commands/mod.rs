//! # CLI Command Implementations
//!
//! Each subcommand of the `gitdep` command-line tool lives in its own file
//! with an `Args` struct derived using `clap` and an `execute` function that
//! calls into the `gitdep` library.
//!
//! This module also layers the run configuration: command-line flag, then
//! environment variable (through clap's `env` attributes), then
//! `gitdep.yaml`, then the built-in default.

pub mod completions;
pub mod resolve;
pub mod sync;
pub mod tree;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use log::debug;

use gitdep::config::Settings;
use gitdep::git;
use gitdep::identity::RepositoryIdentity;
use gitdep::manifest::ManifestNode;
use gitdep::output::OutputConfig;
use gitdep::phases::orchestrator::{self, PipelineOptions, Plan};
use gitdep::phases::worker_pool;
use gitdep::repository::GitRepositories;

use crate::cli::GlobalArgs;

/// Everything a command needs to run the pipeline.
pub struct Context {
    pub workspace_root: PathBuf,
    pub settings: Settings,
    pub out: OutputConfig,
    pub options: PipelineOptions,
    pub jobs: usize,
    pub handle: GitRepositories,
}

impl Context {
    pub fn new(global: &GlobalArgs) -> Result<Self> {
        let workspace_root = workspace_root(global.workspace.as_deref())?;
        let mut settings = Settings::load(&workspace_root)?;
        if let Some(policy) = &global.conflict_policy {
            settings.conflict_policy = policy.parse()?;
        }
        if global.jobs == Some(0) {
            anyhow::bail!("--jobs must be at least 1");
        }
        let jobs = global.jobs.unwrap_or_else(|| settings.jobs());

        let cache_dir = global
            .cache_dir
            .clone()
            .unwrap_or_else(|| settings.cache_dir(&workspace_root));
        debug!("workspace {}, cache {}", workspace_root.display(), cache_dir.display());

        let root_identity = match &global.root_url {
            Some(url) => Some(RepositoryIdentity::parse(url)?),
            None => git::remote_url(&workspace_root, "origin")
                .and_then(|url| RepositoryIdentity::parse(&url).ok()),
        };

        let mut options = PipelineOptions::new(workspace_root.clone());
        options.root_identity = root_identity;
        options.discovery.manifest_name = settings.manifest.clone();
        options.discovery.retry = settings.retry_policy();
        options.discovery.refresh = global.refresh;
        options.resolution.policy = settings.conflict_policy;
        options.resolution.retry = settings.retry_policy();
        options.sync.retry = settings.retry_policy();

        Ok(Self {
            out: OutputConfig::from_env_and_flag(&global.color),
            handle: GitRepositories::new(cache_dir),
            workspace_root,
            settings,
            options,
            jobs,
        })
    }

    pub fn root_manifest(&self) -> Result<ManifestNode> {
        Ok(orchestrator::load_root_manifest(
            &self.workspace_root,
            &self.settings.manifest,
        )?)
    }

    pub fn pool(&self) -> Result<rayon::ThreadPool> {
        Ok(worker_pool(self.jobs)?)
    }

    /// Runs discovery through layout.
    pub fn plan(&self, pool: &rayon::ThreadPool) -> Result<Plan> {
        let root = self.root_manifest()?;
        Ok(orchestrator::plan(&root, &self.handle, pool, &self.options)?)
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.settings.lockfile_path(&self.workspace_root)
    }
}

fn workspace_root(flag: Option<&Path>) -> Result<PathBuf> {
    let current = std::env::current_dir().context("cannot determine the current directory")?;
    let root = match flag {
        Some(path) => current.join(path),
        None => current,
    };
    if !root.is_dir() {
        anyhow::bail!("workspace {} is not a directory", root.display());
    }
    Ok(root)
}
