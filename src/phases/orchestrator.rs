//! Orchestrator for complete `gitdep` runs
//!
//! This module coordinates the phases behind a small API: `plan` builds and
//! validates the target state (Phases 1-4) and `execute_sync` materializes it
//! (Phase 5). Any error of Phases 1-4 aborts the run before a single work
//! tree is touched.

use std::path::{Path, PathBuf};

use log::{debug, info};

use super::discovery::DiscoveryOptions;
use super::layout::WorkspaceLayout;
use super::resolution::ResolutionOptions;
use super::sync::{SyncOptions, SyncProgress, SyncReport};
use super::{phase1, phase2, phase3, phase5, RawGraph, Resolution};
use crate::error::{Error, Result};
use crate::identity::{RepositoryIdentity, Requester};
use crate::manifest::{self, ManifestNode};
use crate::repository::RepositoryHandle;

/// Everything a run needs besides the root manifest and the handle.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Absolute workspace root; layout paths are joined to it.
    pub workspace_root: PathBuf,
    /// Identity of the repository that owns the root manifest, when known.
    pub root_identity: Option<RepositoryIdentity>,
    pub discovery: DiscoveryOptions,
    pub resolution: ResolutionOptions,
    pub sync: SyncOptions,
}

impl PipelineOptions {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            root_identity: None,
            discovery: DiscoveryOptions::default(),
            resolution: ResolutionOptions::default(),
            sync: SyncOptions::default(),
        }
    }
}

/// The validated target state of a workspace.
#[derive(Debug)]
pub struct Plan {
    pub raw: RawGraph,
    pub resolution: Resolution,
    /// Repositories in topological order, dependencies first.
    pub order: Vec<RepositoryIdentity>,
    pub layout: WorkspaceLayout,
}

/// Reads the root manifest from the workspace.
pub fn load_root_manifest(workspace_root: &Path, manifest_name: &Path) -> Result<ManifestNode> {
    let path = workspace_root.join(manifest_name);
    if !path.is_file() {
        return Err(Error::Config {
            message: format!("no manifest found at {}", path.display()),
        });
    }
    manifest::from_file(&path, &Requester::Root)
}

/// Execute Phases 1-4: discover, resolve, check for cycles and lay out.
pub fn plan(
    root: &ManifestNode,
    handle: &dyn RepositoryHandle,
    pool: &rayon::ThreadPool,
    options: &PipelineOptions,
) -> Result<Plan> {
    // Phase 1: Discovery
    let mut raw = phase1::discover(
        root,
        options.root_identity.as_ref(),
        handle,
        pool,
        &options.discovery,
    );
    Error::from_collected(std::mem::take(&mut raw.errors))?;

    // Phase 2: Resolution
    let resolution = phase2::resolve(&raw, handle, &options.resolution)?;

    // Phase 3: Cycle Detection
    let order = phase3::detect(&resolution.graph)?;

    // Phase 4: Layout
    let layout = WorkspaceLayout::build(&options.workspace_root, &resolution)?;

    debug!(
        "plan ready: {} repositories under {}",
        layout.len(),
        options.workspace_root.display()
    );
    Ok(Plan {
        raw,
        resolution,
        order,
        layout,
    })
}

/// Execute a full run: plan, then synchronize (Phase 5).
///
/// Errors of the planning phases are returned as `Err`; per-repository
/// synchronization failures are in the report.
pub fn execute_sync(
    root: &ManifestNode,
    handle: &dyn RepositoryHandle,
    pool: &rayon::ThreadPool,
    options: &PipelineOptions,
    progress: &dyn SyncProgress,
) -> Result<(Plan, SyncReport)> {
    let plan = plan(root, handle, pool, options)?;
    let report = synchronize_plan(&plan, handle, pool, &options.sync, progress);
    Ok((plan, report))
}

/// Execute Phase 5 for an existing plan.
pub fn synchronize_plan(
    plan: &Plan,
    handle: &dyn RepositoryHandle,
    pool: &rayon::ThreadPool,
    options: &SyncOptions,
    progress: &dyn SyncProgress,
) -> SyncReport {
    info!("synchronizing {} repositories", plan.layout.len());
    phase5::synchronize(
        &plan.resolution,
        &plan.layout,
        &plan.order,
        handle,
        pool,
        options,
        progress,
    )
}
