//! # gitdep
//!
//! Dependency management between git repositories. A repository declares, in
//! a `.gitdeps` manifest, which other repositories it needs and at which ref;
//! those may declare further dependencies. This library resolves the
//! resulting graph into one conflict-free workspace layout and keeps the
//! work trees on disk synchronized with it.
//!
//! ## Quick Example
//!
//! ```
//! use gitdep::identity::Requester;
//! use gitdep::manifest;
//! use gitdep::phases::{orchestrator, worker_pool};
//! use gitdep::repository::memory::InMemoryRepositories;
//!
//! let repos = InMemoryRepositories::new();
//! repos.add_commit("https://github.com/acme/lib", "c1", &[], &[]).unwrap();
//! repos.set_ref("https://github.com/acme/lib", "v1", "c1").unwrap();
//!
//! let root = manifest::parse("https://github.com/acme/lib.git v1\n", &Requester::Root).unwrap();
//! let pool = worker_pool(2).unwrap();
//! let options = orchestrator::PipelineOptions::new("/workspace");
//! let (plan, report) = orchestrator::execute_sync(&root, &repos, &pool, &options, &()).unwrap();
//!
//! assert_eq!(plan.resolution.repositories[0].r#ref, "v1");
//! assert!(report.is_success());
//! ```
//!
//! ## Core Concepts
//!
//! - **Identities (`identity`)**: canonical repository keys, independent of
//!   how a URL was spelled.
//! - **Manifests (`manifest`)**: parsing of one repository's declared
//!   dependencies.
//! - **Repository Handles (`repository`, `git`)**: the only way the engine
//!   touches version-control state; backed by the system `git` binary or held
//!   entirely in memory.
//! - **Phases (`phases`)**: discovery, resolution, cycle detection, layout
//!   and synchronization.
//! - **Ambient (`config`, `lockfile`, `retry`, `output`, `error`)**: settings,
//!   the resolved workspace manifest, retries with backoff, and user-facing
//!   output.
//!
//! ## Execution Flow
//!
//! The main entry point is `phases::orchestrator`:
//!
//! 1.  **Discovery**: Breadth-first expansion of manifests, in parallel.
//! 2.  **Resolution**: One target ref per repository, or conflicts.
//! 3.  **Cycle Detection**: Reject cycles, order repositories topologically.
//! 4.  **Layout**: Map repositories to unique workspace paths.
//! 5.  **Synchronization**: Clone, fetch and check out, in parallel waves.
//!
//! Errors of steps 1-4 abort the run before any work tree is touched.

pub mod config;
pub mod error;
pub mod git;
pub mod identity;
pub mod lockfile;
pub mod manifest;
pub mod output;
pub mod phases;
pub mod repository;
pub mod retry;

#[cfg(test)]
mod identity_proptest;
