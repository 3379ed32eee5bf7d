//! Implementation of the phases of a `gitdep` run.
//!
//! ## Overview
//!
//! A run follows these phases, each consuming the previous one's output:
//! 1. Discovery - Breadth-first expansion of manifests into a raw multigraph
//! 2. Resolution - Collapse to one target ref per repository, or report conflicts
//! 3. Cycle Detection - Validate the collapsed graph and order it topologically
//! 4. Layout - Map every repository to a unique workspace path
//! 5. Synchronization - Clone, fetch and check out work trees to match
//!
//! Ownership flows forward: discovery owns the raw graph until it is handed to
//! resolution, whose output is read-only for everything after it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::identity::{RepositoryIdentity, Requester};
use crate::manifest::DependencyReference;
use crate::repository::CommitId;

// Phase modules
pub mod cycles;
pub mod discovery;
pub mod layout;
pub mod orchestrator;
pub mod resolution;
pub mod sync;

// Re-export phase modules to preserve public API
pub use cycles as phase3;
pub use discovery as phase1;
pub use layout as phase4;
pub use resolution as phase2;
pub use sync as phase5;

/// "`from` requires `to.identity` at `to.ref`".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub from: Requester,
    pub to: DependencyReference,
}

/// Everything discovery learned, in discovery order.
#[derive(Debug, Default)]
pub struct RawGraph {
    /// Identity of the root repository itself, when known.
    pub root_identity: Option<RepositoryIdentity>,
    /// Every edge, including edges to the root and duplicates.
    pub edges: Vec<GraphEdge>,
    /// Every (identity, ref) pair that was expanded, in expansion order.
    pub expanded: Vec<Requester>,
    /// Failures collected per (identity, ref) expansion.
    pub errors: Vec<Error>,
}

impl RawGraph {
    /// Edges contributed by one requester, in declaration order.
    pub fn edges_from<'a>(&'a self, requester: &'a Requester) -> impl Iterator<Item = &'a GraphEdge> {
        self.edges.iter().filter(move |edge| &edge.from == requester)
    }

    /// Whether an edge targets the root repository itself.
    pub fn targets_root(&self, edge: &GraphEdge) -> bool {
        self.root_identity.as_ref() == Some(&edge.to.identity)
    }
}

/// One repository after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRepository {
    pub identity: RepositoryIdentity,
    /// The winning ref, as spelled by its requesters.
    pub r#ref: String,
    pub commit: CommitId,
    /// Checkout path relative to the workspace root.
    pub path: PathBuf,
    /// Requesters that contributed an edge, in discovery order.
    pub requesters: Vec<Requester>,
}

/// A node of the identity-collapsed graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GraphNode {
    Root,
    Repository(RepositoryIdentity),
}

impl fmt::Display for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphNode::Root => f.write_str("root"),
            GraphNode::Repository(identity) => write!(f, "{}", identity),
        }
    }
}

/// Identity-collapsed dependency graph: one node per repository plus the
/// root, successors kept in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    successors: BTreeMap<GraphNode, Vec<GraphNode>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an edge; repeated edges are kept once.
    pub fn add_edge(&mut self, from: GraphNode, to: GraphNode) {
        self.successors.entry(to.clone()).or_default();
        let successors = self.successors.entry(from).or_default();
        if !successors.contains(&to) {
            successors.push(to);
        }
    }

    pub fn successors(&self, node: &GraphNode) -> &[GraphNode] {
        self.successors
            .get(node)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All nodes, root first, then by identity.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.successors.keys()
    }

    pub fn contains(&self, node: &GraphNode) -> bool {
        self.successors.contains_key(node)
    }
}

/// Output of the resolution phase.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// One entry per repository reachable from the root, sorted by identity.
    pub repositories: Vec<ResolvedRepository>,
    pub graph: DependencyGraph,
}

impl Resolution {
    pub fn get(&self, identity: &RepositoryIdentity) -> Option<&ResolvedRepository> {
        self.repositories
            .binary_search_by(|repo| repo.identity.cmp(identity))
            .ok()
            .map(|index| &self.repositories[index])
    }
}

/// Shared flag that stops new units of work from being started.
///
/// In-flight Repository Handle calls are never interrupted; workers check the
/// flag before they begin a unit.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Builds the bounded worker pool used by discovery and synchronization.
pub fn worker_pool(jobs: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .thread_name(|index| format!("gitdep-worker-{}", index))
        .build()
        .map_err(|e| Error::Config {
            message: format!("failed to start {} worker threads: {}", jobs, e),
        })
}
