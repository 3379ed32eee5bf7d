//! Phase 1: Discovery
//!
//! Starting from the root manifest, discovers the transitive dependency
//! graph by reading manifests out of repositories at the refs their
//! dependents require.
//!
//! ## Process
//!
//! 1.  **Worklist**: The root's declarations seed a worklist of
//!     `(identity, ref)` pairs. Expansion is breadth-first and level by
//!     level: every pair of one level is expanded in parallel on the worker
//!     pool, then the next level is assembled.
//!
//! 2.  **Expansion**: For each pair, the repository is fetched unless the
//!     ref already resolves in the local copy (at most once per run; a failed
//!     fetch is not repeated), its manifest is read at the required ref and parsed, and one
//!     edge is recorded per declared dependency. A missing manifest makes the
//!     pair a leaf; it is not an error.
//!
//! 3.  **Visited set**: A mutex-guarded set keyed by `(identity, ref)` (not
//!     identity alone) guarantees each pair is expanded at most once, even
//!     when the same repository is required at several refs. Cycles therefore
//!     terminate here and are reported later by the cycle detector.
//!
//! Failures are collected per pair and never stop sibling branches. Edges
//! are recorded in a stable order (frontier order, then declaration order),
//! so two runs over the same input produce the same raw graph.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::{debug, info};
use rayon::prelude::*;

use super::{Cancellation, GraphEdge, RawGraph};
use crate::error::{Error, Result};
use crate::identity::{RepositoryIdentity, Requester};
use crate::manifest::{self, DependencyReference, ManifestNode, DEFAULT_MANIFEST_NAME};
use crate::repository::RepositoryHandle;
use crate::retry::RetryPolicy;

/// Knobs for the discovery phase.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Manifest file name, relative to each repository root.
    pub manifest_name: PathBuf,
    pub retry: RetryPolicy,
    /// Fetch every repository once per run even if the required refs are
    /// already known locally.
    pub refresh: bool,
    pub cancellation: Cancellation,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            manifest_name: PathBuf::from(DEFAULT_MANIFEST_NAME),
            retry: RetryPolicy::default(),
            refresh: false,
            cancellation: Cancellation::new(),
        }
    }
}

type PairKey = (RepositoryIdentity, String);

#[derive(Debug, Default)]
enum FetchState {
    #[default]
    Pending,
    Fetched,
    Failed(String),
}

/// Serializes fetches per identity and remembers their outcome.
#[derive(Default)]
struct FetchGate {
    slots: Mutex<HashMap<RepositoryIdentity, Arc<Mutex<FetchState>>>>,
}

impl FetchGate {
    /// Makes `ref` of `identity` available locally. A repository is fetched
    /// only when it is absent, when `ref` does not resolve in the local copy,
    /// or when a refresh was requested; at most once per run either way.
    fn ensure(
        &self,
        identity: &RepositoryIdentity,
        r#ref: &str,
        handle: &dyn RepositoryHandle,
        options: &DiscoveryOptions,
    ) -> Result<()> {
        let slot = {
            let mut slots = self.slots.lock().map_err(|_| Error::LockPoisoned {
                context: "fetch slots".to_string(),
            })?;
            slots.entry(identity.clone()).or_default().clone()
        };

        let mut state = slot.lock().map_err(|_| Error::LockPoisoned {
            context: format!("fetch slot for {}", identity),
        })?;
        match &*state {
            FetchState::Fetched => return Ok(()),
            FetchState::Failed(message) => {
                return Err(Error::RepositoryUnavailable {
                    identity: identity.clone(),
                    operation: "fetch".to_string(),
                    message: message.clone(),
                })
            }
            FetchState::Pending => {}
        }

        if !options.refresh && handle.is_present(identity) {
            match handle.resolve_ref(identity, r#ref) {
                Ok(_) => {
                    debug!("{}@{} known locally, not fetching", identity, r#ref);
                    return Ok(());
                }
                Err(e) => debug!("{}@{} not usable locally ({}), fetching", identity, r#ref, e),
            }
        }

        info!("fetching {}", identity);
        match options
            .retry
            .run(&format!("fetch {}", identity), || handle.fetch(identity))
        {
            Ok(()) => {
                *state = FetchState::Fetched;
                Ok(())
            }
            Err(e) => {
                *state = FetchState::Failed(failure_message(&e));
                Err(e)
            }
        }
    }
}

fn failure_message(error: &Error) -> String {
    match error {
        Error::RepositoryUnavailable { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Shared state of one discovery run.
struct Discovery<'a> {
    handle: &'a dyn RepositoryHandle,
    options: &'a DiscoveryOptions,
    visited: Mutex<HashSet<PairKey>>,
    fetches: FetchGate,
    root_identity: Option<&'a RepositoryIdentity>,
}

impl<'a> Discovery<'a> {
    /// Marks a pair as visited; true when this caller claimed it first.
    fn claim(&self, dependency: &DependencyReference) -> Result<bool> {
        let mut visited = self.visited.lock().map_err(|_| Error::LockPoisoned {
            context: "visited set".to_string(),
        })?;
        Ok(visited.insert((dependency.identity.clone(), dependency.r#ref.clone())))
    }

    fn is_root(&self, identity: &RepositoryIdentity) -> bool {
        self.root_identity == Some(identity)
    }

    /// Expands one pair: fetch, read the manifest, parse it, and claim the
    /// children that nobody has claimed yet.
    fn expand(&self, dependency: &DependencyReference) -> Result<(ManifestNode, Vec<PairKey>)> {
        if self.options.cancellation.is_cancelled() {
            return Err(Error::Cancelled {
                context: format!("discovery of {}@{}", dependency.identity, dependency.r#ref),
            });
        }

        let identity = &dependency.identity;
        let owner = Requester::dependency(identity.clone(), dependency.r#ref.as_str());
        self.fetches
            .ensure(identity, &dependency.r#ref, self.handle, self.options)?;

        let content = self.options.retry.run(&format!("read manifest of {}", owner), || {
            self.handle
                .read_file_at_ref(identity, &dependency.r#ref, &self.options.manifest_name)
        })?;

        let node = match content {
            Some(bytes) => manifest::parse_bytes(&bytes, &owner)?,
            None => {
                debug!("{} has no manifest, treating as leaf", owner);
                ManifestNode::leaf(owner)
            }
        };

        let mut claimed = Vec::new();
        for child in &node.dependencies {
            if !self.is_root(&child.identity) && self.claim(child)? {
                claimed.push((child.identity.clone(), child.r#ref.clone()));
            }
        }
        Ok((node, claimed))
    }
}

/// Executes Phase 1: discover the raw dependency graph below `root`.
///
/// `root_identity` is the identity of the repository owning the root
/// manifest, when known; dependencies on it become edges to the root and are
/// never expanded.
pub fn discover(
    root: &ManifestNode,
    root_identity: Option<&RepositoryIdentity>,
    handle: &dyn RepositoryHandle,
    pool: &rayon::ThreadPool,
    options: &DiscoveryOptions,
) -> RawGraph {
    let discovery = Discovery {
        handle,
        options,
        visited: Mutex::new(HashSet::new()),
        fetches: FetchGate::default(),
        root_identity,
    };
    let mut graph = RawGraph {
        root_identity: root_identity.cloned(),
        ..RawGraph::default()
    };

    let mut frontier = Vec::new();
    for dependency in &root.dependencies {
        graph.edges.push(GraphEdge {
            from: Requester::Root,
            to: dependency.clone(),
        });
        if discovery.is_root(&dependency.identity) {
            continue;
        }
        match discovery.claim(dependency) {
            Ok(true) => frontier.push(dependency.clone()),
            Ok(false) => {}
            Err(e) => graph.errors.push(e),
        }
    }

    let mut level = 0;
    while !frontier.is_empty() {
        if options.cancellation.is_cancelled() {
            graph.errors.push(Error::Cancelled {
                context: format!("discovery stopped at depth {}", level + 1),
            });
            break;
        }
        level += 1;
        debug!("discovery level {}: {} expansion(s)", level, frontier.len());

        let results: Vec<_> = pool.install(|| {
            frontier
                .par_iter()
                .map(|dependency| discovery.expand(dependency))
                .collect()
        });

        let mut next = Vec::new();
        for (dependency, result) in frontier.iter().zip(results) {
            let requester = Requester::dependency(dependency.identity.clone(), dependency.r#ref.as_str());
            match result {
                Ok((node, claimed)) => {
                    let mut claimed: HashSet<PairKey> = claimed.into_iter().collect();
                    for child in node.dependencies {
                        let key = (child.identity.clone(), child.r#ref.clone());
                        if claimed.remove(&key) {
                            next.push(child.clone());
                        }
                        graph.edges.push(GraphEdge {
                            from: requester.clone(),
                            to: child,
                        });
                    }
                    graph.expanded.push(requester);
                }
                Err(e) => graph.errors.push(Error::Discovery {
                    requester,
                    source: Box::new(e),
                }),
            }
        }
        frontier = next;
    }

    info!(
        "discovered {} edge(s) from {} expansion(s)",
        graph.edges.len(),
        graph.expanded.len()
    );
    graph
}
