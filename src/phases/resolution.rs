//! Phase 2: Resolution
//!
//! Collapses the raw multigraph into one target ref per repository.
//!
//! Edges are grouped by target identity in discovery order. A group whose
//! edges all agree on one ref resolves trivially. When refs disagree, the
//! configured `ConflictPolicy` decides:
//!
//! - `Ancestor`: the first candidate ref (in discovery order) that every other
//!   candidate is an ancestor-or-equal of wins.
//! - `Strict`: any disagreement between commits is a conflict.
//!
//! Once refs are chosen, edges contributed by expansions of refs that lost
//! (and of repositories no longer reachable from the root) are pruned, and
//! resolution is repeated until the edge set stops shrinking. Only the errors
//! of the final round are reported, all of them together.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{DependencyGraph, GraphEdge, GraphNode, RawGraph, Resolution, ResolvedRepository};
use crate::error::{Error, Result};
use crate::identity::{RepositoryIdentity, Requester};
use crate::repository::{CommitId, RepositoryHandle};
use crate::retry::RetryPolicy;

/// How disagreeing refs for one repository are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// The most-descendant ref wins when the others are its ancestors.
    #[default]
    Ancestor,
    /// Every disagreement is a conflict.
    Strict,
}

impl FromStr for ConflictPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ancestor" => Ok(ConflictPolicy::Ancestor),
            "strict" => Ok(ConflictPolicy::Strict),
            other => Err(Error::Config {
                message: format!(
                    "unknown conflict policy '{}' (expected 'ancestor' or 'strict')",
                    other
                ),
            }),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::Ancestor => f.write_str("ancestor"),
            ConflictPolicy::Strict => f.write_str("strict"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolutionOptions {
    pub policy: ConflictPolicy,
    pub retry: RetryPolicy,
}

/// Memoized repository history answers, shared by every round.
struct History<'a> {
    handle: &'a dyn RepositoryHandle,
    retry: RetryPolicy,
    commits: HashMap<(RepositoryIdentity, String), CommitId>,
    ancestry: HashMap<(RepositoryIdentity, CommitId, CommitId), bool>,
}

impl<'a> History<'a> {
    fn commit(&mut self, identity: &RepositoryIdentity, r#ref: &str) -> Result<CommitId> {
        let key = (identity.clone(), r#ref.to_string());
        if let Some(commit) = self.commits.get(&key) {
            return Ok(commit.clone());
        }
        let handle = self.handle;
        let commit = self
            .retry
            .run(&format!("resolve {}@{}", identity, r#ref), || {
                handle.resolve_ref(identity, r#ref)
            })?;
        debug!("{}@{} is {}", identity, r#ref, commit.short());
        self.commits.insert(key, commit.clone());
        Ok(commit)
    }

    /// Commit of a ref, if it was already looked up.
    fn known_commit(&self, identity: &RepositoryIdentity, r#ref: &str) -> Option<&CommitId> {
        self.commits.get(&(identity.clone(), r#ref.to_string()))
    }

    fn is_ancestor(
        &mut self,
        identity: &RepositoryIdentity,
        ancestor: &CommitId,
        descendant: &CommitId,
    ) -> Result<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        let key = (identity.clone(), ancestor.clone(), descendant.clone());
        if let Some(answer) = self.ancestry.get(&key) {
            return Ok(*answer);
        }
        let handle = self.handle;
        let answer = self
            .retry
            .run(&format!("ancestry check in {}", identity), || {
                handle.is_ancestor(identity, ancestor, descendant)
            })?;
        self.ancestry.insert(key, answer);
        Ok(answer)
    }
}

/// The edges targeting one identity, in discovery order.
struct Group<'g> {
    identity: &'g RepositoryIdentity,
    edges: Vec<&'g GraphEdge>,
}

impl<'g> Group<'g> {
    /// Distinct refs in first-seen order.
    fn candidates(&self) -> Vec<&'g str> {
        let mut refs: Vec<&'g str> = Vec::new();
        for edge in self.edges.iter().copied() {
            if !refs.contains(&edge.to.r#ref.as_str()) {
                refs.push(edge.to.r#ref.as_str());
            }
        }
        refs
    }

    fn requests(&self) -> Vec<(Requester, String)> {
        self.edges
            .iter()
            .map(|edge| (edge.from.clone(), edge.to.r#ref.clone()))
            .collect()
    }

    fn requesters(&self) -> Vec<Requester> {
        let mut requesters = Vec::new();
        for edge in &self.edges {
            if !requesters.contains(&edge.from) {
                requesters.push(edge.from.clone());
            }
        }
        requesters
    }

    /// The explicit checkout path all requesters agree on, the default path
    /// when none declares one, or a conflict.
    fn checkout_path(&self) -> Result<PathBuf> {
        let explicit: Vec<(Requester, PathBuf)> = self
            .edges
            .iter()
            .filter_map(|edge| {
                edge.to
                    .path
                    .as_ref()
                    .map(|path| (edge.from.clone(), path.clone()))
            })
            .collect();

        match explicit.first() {
            None => Ok(self.identity.default_checkout_path()),
            Some((_, first)) if explicit.iter().all(|(_, path)| path == first) => Ok(first.clone()),
            Some(_) => Err(Error::ConflictingCheckoutPath {
                identity: self.identity.clone(),
                paths: explicit,
            }),
        }
    }
}

struct Choice {
    r#ref: String,
    commit: CommitId,
}

struct Round {
    resolved: BTreeMap<RepositoryIdentity, ResolvedRepository>,
    /// Identities whose ref could not be chosen; their edges are never pruned.
    undecided: HashSet<RepositoryIdentity>,
    errors: Vec<Error>,
}

fn group_edges<'g>(edges: &[&'g GraphEdge], raw: &RawGraph) -> Vec<Group<'g>> {
    let mut index: HashMap<&'g RepositoryIdentity, usize> = HashMap::new();
    let mut groups: Vec<Group<'g>> = Vec::new();
    for edge in edges.iter().copied() {
        if raw.targets_root(edge) {
            continue;
        }
        let identity = &edge.to.identity;
        match index.get(identity) {
            Some(&position) => groups[position].edges.push(edge),
            None => {
                index.insert(identity, groups.len());
                groups.push(Group {
                    identity,
                    edges: vec![edge],
                });
            }
        }
    }
    groups
}

fn choose(group: &Group<'_>, history: &mut History<'_>, policy: ConflictPolicy) -> Result<Choice> {
    let identity = group.identity;
    let mut candidates = Vec::new();
    for r#ref in group.candidates() {
        let commit = history.commit(identity, r#ref)?;
        candidates.push((r#ref, commit));
    }

    let (first_ref, first_commit) = &candidates[0];
    if candidates.iter().all(|(_, commit)| commit == first_commit) {
        return Ok(Choice {
            r#ref: first_ref.to_string(),
            commit: first_commit.clone(),
        });
    }

    if policy == ConflictPolicy::Ancestor {
        for (r#ref, commit) in &candidates {
            let mut dominates = true;
            for (_, other) in &candidates {
                if !history.is_ancestor(identity, other, commit)? {
                    dominates = false;
                    break;
                }
            }
            if dominates {
                debug!("{}: {} descends from every other requested ref", identity, r#ref);
                return Ok(Choice {
                    r#ref: r#ref.to_string(),
                    commit: commit.clone(),
                });
            }
        }
    }

    Err(Error::Conflict {
        identity: identity.clone(),
        conflicting_refs: group.requests(),
    })
}

fn resolve_round(
    edges: &[&GraphEdge],
    raw: &RawGraph,
    history: &mut History<'_>,
    policy: ConflictPolicy,
) -> Round {
    let mut round = Round {
        resolved: BTreeMap::new(),
        undecided: HashSet::new(),
        errors: Vec::new(),
    };

    for group in group_edges(edges, raw) {
        let identity = group.identity;
        let choice = match choose(&group, history, policy) {
            Ok(choice) => choice,
            Err(e) => {
                round.undecided.insert(identity.clone());
                round.errors.push(e);
                continue;
            }
        };
        let path = match group.checkout_path() {
            Ok(path) => path,
            Err(e) => {
                round.errors.push(e);
                identity.default_checkout_path()
            }
        };
        round.resolved.insert(
            identity.clone(),
            ResolvedRepository {
                identity: identity.clone(),
                r#ref: choice.r#ref,
                commit: choice.commit,
                path,
                requesters: group.requesters(),
            },
        );
    }
    round
}

/// Whether an expansion's edges still count after this round.
fn is_current(requester: &Requester, round: &Round, history: &History<'_>) -> bool {
    match requester {
        Requester::Root => true,
        Requester::Dependency { identity, r#ref } => {
            if round.undecided.contains(identity) {
                return true;
            }
            match round.resolved.get(identity) {
                Some(chosen) if &chosen.r#ref == r#ref => true,
                Some(chosen) => history.known_commit(identity, r#ref) == Some(&chosen.commit),
                None => false,
            }
        }
    }
}

/// Keeps only edges whose requester is reachable from the root.
fn reachable<'g>(edges: Vec<&'g GraphEdge>, raw: &RawGraph) -> Vec<&'g GraphEdge> {
    let mut seen: HashSet<&RepositoryIdentity> = HashSet::new();
    let mut queue: VecDeque<Option<&RepositoryIdentity>> = VecDeque::from([None]);
    while let Some(current) = queue.pop_front() {
        for edge in edges.iter().copied() {
            if edge.from.identity() != current || raw.targets_root(edge) {
                continue;
            }
            if seen.insert(&edge.to.identity) {
                queue.push_back(Some(&edge.to.identity));
            }
        }
    }

    edges
        .into_iter()
        .filter(|edge| match edge.from.identity() {
            None => true,
            Some(identity) => seen.contains(identity),
        })
        .collect()
}

/// Executes Phase 2: resolve the raw graph into one ref per repository.
pub fn resolve(
    raw: &RawGraph,
    handle: &dyn RepositoryHandle,
    options: &ResolutionOptions,
) -> Result<Resolution> {
    let mut history = History {
        handle,
        retry: options.retry,
        commits: HashMap::new(),
        ancestry: HashMap::new(),
    };
    let mut edges: Vec<&GraphEdge> = raw.edges.iter().collect();

    let (round, edges) = loop {
        let round = resolve_round(&edges, raw, &mut history, options.policy);
        let kept: Vec<&GraphEdge> = edges
            .iter()
            .copied()
            .filter(|edge| is_current(&edge.from, &round, &history))
            .collect();
        let kept = reachable(kept, raw);
        if kept.len() == edges.len() {
            break (round, edges);
        }
        debug!(
            "pruned {} stale edge(s), resolving again",
            edges.len() - kept.len()
        );
        edges = kept;
    };

    Error::from_collected(round.errors)?;

    let mut graph = DependencyGraph::new();
    for edge in &edges {
        let from = match edge.from.identity() {
            None => GraphNode::Root,
            Some(identity) => GraphNode::Repository(identity.clone()),
        };
        let to = if raw.targets_root(edge) {
            GraphNode::Root
        } else {
            GraphNode::Repository(edge.to.identity.clone())
        };
        graph.add_edge(from, to);
    }

    let repositories: Vec<ResolvedRepository> = round.resolved.into_values().collect();
    info!("resolved {} repositories", repositories.len());
    Ok(Resolution {
        repositories,
        graph,
    })
}
