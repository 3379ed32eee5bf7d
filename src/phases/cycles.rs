//! Phase 3: Cycle Detection
//!
//! Depth-first white/gray/black coloring over the identity-collapsed graph.
//! A back-edge to a gray node is a cycle; the members are reported in path
//! order starting at the node the back-edge returns to. Without cycles the
//! post-order of the traversal is a topological order with dependencies
//! before their dependents, which is the order synchronization reports in.

use std::collections::HashMap;

use log::debug;

use super::{DependencyGraph, GraphNode};
use crate::error::{Error, Result};
use crate::identity::RepositoryIdentity;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Executes Phase 3: reject cycles and return the repositories in
/// topological order (dependencies first).
///
/// Traversal starts at the root and follows successors in discovery order,
/// so the order is stable across runs on the same input.
pub fn detect(graph: &DependencyGraph) -> Result<Vec<RepositoryIdentity>> {
    let root = GraphNode::Root;
    let mut colors: HashMap<&GraphNode, Color> =
        graph.nodes().map(|node| (node, Color::White)).collect();
    let mut order = Vec::new();

    let starts = std::iter::once(&root).chain(graph.nodes());
    for start in starts {
        if colors.get(start).copied().unwrap_or(Color::White) != Color::White {
            continue;
        }

        // (node, index of the next successor to visit)
        let mut stack: Vec<(&GraphNode, usize)> = vec![(start, 0)];
        colors.insert(start, Color::Gray);

        while let Some((node, next)) = stack.last().copied() {
            let successors = graph.successors(node);
            if next == successors.len() {
                stack.pop();
                colors.insert(node, Color::Black);
                if let GraphNode::Repository(identity) = node {
                    order.push(identity.clone());
                }
                continue;
            }
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }

            let successor = &successors[next];
            match colors.get(successor).copied().unwrap_or(Color::White) {
                Color::White => {
                    colors.insert(successor, Color::Gray);
                    stack.push((successor, 0));
                }
                Color::Gray => {
                    let position = stack
                        .iter()
                        .position(|(member, _)| *member == successor)
                        .unwrap_or(0);
                    let identities = stack[position..]
                        .iter()
                        .map(|(member, _)| member.to_string())
                        .collect();
                    return Err(Error::Cycle { identities });
                }
                Color::Black => {}
            }
        }
    }

    debug!("topological order: {} repositories", order.len());
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(name: &str) -> GraphNode {
        GraphNode::Repository(
            RepositoryIdentity::parse(&format!("https://github.com/acme/{}", name)).unwrap(),
        )
    }

    fn names(order: &[RepositoryIdentity]) -> Vec<&str> {
        order.iter().map(|identity| identity.name()).collect()
    }

    #[test]
    fn test_topological_order_puts_dependencies_first() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(GraphNode::Root, repo("app"));
        graph.add_edge(repo("app"), repo("lib"));
        graph.add_edge(repo("app"), repo("proto"));
        graph.add_edge(repo("lib"), repo("proto"));

        let order = detect(&graph).unwrap();
        assert_eq!(names(&order), vec!["proto", "lib", "app"]);
    }

    #[test]
    fn test_cycle_through_root_lists_root_first() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(GraphNode::Root, repo("a"));
        graph.add_edge(repo("a"), repo("b"));
        graph.add_edge(repo("b"), GraphNode::Root);

        match detect(&graph) {
            Err(Error::Cycle { identities }) => assert_eq!(
                identities,
                vec!["root", "github.com/acme/a", "github.com/acme/b"]
            ),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_between_dependencies() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(GraphNode::Root, repo("a"));
        graph.add_edge(repo("a"), repo("b"));
        graph.add_edge(repo("b"), repo("c"));
        graph.add_edge(repo("c"), repo("b"));

        let error = detect(&graph).unwrap_err();
        assert_eq!(
            error.to_string(),
            "dependency cycle: github.com/acme/b -> github.com/acme/c -> github.com/acme/b"
        );
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(GraphNode::Root, repo("a"));
        graph.add_edge(repo("a"), repo("a"));
        assert!(matches!(detect(&graph), Err(Error::Cycle { identities }) if identities.len() == 1));
    }

    #[test]
    fn test_shared_dependency_is_not_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(GraphNode::Root, repo("a"));
        graph.add_edge(GraphNode::Root, repo("b"));
        graph.add_edge(repo("a"), repo("c"));
        graph.add_edge(repo("b"), repo("c"));

        let order = detect(&graph).unwrap();
        assert_eq!(names(&order), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_empty_graph() {
        assert!(detect(&DependencyGraph::new()).unwrap().is_empty());
    }
}
