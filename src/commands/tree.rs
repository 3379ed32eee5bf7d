//! # Tree Command Implementation
//!
//! This module implements the `tree` subcommand, which displays the resolved
//! dependency graph as a tree rooted at the workspace, with the resolved ref
//! and checkout path of every repository.
//!
//! A repository required by several dependents appears under each of them.
//! This command is a read-only operation that does not touch any work tree.

use std::borrow::Cow;

use anyhow::Result;
use clap::Args;
use ptree::{print_tree, TreeItem};

use gitdep::phases::{GraphNode, Resolution};

use super::Context;
use crate::cli::GlobalArgs;

/// Display the resolved dependency tree
#[derive(Args, Debug)]
pub struct TreeArgs {
    /// Maximum depth to display in the tree.
    ///
    /// If not specified, displays the full tree.
    /// Use 0 to show only the root, 1 to show direct dependencies, etc.
    #[arg(long, value_name = "NUM")]
    pub depth: Option<usize>,
}

/// Execute the `tree` command.
pub fn execute(args: TreeArgs, global: &GlobalArgs) -> Result<()> {
    let context = Context::new(global)?;
    let pool = context.pool()?;
    let plan = context.plan(&pool)?;

    let label = format!("{} (workspace)", context.workspace_root.display());
    let tree = build_tree_node(
        &plan.resolution,
        &GraphNode::Root,
        label,
        args.depth.unwrap_or(usize::MAX),
        0,
    );
    print_tree(&tree).map_err(|e| anyhow::anyhow!("Failed to display tree: {}", e))?;
    Ok(())
}

/// Builds the display tree below `node`. The graph is acyclic at this point.
fn build_tree_node(
    resolution: &Resolution,
    node: &GraphNode,
    label: String,
    max_depth: usize,
    current_depth: usize,
) -> TreeNode {
    if current_depth >= max_depth {
        return TreeNode {
            label,
            children: vec![],
        };
    }

    let children = resolution
        .graph
        .successors(node)
        .iter()
        .filter_map(|child| match child {
            GraphNode::Repository(identity) => resolution.get(identity),
            GraphNode::Root => None,
        })
        .map(|repository| {
            build_tree_node(
                resolution,
                &GraphNode::Repository(repository.identity.clone()),
                format!(
                    "{} @ {} -> {}",
                    repository.identity,
                    repository.r#ref,
                    repository.path.display()
                ),
                max_depth,
                current_depth + 1,
            )
        })
        .collect();
    TreeNode { label, children }
}

/// Tree node structure for ptree visualization
#[derive(Clone, Debug)]
struct TreeNode {
    label: String,
    children: Vec<TreeNode>,
}

impl TreeItem for TreeNode {
    type Child = TreeNode;

    fn write_self<W: std::io::Write>(
        &self,
        f: &mut W,
        _style: &ptree::Style,
    ) -> std::io::Result<()> {
        write!(f, "{}", self.label)
    }

    fn children(&self) -> Cow<'_, [Self::Child]> {
        Cow::Borrowed(&self.children)
    }
}
