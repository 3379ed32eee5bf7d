//! # Sync Command Implementation
//!
//! Builds, resolves and validates the dependency graph, then brings every
//! work tree in the workspace to its resolved commit. Resolution errors
//! (conflicts, cycles, layout collisions) abort before any work tree is
//! touched; synchronization failures are reported per repository and make
//! the command fail after every independent repository was attempted.

use anyhow::Result;
use clap::Args;

use gitdep::lockfile::{LockChange, Lockfile};
use gitdep::output::{describe_outcome, emoji, SyncProgressBar};
use gitdep::phases::orchestrator;

use super::Context;
use crate::cli::GlobalArgs;

/// Resolve the dependency graph and synchronize the workspace
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Print what would be cloned or updated without touching anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Stop starting new repositories after the first failure.
    #[arg(long)]
    pub fail_fast: bool,

    /// Only print errors.
    #[arg(short, long)]
    pub quiet: bool,

    /// Do not write the lockfile.
    #[arg(long)]
    pub no_lockfile: bool,
}

/// Execute the `sync` command.
pub fn execute(args: SyncArgs, global: &GlobalArgs) -> Result<()> {
    let mut context = Context::new(global)?;
    context.options.sync.dry_run = args.dry_run;
    context.options.sync.fail_fast = args.fail_fast;
    let out = &context.out;

    let pool = context.pool()?;
    let plan = context.plan(&pool)?;

    if !args.dry_run && !args.no_lockfile {
        let path = context.lockfile_path();
        let previous = Lockfile::load(&path)?;
        let lockfile = Lockfile::from_resolution(&plan.resolution);
        if lockfile.save(&path)? && !args.quiet {
            if let Some(previous) = previous {
                for change in lockfile.changes_since(&previous) {
                    println!("{}", describe_change(&change));
                }
            }
        }
    }

    let progress = SyncProgressBar::new(!args.quiet);
    let report = orchestrator::synchronize_plan(
        &plan,
        &context.handle,
        &pool,
        &context.options.sync,
        &progress,
    );

    if !args.quiet {
        for outcome in &report.outcomes {
            println!("{}", describe_outcome(out, outcome));
        }
        if report.is_success() {
            println!(
                "{} {} repositories {}",
                emoji(out, "✅", "[OK]"),
                report.outcomes.len(),
                if args.dry_run { "planned" } else { "in sync" }
            );
        }
    }

    report.into_result()?;
    Ok(())
}

fn describe_change(change: &LockChange) -> String {
    match change {
        LockChange::Added(repository) => {
            format!("lock: + {} @ {}", repository.identity, repository.r#ref)
        }
        LockChange::Removed(repository) => {
            format!("lock: - {} @ {}", repository.identity, repository.r#ref)
        }
        LockChange::Changed { before, after } => format!(
            "lock: ~ {} @ {} -> {}",
            after.identity, before.r#ref, after.r#ref
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitdep::lockfile::LockedRepository;
    use std::path::PathBuf;

    fn locked(r#ref: &str) -> LockedRepository {
        LockedRepository {
            identity: "github.com/acme/lib".to_string(),
            url: "https://github.com/acme/lib".to_string(),
            r#ref: r#ref.to_string(),
            commit: "c1".to_string(),
            path: PathBuf::from("lib"),
        }
    }

    #[test]
    fn test_describe_change() {
        assert_eq!(
            describe_change(&LockChange::Added(locked("v1"))),
            "lock: + github.com/acme/lib @ v1"
        );
        assert_eq!(
            describe_change(&LockChange::Changed {
                before: locked("v1"),
                after: locked("v2"),
            }),
            "lock: ~ github.com/acme/lib @ v1 -> v2"
        );
    }
}
