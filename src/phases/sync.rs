//! Phase 5: Synchronization
//!
//! Brings every work tree in the layout to its resolved commit.
//!
//! ## Process
//!
//! 1.  **Waves**: Repositories are grouped by layout nesting depth. Waves run
//!     one after another so a parent directory's repository exists before a
//!     nested one is cloned into it; repositories within a wave run in
//!     parallel on the worker pool.
//!
//! 2.  **Per repository**: the checked-out commit is compared with the
//!     resolved commit. No work tree means clone then checkout; a different
//!     commit means fetch then checkout; the same commit means nothing is
//!     done, which makes a second run free of fetches and checkouts.
//!
//! 3.  **Failures**: a failed repository never stops unrelated ones. Nested
//!     repositories below a failed one are skipped. With `fail_fast`, the
//!     first failure cancels work that has not started yet.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};

use log::{debug, info, warn};
use rayon::prelude::*;

use super::layout::WorkspaceLayout;
use super::{Cancellation, Resolution, ResolvedRepository};
use crate::error::{Error, Result};
use crate::identity::RepositoryIdentity;
use crate::repository::{CommitId, RepositoryHandle};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub retry: RetryPolicy,
    /// Plan only; never clone, fetch or check out.
    pub dry_run: bool,
    /// Cancel remaining work after the first failure.
    pub fail_fast: bool,
    pub cancellation: Cancellation,
}

/// What happened to one repository.
#[derive(Debug)]
pub enum SyncAction {
    Cloned,
    Updated { from: CommitId },
    UpToDate,
    WouldClone,
    WouldUpdate { from: CommitId },
    Failed(Error),
    Skipped { reason: String },
}

impl SyncAction {
    pub fn is_failure(&self) -> bool {
        matches!(self, SyncAction::Failed(_) | SyncAction::Skipped { .. })
    }

    /// Short label for reports.
    pub fn label(&self) -> &'static str {
        match self {
            SyncAction::Cloned => "cloned",
            SyncAction::Updated { .. } => "updated",
            SyncAction::UpToDate => "up to date",
            SyncAction::WouldClone => "would clone",
            SyncAction::WouldUpdate { .. } => "would update",
            SyncAction::Failed(_) => "failed",
            SyncAction::Skipped { .. } => "skipped",
        }
    }
}

#[derive(Debug)]
pub struct RepositoryOutcome {
    pub identity: RepositoryIdentity,
    pub path: PathBuf,
    pub r#ref: String,
    pub commit: CommitId,
    pub action: SyncAction,
}

/// Per-repository outcomes in topological order.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub outcomes: Vec<RepositoryOutcome>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|outcome| !outcome.action.is_failure())
    }

    pub fn get(&self, identity: &RepositoryIdentity) -> Option<&RepositoryOutcome> {
        self.outcomes
            .iter()
            .find(|outcome| &outcome.identity == identity)
    }

    /// Number of outcomes with the given label.
    pub fn count(&self, label: &str) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.action.label() == label)
            .count()
    }

    /// Turns failures into one collected error; skipped repositories count
    /// as failures too.
    pub fn into_result(self) -> Result<()> {
        let errors = self
            .outcomes
            .into_iter()
            .filter_map(|outcome| match outcome.action {
                SyncAction::Failed(error) => Some(error),
                SyncAction::Skipped { reason } => Some(Error::Cancelled {
                    context: format!("{} skipped: {}", outcome.identity, reason),
                }),
                _ => None,
            })
            .collect();
        Error::from_collected(errors)
    }
}

/// Observer for synchronization progress. Called from worker threads.
pub trait SyncProgress: Sync {
    fn started(&self, _total: usize) {}
    fn repository_started(&self, _identity: &RepositoryIdentity) {}
    fn repository_finished(&self, _outcome: &RepositoryOutcome) {}
    fn finished(&self) {}
}

impl SyncProgress for () {}

/// Mutual exclusion per work-tree path.
#[derive(Default)]
struct PathLocks {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

struct PathGuard<'a> {
    locks: &'a PathLocks,
    path: PathBuf,
}

impl PathLocks {
    fn lock(&self, path: &Path) -> Result<PathGuard<'_>> {
        let poisoned = || Error::LockPoisoned {
            context: format!("path lock for {}", path.display()),
        };
        let mut held = self.held.lock().map_err(|_| poisoned())?;
        while held.contains(path) {
            held = self.released.wait(held).map_err(|_| poisoned())?;
        }
        held.insert(path.to_path_buf());
        Ok(PathGuard {
            locks: self,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut held) = self.locks.held.lock() {
            held.remove(&self.path);
        }
        self.locks.released.notify_all();
    }
}

struct Synchronizer<'a> {
    handle: &'a dyn RepositoryHandle,
    layout: &'a WorkspaceLayout,
    options: &'a SyncOptions,
    progress: &'a dyn SyncProgress,
    locks: PathLocks,
}

impl<'a> Synchronizer<'a> {
    fn retry<T>(&self, description: String, op: impl FnMut() -> Result<T>) -> Result<T> {
        self.options.retry.run(&description, op)
    }

    /// Moves one work tree to its resolved commit.
    fn materialize(&self, repository: &ResolvedRepository, path: &Path) -> Result<SyncAction> {
        let identity = &repository.identity;
        let handle = self.handle;
        let _guard = self.locks.lock(path)?;

        let current = self.retry(format!("read HEAD of {}", identity), || {
            handle.current_checked_out_ref(identity, path)
        })?;

        match current {
            None if self.options.dry_run => Ok(SyncAction::WouldClone),
            None => {
                info!("cloning {} into {}", identity, path.display());
                self.retry(format!("clone {}", identity), || {
                    handle.clone_into(identity, path)
                })?;
                self.checkout(repository, path)?;
                Ok(SyncAction::Cloned)
            }
            Some(commit) if commit == repository.commit => {
                debug!("{} already at {}", identity, commit.short());
                Ok(SyncAction::UpToDate)
            }
            Some(from) if self.options.dry_run => Ok(SyncAction::WouldUpdate { from }),
            Some(from) => {
                info!(
                    "updating {} from {} to {}",
                    identity,
                    from.short(),
                    repository.commit.short()
                );
                self.retry(format!("fetch {} into work tree", identity), || {
                    handle.fetch_into(identity, path)
                })?;
                self.checkout(repository, path)?;
                Ok(SyncAction::Updated { from })
            }
        }
    }

    fn checkout(&self, repository: &ResolvedRepository, path: &Path) -> Result<()> {
        let handle = self.handle;
        self.retry(
            format!("checkout {}@{}", repository.identity, repository.r#ref),
            || handle.checkout(&repository.identity, path, &repository.commit),
        )
    }

    fn sync_one(
        &self,
        repository: &ResolvedRepository,
        failed: &HashSet<RepositoryIdentity>,
    ) -> RepositoryOutcome {
        let identity = &repository.identity;
        let path = self
            .layout
            .path_of(identity)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.layout.root().join(&repository.path));

        let action = match self.layout.parent_of(identity) {
            Some(parent) if failed.contains(parent) => SyncAction::Skipped {
                reason: format!("enclosing repository {} failed", parent),
            },
            _ if self.options.cancellation.is_cancelled() => SyncAction::Skipped {
                reason: "cancelled".to_string(),
            },
            _ => {
                self.progress.repository_started(identity);
                match self.materialize(repository, &path) {
                    Ok(action) => action,
                    Err(e) => {
                        warn!("{}: {}", identity, e);
                        if self.options.fail_fast {
                            self.options.cancellation.cancel();
                        }
                        SyncAction::Failed(e)
                    }
                }
            }
        };

        let outcome = RepositoryOutcome {
            identity: identity.clone(),
            path,
            r#ref: repository.r#ref.clone(),
            commit: repository.commit.clone(),
            action,
        };
        self.progress.repository_finished(&outcome);
        outcome
    }
}

/// Executes Phase 5: synchronize the workspace.
///
/// `order` is the topological order from cycle detection; it decides the
/// order of the report and of repositories within one wave. Repositories
/// missing from `order` are appended in identity order.
pub fn synchronize(
    resolution: &Resolution,
    layout: &WorkspaceLayout,
    order: &[RepositoryIdentity],
    handle: &dyn RepositoryHandle,
    pool: &rayon::ThreadPool,
    options: &SyncOptions,
    progress: &dyn SyncProgress,
) -> SyncReport {
    let mut full_order: Vec<RepositoryIdentity> = order
        .iter()
        .filter(|identity| resolution.get(identity).is_some())
        .cloned()
        .collect();
    for repository in &resolution.repositories {
        if !full_order.contains(&repository.identity) {
            full_order.push(repository.identity.clone());
        }
    }

    let synchronizer = Synchronizer {
        handle,
        layout,
        options,
        progress,
        locks: PathLocks::default(),
    };
    progress.started(full_order.len());

    let mut failed: HashSet<RepositoryIdentity> = HashSet::new();
    let mut outcomes: HashMap<RepositoryIdentity, RepositoryOutcome> = HashMap::new();
    for (depth, wave) in layout.waves(&full_order).into_iter().enumerate() {
        debug!("synchronization wave {}: {} repositories", depth, wave.len());
        let repositories: Vec<&ResolvedRepository> = wave
            .iter()
            .filter_map(|identity| resolution.get(identity))
            .collect();

        let wave_outcomes: Vec<RepositoryOutcome> = pool.install(|| {
            repositories
                .par_iter()
                .map(|repository| synchronizer.sync_one(repository, &failed))
                .collect()
        });

        for outcome in wave_outcomes {
            if outcome.action.is_failure() {
                failed.insert(outcome.identity.clone());
            }
            outcomes.insert(outcome.identity.clone(), outcome);
        }
    }
    progress.finished();

    let report = SyncReport {
        outcomes: full_order
            .iter()
            .filter_map(|identity| outcomes.remove(identity))
            .collect(),
    };
    info!(
        "synchronized {} repositories ({} failed)",
        report.outcomes.len(),
        report
            .outcomes
            .iter()
            .filter(|outcome| outcome.action.is_failure())
            .count()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Requester;
    use crate::phases::{worker_pool, DependencyGraph};
    use crate::repository::memory::{InMemoryRepositories, Operation};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn url(name: &str) -> String {
        format!("https://github.com/acme/{}", name)
    }

    fn identity(name: &str) -> RepositoryIdentity {
        RepositoryIdentity::parse(&url(name)).unwrap()
    }

    /// One repository per `(name, path, commit)`, each with commits c1 <- c2.
    fn fixture(entries: &[(&str, &str, &str)]) -> (InMemoryRepositories, Resolution) {
        let repos = InMemoryRepositories::new();
        let mut repositories = Vec::new();
        for (name, path, commit) in entries {
            repos.add_commit(&url(name), "c1", &[], &[]).unwrap();
            repos.add_commit(&url(name), "c2", &["c1"], &[]).unwrap();
            repositories.push(ResolvedRepository {
                identity: identity(name),
                r#ref: commit.to_string(),
                commit: CommitId::new(*commit),
                path: PathBuf::from(path),
                requesters: vec![Requester::Root],
            });
        }
        repositories.sort_by(|a, b| a.identity.cmp(&b.identity));
        (
            repos,
            Resolution {
                repositories,
                graph: DependencyGraph::new(),
            },
        )
    }

    fn options() -> SyncOptions {
        SyncOptions {
            retry: RetryPolicy {
                attempts: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
            },
            ..SyncOptions::default()
        }
    }

    fn run(
        repos: &InMemoryRepositories,
        resolution: &Resolution,
        order: &[RepositoryIdentity],
        options: &SyncOptions,
    ) -> SyncReport {
        let layout = WorkspaceLayout::build(Path::new("/ws"), resolution).unwrap();
        let pool = worker_pool(4).unwrap();
        synchronize(resolution, &layout, order, repos, &pool, options, &())
    }

    #[test]
    fn test_fresh_workspace_is_cloned_and_checked_out() {
        let (repos, resolution) = fixture(&[("x", "x", "c1"), ("y", "y", "c2")]);
        let order = vec![identity("y"), identity("x")];

        let report = run(&repos, &resolution, &order, &options());

        assert!(report.is_success());
        assert_eq!(report.outcomes[0].identity, identity("y"));
        assert_eq!(report.count("cloned"), 2);
        assert_eq!(
            repos.work_tree_head(Path::new("/ws/x")),
            Some(CommitId::new("c1"))
        );
        assert_eq!(repos.count(Operation::Clone), 2);
        assert_eq!(repos.count(Operation::Checkout), 2);
        assert_eq!(repos.count(Operation::FetchInto), 0);
    }

    #[test]
    fn test_second_run_performs_no_mutations() {
        let (repos, resolution) = fixture(&[("x", "x", "c1"), ("y", "y", "c2")]);
        let order = vec![identity("x"), identity("y")];
        run(&repos, &resolution, &order, &options());
        repos.clear_calls();

        let report = run(&repos, &resolution, &order, &options());
        assert_eq!(report.count("up to date"), 2);
        assert_eq!(repos.mutating_calls(), 0);
    }

    #[test]
    fn test_changed_commit_is_fetched_and_checked_out() {
        let (repos, resolution) = fixture(&[("x", "x", "c1")]);
        let order = vec![identity("x")];
        run(&repos, &resolution, &order, &options());

        let (_, mut moved) = fixture(&[("x", "x", "c2")]);
        moved.repositories[0].r#ref = "main".to_string();
        repos.clear_calls();
        let report = run(&repos, &moved, &order, &options());

        assert!(matches!(
            &report.outcomes[0].action,
            SyncAction::Updated { from } if from.as_str() == "c1"
        ));
        assert_eq!(repos.count(Operation::FetchInto), 1);
        assert_eq!(repos.count(Operation::Clone), 0);
        assert_eq!(
            repos.work_tree_head(Path::new("/ws/x")),
            Some(CommitId::new("c2"))
        );
    }

    #[test]
    fn test_dry_run_plans_without_mutating() {
        let (repos, resolution) = fixture(&[("x", "x", "c1")]);
        let options = SyncOptions {
            dry_run: true,
            ..options()
        };
        let report = run(&repos, &resolution, &[identity("x")], &options);

        assert!(matches!(report.outcomes[0].action, SyncAction::WouldClone));
        assert_eq!(repos.mutating_calls(), 0);
    }

    #[test]
    fn test_failure_does_not_stop_independent_repositories() {
        let (repos, resolution) = fixture(&[("x", "x", "c1"), ("y", "y", "c1")]);
        repos.fail_next(&url("x"), Operation::Clone, 5).unwrap();

        let report = run(&repos, &resolution, &[identity("x"), identity("y")], &options());

        assert!(!report.is_success());
        assert!(matches!(
            report.get(&identity("x")).unwrap().action,
            SyncAction::Failed(Error::RepositoryUnavailable { .. })
        ));
        assert!(matches!(
            report.get(&identity("y")).unwrap().action,
            SyncAction::Cloned
        ));
        // retried once
        assert_eq!(repos.count(Operation::Clone), 3);
        assert!(report.into_result().is_err());
    }

    #[test]
    fn test_nested_repository_waits_for_parent_and_skips_on_failure() {
        let (repos, resolution) = fixture(&[("outer", "outer", "c1"), ("inner", "outer/inner", "c1")]);
        repos.fail_next(&url("outer"), Operation::Clone, 5).unwrap();

        let report = run(&repos, &resolution, &[identity("inner"), identity("outer")], &options());

        match &report.get(&identity("inner")).unwrap().action {
            SyncAction::Skipped { reason } => assert!(reason.contains("github.com/acme/outer")),
            other => panic!("expected skip, got {:?}", other),
        }
        assert!(repos
            .calls()
            .iter()
            .all(|call| call.identity != "github.com/acme/inner"));
    }

    #[test]
    fn test_fail_fast_cancels_later_waves() {
        let entries = [("bad", "bad", "c1"), ("host", "host", "c1"), ("guest", "host/guest", "c1")];
        let order = vec![identity("bad"), identity("host"), identity("guest")];

        let (repos, resolution) = fixture(&entries);
        repos.fail_next(&url("bad"), Operation::Clone, 5).unwrap();
        let report = run(&repos, &resolution, &order, &options());
        assert!(matches!(report.get(&identity("guest")).unwrap().action, SyncAction::Cloned));

        let (repos, resolution) = fixture(&entries);
        repos.fail_next(&url("bad"), Operation::Clone, 5).unwrap();
        let options = SyncOptions {
            fail_fast: true,
            ..options()
        };
        let report = run(&repos, &resolution, &order, &options);
        assert!(options.cancellation.is_cancelled());
        assert!(matches!(
            report.get(&identity("guest")).unwrap().action,
            SyncAction::Skipped { .. }
        ));
        assert!(repos
            .calls()
            .iter()
            .all(|call| call.identity != "github.com/acme/guest"));
    }

    #[test]
    fn test_progress_observer_sees_every_repository() {
        #[derive(Default)]
        struct Counter {
            finished: AtomicUsize,
        }
        impl SyncProgress for Counter {
            fn repository_finished(&self, _outcome: &RepositoryOutcome) {
                self.finished.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (repos, resolution) = fixture(&[("x", "x", "c1"), ("y", "y", "c1"), ("z", "z", "c1")]);
        let layout = WorkspaceLayout::build(Path::new("/ws"), &resolution).unwrap();
        let pool = worker_pool(2).unwrap();
        let counter = Counter::default();
        synchronize(&resolution, &layout, &[], &repos, &pool, &options(), &counter);
        assert_eq!(counter.finished.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_path_locks_release_on_drop() {
        let locks = PathLocks::default();
        {
            let _guard = locks.lock(Path::new("/ws/x")).unwrap();
            assert!(locks.held.lock().unwrap().contains(Path::new("/ws/x")));
        }
        assert!(locks.held.lock().unwrap().is_empty());
        let _again = locks.lock(Path::new("/ws/x")).unwrap();
    }
}
