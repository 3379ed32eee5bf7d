//! Shared test utilities for integration and E2E tests.
//!
//! This module provides workspace fixtures and helpers that build small local
//! git repositories, so end-to-end tests never touch the network.
//!
//! ## Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     let upstream = UpstreamSet::new();
//!     let lib = upstream.repository("lib").commit("v1", &[]);
//!     let fixture = TestFixture::new().with_manifest(&format!("{} v1\n", lib.url()));
//!     fixture.command().arg("sync").assert().success();
//! }
//! ```

use assert_fs::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use assert_fs::TempDir;
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::{git_available, UpstreamRepository, UpstreamSet};
    pub use super::TestFixture;
}

/// Returns `true` when a `git` binary can be run.
#[allow(dead_code)]
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args(["-c", "user.name=gitdep", "-c", "user.email=gitdep@example.com"])
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A directory holding upstream repositories for one test.
pub struct UpstreamSet {
    temp_dir: assert_fs::TempDir,
}

impl UpstreamSet {
    pub fn new() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Initializes an empty repository named `name` with `main` as HEAD.
    pub fn repository(&self, name: &str) -> UpstreamRepository {
        let path = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&path).expect("Failed to create repository directory");
        git(&path, &["init", "--quiet"]);
        git(&path, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        UpstreamRepository { path }
    }
}

impl Default for UpstreamSet {
    fn default() -> Self {
        Self::new()
    }
}

/// A local repository dependencies can point at by absolute path.
pub struct UpstreamRepository {
    path: PathBuf,
}

#[allow(dead_code)]
impl UpstreamRepository {
    /// The spelling used in manifests.
    pub fn url(&self) -> String {
        self.path.display().to_string()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Commits `files` on the current branch and tags the commit `tag`.
    pub fn commit(self, tag: &str, files: &[(&str, &str)]) -> Self {
        self.commit_untagged(tag, files);
        git(&self.path, &["tag", tag]);
        self
    }

    /// Commits `files` with `message` and returns the new commit id.
    pub fn commit_untagged(&self, message: &str, files: &[(&str, &str)]) -> String {
        for (name, content) in files {
            let file = self.path.join(name);
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent).expect("Failed to create directory");
            }
            std::fs::write(&file, content).expect("Failed to write file");
        }
        git(&self.path, &["add", "--all"]);
        git(
            &self.path,
            &["commit", "--quiet", "--allow-empty", "-m", message],
        );
        self.rev_parse("HEAD")
    }

    /// Starts a branch at the current commit.
    pub fn branch(&self, name: &str) {
        git(&self.path, &["branch", name]);
    }

    /// Switches the upstream work tree to `branch`.
    pub fn switch(&self, branch: &str) {
        git(&self.path, &["checkout", "--quiet", branch]);
    }

    pub fn rev_parse(&self, rev: &str) -> String {
        git(&self.path, &["rev-parse", rev])
    }
}

/// Reads the checked-out commit of a work tree.
#[allow(dead_code)]
pub fn head_of(work_tree: &Path) -> String {
    git(work_tree, &["rev-parse", "HEAD"])
}

/// A workspace directory holding the root manifest.
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
    cache_dir: assert_fs::TempDir,
}

impl TestFixture {
    /// Create a new test fixture with an empty workspace and mirror cache.
    pub fn new() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
            cache_dir: assert_fs::TempDir::new().expect("Failed to create cache directory"),
        }
    }

    /// Write the root `.gitdeps` manifest.
    pub fn with_manifest(self, content: &str) -> Self {
        self.with_file(".gitdeps", content)
    }

    /// Write a `gitdep.yaml` settings file.
    #[allow(dead_code)]
    pub fn with_settings(self, content: &str) -> Self {
        self.with_file("gitdep.yaml", content)
    }

    /// Add a file with the given path and content.
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.temp_dir
            .child(path)
            .write_str(content)
            .expect("Failed to write file");
        self
    }

    /// Get the path to the workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    #[allow(dead_code)]
    pub fn child(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child(path)
    }

    /// Create a command running in this workspace with a private mirror cache.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("gitdep");
        cmd.current_dir(self.path())
            .env("GITDEP_CACHE", self.cache_dir.path())
            .env_remove("GITDEP_WORKSPACE")
            .env_remove("GITDEP_JOBS")
            .env("NO_COLOR", "1");
        cmd
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
