//! Thin wrappers around the system `git` binary.
//!
//! Using the system git means SSH keys, credential helpers, personal access
//! tokens and anything configured in `~/.gitconfig` work unchanged.
//! Interactive prompts are disabled so a missing credential fails instead of
//! hanging a worker thread.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use log::debug;

use crate::error::{Error, Result};

fn git(dir: Option<&Path>) -> Command {
    let mut command = Command::new("git");
    if let Some(dir) = dir {
        command.arg("-C").arg(dir);
    }
    command.env("GIT_TERMINAL_PROMPT", "0");
    command
}

fn run(mut command: Command, description: &str) -> Result<Output> {
    debug!("git {}", description);
    command.output().map_err(|e| Error::GitCommand {
        command: description.to_string(),
        stderr: e.to_string(),
    })
}

fn check(output: Output, description: &str) -> Result<Output> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(Error::GitCommand {
            command: description.to_string(),
            stderr: explain(&String::from_utf8_lossy(&output.stderr)),
        })
    }
}

/// Adds a hint to the common authentication failures.
fn explain(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.contains("Authentication failed")
        || stderr.contains("Permission denied")
        || stderr.contains("Could not read from remote repository")
        || stderr.contains("terminal prompts disabled")
    {
        format!(
            "{} (check that your SSH key or git credentials grant access to this repository)",
            stderr
        )
    } else {
        stderr.to_string()
    }
}

fn stdout_line(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Filesystem-safe directory name for a canonical identity key.
pub fn encode_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '/' | '\\' => '-',
            c if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' => c,
            _ => '_',
        })
        .collect()
}

/// Location of the bare mirror for an identity under the cache root.
pub fn mirror_path(cache_root: &Path, key: &str) -> PathBuf {
    cache_root.join(format!("{}.git", encode_key(key)))
}

/// Creates a bare mirror of `url` at `target`.
pub fn clone_mirror(url: &str, target: &Path) -> Result<()> {
    if target.exists() {
        fs::remove_dir_all(target)?;
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut command = git(None);
    command.args(["clone", "--mirror", "--quiet", url]).arg(target);
    let description = format!("clone --mirror {}", url);
    check(run(command, &description)?, &description)?;
    Ok(())
}

/// Brings an existing mirror up to date with its remote.
pub fn update_mirror(mirror: &Path) -> Result<()> {
    let mut command = git(Some(mirror));
    command.args(["remote", "update", "--prune"]);
    check(run(command, "remote update")?, "remote update")?;
    Ok(())
}

/// Resolves `rev` to a full commit id, `None` if it does not exist.
pub fn rev_parse(dir: &Path, rev: &str) -> Result<Option<String>> {
    let mut command = git(Some(dir));
    command.args(["rev-parse", "--verify", "--quiet", &format!("{}^{{commit}}", rev)]);
    let output = run(command, &format!("rev-parse {}", rev))?;
    if output.status.success() {
        Ok(Some(stdout_line(&output)))
    } else {
        Ok(None)
    }
}

/// Reads `path` at `commit`, `None` if the file does not exist there.
pub fn read_blob(dir: &Path, commit: &str, path: &str) -> Result<Option<Vec<u8>>> {
    let object = format!("{}:{}", commit, path);

    let mut exists = git(Some(dir));
    exists.args(["cat-file", "-e", &object]);
    if !run(exists, &format!("cat-file -e {}", object))?
        .status
        .success()
    {
        return Ok(None);
    }

    let mut command = git(Some(dir));
    command.args(["cat-file", "blob", &object]);
    let description = format!("cat-file blob {}", object);
    let output = check(run(command, &description)?, &description)?;
    Ok(Some(output.stdout))
}

/// Whether `ancestor` is reachable from `descendant` (or equal to it).
pub fn is_ancestor(dir: &Path, ancestor: &str, descendant: &str) -> Result<bool> {
    let mut command = git(Some(dir));
    command.args(["merge-base", "--is-ancestor", ancestor, descendant]);
    let description = format!("merge-base --is-ancestor {} {}", ancestor, descendant);
    let output = run(command, &description)?;
    match output.status.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        _ => Err(Error::GitCommand {
            command: description,
            stderr: explain(&String::from_utf8_lossy(&output.stderr)),
        }),
    }
}

/// The commit checked out in a work tree, `None` if `dir` is not a git work
/// tree or has no commit checked out yet.
pub fn head_commit(dir: &Path) -> Result<Option<String>> {
    if !dir.join(".git").exists() {
        return Ok(None);
    }
    rev_parse(dir, "HEAD")
}

/// Clones `url` into `target` without checking anything out.
pub fn clone_no_checkout(url: &str, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut command = git(None);
    command
        .args(["clone", "--no-checkout", "--quiet", url])
        .arg(target);
    let description = format!("clone --no-checkout {}", url);
    check(run(command, &description)?, &description)?;
    Ok(())
}

/// Fetches all branches and tags of `url` into a work tree.
pub fn fetch(dir: &Path, url: &str) -> Result<()> {
    let mut command = git(Some(dir));
    command.args(["fetch", "--quiet", "--tags", url, "+refs/heads/*:refs/remotes/origin/*"]);
    let description = format!("fetch {}", url);
    check(run(command, &description)?, &description)?;
    Ok(())
}

/// Detaches the work tree at `commit`.
pub fn checkout_detached(dir: &Path, commit: &str) -> Result<()> {
    let mut command = git(Some(dir));
    command.args(["checkout", "--quiet", "--detach", commit]);
    let description = format!("checkout --detach {}", commit);
    check(run(command, &description)?, &description)?;
    Ok(())
}

/// URL of a remote of the repository at `dir`, if it has one.
pub fn remote_url(dir: &Path, remote: &str) -> Option<String> {
    let mut command = git(Some(dir));
    command.args(["remote", "get-url", remote]);
    let output = run(command, "remote get-url").ok()?;
    if output.status.success() {
        let url = stdout_line(&output);
        (!url.is_empty()).then_some(url)
    } else {
        None
    }
}
