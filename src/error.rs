//! # Error Handling
//!
//! This module defines the centralized error type for `gitdep`. It uses
//! `thiserror` to derive a single `Error` enum covering every failure mode of
//! the discovery, resolution and synchronization pipeline.
//!
//! ## Taxonomy
//!
//! - **Manifest errors** (`Parse`): local to one manifest, always fatal to
//!   resolution.
//! - **Resolution errors** (`Conflict`, `ConflictingCheckoutPath`, `Cycle`,
//!   `LayoutCollision`): the target state itself is ill-defined; they abort
//!   the run before any checkout.
//! - **Repository errors** (`RepositoryUnavailable`, `RefNotFound`,
//!   `GitCommand`): raised by a Repository Handle call. Only
//!   `RepositoryUnavailable` is transient and retried with backoff.
//! - **Ambient errors**: configuration, lockfile, I/O and serialization.
//!
//! Collected errors travel as `Error::Aggregate`; `into_diagnostics` flattens
//! them so the command layer can print one line per error.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::identity::{RepositoryIdentity, Requester};

/// Why a manifest entry was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The record does not decompose into identity, ref and optional path.
    MalformedEntry,
    /// The same repository identity is declared twice in one manifest.
    DuplicateEntry,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseErrorKind::MalformedEntry => f.write_str("malformed entry"),
            ParseErrorKind::DuplicateEntry => f.write_str("duplicate entry"),
        }
    }
}

/// Main error type for gitdep operations
#[derive(Error, Debug)]
pub enum Error {
    /// A manifest record could not be parsed.
    #[error("{source_name}:{line}: {kind}: {message}")]
    Parse {
        kind: ParseErrorKind,
        /// The manifest owner (`root` or `identity@ref`).
        source_name: String,
        line: usize,
        message: String,
    },

    /// An identity spec does not name a repository.
    #[error("invalid repository '{spec}': {message}")]
    InvalidIdentity { spec: String, message: String },

    /// Two or more requesters need the same repository at refs that cannot
    /// be reconciled.
    #[error("conflict for {identity}: {}", format_requests(.conflicting_refs))]
    Conflict {
        identity: RepositoryIdentity,
        conflicting_refs: Vec<(Requester, String)>,
    },

    /// Requesters declare different explicit checkout paths for one repository.
    #[error("conflicting checkout paths for {identity}: {}", format_paths(.paths))]
    ConflictingCheckoutPath {
        identity: RepositoryIdentity,
        paths: Vec<(Requester, PathBuf)>,
    },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle: {}", format_cycle(.identities))]
    Cycle { identities: Vec<String> },

    /// Distinct repositories were laid out at the same path.
    #[error("layout collision at {}: {}", .path.display(), format_identities(.identities))]
    LayoutCollision {
        path: PathBuf,
        identities: Vec<RepositoryIdentity>,
    },

    /// A Repository Handle call failed (network, authentication, disk).
    #[error("{identity} unavailable during {operation}: {message}")]
    RepositoryUnavailable {
        identity: RepositoryIdentity,
        operation: String,
        message: String,
    },

    /// A ref does not exist in the repository.
    #[error("ref '{r#ref}' not found in {identity}")]
    RefNotFound {
        identity: RepositoryIdentity,
        r#ref: String,
    },

    /// A git command could not be started.
    #[error("git command failed: {command} - {stderr}")]
    GitCommand { command: String, stderr: String },

    /// A failure tied to one expansion during discovery.
    #[error("while expanding {requester}: {source}")]
    Discovery {
        requester: Requester,
        #[source]
        source: Box<Error>,
    },

    /// Invalid settings file or option.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The resolved workspace manifest could not be read or written.
    #[error("lockfile error: {message}")]
    Lockfile { message: String },

    /// Work was cancelled before it started.
    #[error("cancelled: {context}")]
    Cancelled { context: String },

    /// An error indicating that a mutex or other lock has been poisoned.
    #[error("lock poisoned: {context}")]
    LockPoisoned { context: String },

    /// Several errors collected from independent units of work.
    #[error("{} errors occurred", .0.len())]
    Aggregate(Vec<Error>),

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML error, wrapped from `serde_yaml::Error`.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A JSON error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A URL parsing error, wrapped from `url::ParseError`.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl Error {
    /// Whether a retry might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RepositoryUnavailable { .. })
    }

    /// Collapses a list of errors: none is `Ok`, one is itself, more is an
    /// aggregate.
    pub fn from_collected(mut errors: Vec<Error>) -> std::result::Result<(), Error> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Aggregate(errors)),
        }
    }

    /// Flattens nested aggregates into one error per diagnostic line.
    pub fn into_diagnostics(self) -> Vec<Error> {
        match self {
            Error::Aggregate(errors) => errors
                .into_iter()
                .flat_map(Error::into_diagnostics)
                .collect(),
            other => vec![other],
        }
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

fn format_requests(requests: &[(Requester, String)]) -> String {
    requests
        .iter()
        .map(|(requester, r#ref)| format!("{} wants {}", requester, r#ref))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_paths(paths: &[(Requester, PathBuf)]) -> String {
    paths
        .iter()
        .map(|(requester, path)| format!("{} wants {}", requester, path.display()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_cycle(identities: &[String]) -> String {
    let mut members = identities.to_vec();
    if let Some(first) = identities.first() {
        members.push(first.clone());
    }
    members.join(" -> ")
}

fn format_identities(identities: &[RepositoryIdentity]) -> String {
    identities
        .iter()
        .map(|identity| identity.key())
        .collect::<Vec<_>>()
        .join(", ")
}
