//! # Repository Identity
//!
//! Canonical keys for dependency targets. Manifests spell the same repository
//! in many ways (`https://`, `ssh://`, scp-like `git@host:path`, with or
//! without a `.git` suffix); every graph and conflict decision in this crate
//! is made on the canonical key, never on the raw spelling.
//!
//! ## Canonical Form
//!
//! - Remote repositories: `<lowercased host>/<path>`, with scheme, user info
//!   and port dropped, and any trailing `/` or `.git` removed.
//! - Local repositories (`file://` URLs or absolute paths):
//!   `file:<absolute path>`.
//!
//! The first spelling an identity was parsed from is kept as its fetch URL.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::error::{Error, Result};

/// Canonicalized key identifying one underlying repository.
///
/// Equality, ordering and hashing only look at the canonical key, so two
/// identities parsed from different spellings of the same repository are
/// interchangeable.
#[derive(Debug, Clone)]
pub struct RepositoryIdentity {
    key: String,
    url: String,
}

impl RepositoryIdentity {
    /// Parses and canonicalizes an identity spec.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(invalid(spec, "empty repository spec"));
        }

        let key = if let Some(captures) = scp_pattern().captures(spec) {
            remote_key(&captures["host"], &captures["path"])
                .ok_or_else(|| invalid(spec, "missing repository path"))?
        } else if spec.contains("://") {
            let url = Url::parse(spec)?;
            match url.scheme() {
                "file" => {
                    let path = url
                        .to_file_path()
                        .map_err(|_| invalid(spec, "file URL without an absolute path"))?;
                    local_key(&path)
                }
                "https" | "http" | "ssh" | "git" | "git+ssh" => {
                    let host = url
                        .host_str()
                        .ok_or_else(|| invalid(spec, "URL has no host"))?;
                    remote_key(host, url.path())
                        .ok_or_else(|| invalid(spec, "missing repository path"))?
                }
                other => return Err(invalid(spec, &format!("unsupported scheme '{}'", other))),
            }
        } else if Path::new(spec).is_absolute() {
            local_key(Path::new(spec))
        } else {
            return Err(invalid(
                spec,
                "expected a URL, an scp-like address or an absolute path",
            ));
        };

        Ok(Self {
            key,
            url: spec.to_string(),
        })
    }

    /// The canonical key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The spelling this identity was first parsed from, used for fetching.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Repository name: the last segment of the canonical key.
    pub fn name(&self) -> &str {
        self.key
            .rsplit(&['/', ':'][..])
            .find(|segment| !segment.is_empty())
            .unwrap_or(&self.key)
    }

    /// Checkout path used when a manifest does not declare one.
    pub fn default_checkout_path(&self) -> PathBuf {
        PathBuf::from(self.name())
    }
}

impl PartialEq for RepositoryIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for RepositoryIdentity {}

impl Hash for RepositoryIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for RepositoryIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RepositoryIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for RepositoryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Who contributed an edge: the root manifest, or a dependency expanded at
/// a specific ref.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Requester {
    Root,
    Dependency {
        identity: RepositoryIdentity,
        r#ref: String,
    },
}

impl Requester {
    pub fn dependency(identity: RepositoryIdentity, r#ref: impl Into<String>) -> Self {
        Requester::Dependency {
            identity,
            r#ref: r#ref.into(),
        }
    }

    /// The identity behind this requester, `None` for the root.
    pub fn identity(&self) -> Option<&RepositoryIdentity> {
        match self {
            Requester::Root => None,
            Requester::Dependency { identity, .. } => Some(identity),
        }
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requester::Root => f.write_str("root"),
            Requester::Dependency { identity, r#ref } => write!(f, "{}@{}", identity, r#ref),
        }
    }
}

fn scp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:[^@/:]+@)?(?P<host>[^@/:]+):(?P<path>[^/].*)$")
            .expect("scp pattern is valid")
    })
}

fn remote_key(host: &str, path: &str) -> Option<String> {
    let path = normalize_segments(path)?;
    Some(format!("{}/{}", host.to_lowercase(), path))
}

/// `.` and `..` are resolved lexically; `..` never climbs above `/`.
fn local_key(path: &Path) -> String {
    let mut segments: Vec<String> = Vec::new();
    for segment in path.to_string_lossy().split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other.to_string()),
        }
    }
    let trimmed = normalize_segments(&segments.join("/")).unwrap_or_default();
    format!("file:/{}", trimmed)
}

/// Collapses duplicate slashes and strips a trailing `/` and `.git`.
fn normalize_segments(path: &str) -> Option<String> {
    let joined = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    let stripped = joined.strip_suffix(".git").unwrap_or(&joined);
    let stripped = stripped.trim_end_matches('/');
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

fn invalid(spec: &str, message: &str) -> Error {
    Error::InvalidIdentity {
        spec: spec.to_string(),
        message: message.to_string(),
    }
}
