//! # Manifest Model
//!
//! In-memory representation of one repository's declared dependencies and
//! the logic for reading it out of manifest text. Parsing is a pure function
//! over text: no I/O, no global state.
//!
//! ## Format
//!
//! One dependency per line, whitespace separated:
//!
//! ```text
//! # shared build tooling
//! https://github.com/acme/tooling.git   v1.2.0
//! git@github.com:acme/proto.git          main     third_party/proto
//! ```
//!
//! Fields are `identity-spec`, `ref` and an optional `checkout-path`
//! relative to the workspace root. `#` starts a comment; blank lines are
//! ignored.
//!
//! ## Parsing Stages
//!
//! 1. `read_records` is the text reader: it strips comments and blank lines
//!    and splits each remaining line into fields.
//! 2. `parse` turns records into a `ManifestNode`, rejecting malformed
//!    records and duplicate identities. The same repository declared twice
//!    in one manifest is always an error, never last-wins.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, ParseErrorKind, Result};
use crate::identity::{RepositoryIdentity, Requester};

/// Default manifest file name looked up at the root of every repository.
pub const DEFAULT_MANIFEST_NAME: &str = ".gitdeps";

/// One declared dependency: a repository at a ref, optionally at a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyReference {
    pub identity: RepositoryIdentity,
    /// Commit hash, tag or branch name.
    pub r#ref: String,
    /// Checkout location relative to the workspace root, when declared.
    pub path: Option<PathBuf>,
}

impl DependencyReference {
    pub fn new(identity: RepositoryIdentity, r#ref: impl Into<String>) -> Self {
        Self {
            identity,
            r#ref: r#ref.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// One parsed manifest. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestNode {
    pub owner: Requester,
    pub dependencies: Vec<DependencyReference>,
}

impl ManifestNode {
    /// A manifest that declares nothing: the state of a repository without
    /// a manifest file.
    pub fn leaf(owner: Requester) -> Self {
        Self {
            owner,
            dependencies: Vec::new(),
        }
    }
}

/// A raw manifest record as produced by the text reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// 1-based line number in the manifest text.
    pub line: usize,
    pub fields: Vec<String>,
}

/// Splits manifest text into records, dropping comments and blank lines.
pub fn read_records(text: &str) -> Vec<RawRecord> {
    text.lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let content = match line.find('#') {
                Some(pos) => &line[..pos],
                None => line,
            };
            let fields: Vec<String> = content.split_whitespace().map(str::to_string).collect();
            if fields.is_empty() {
                None
            } else {
                Some(RawRecord {
                    line: index + 1,
                    fields,
                })
            }
        })
        .collect()
}

/// Parses manifest text owned by `owner` into a `ManifestNode`.
pub fn parse(text: &str, owner: &Requester) -> Result<ManifestNode> {
    let source_name = owner.to_string();
    let mut dependencies = Vec::new();
    let mut declared_on: HashMap<RepositoryIdentity, usize> = HashMap::new();

    for record in read_records(text) {
        let dependency = parse_record(&record, &source_name)?;

        if let Some(first_line) = declared_on.get(&dependency.identity) {
            return Err(Error::Parse {
                kind: ParseErrorKind::DuplicateEntry,
                source_name,
                line: record.line,
                message: format!(
                    "{} already declared on line {}",
                    dependency.identity, first_line
                ),
            });
        }
        declared_on.insert(dependency.identity.clone(), record.line);
        dependencies.push(dependency);
    }

    Ok(ManifestNode {
        owner: owner.clone(),
        dependencies,
    })
}

/// Parses raw manifest bytes, rejecting non-UTF-8 content as malformed.
pub fn parse_bytes(bytes: &[u8], owner: &Requester) -> Result<ManifestNode> {
    let text = std::str::from_utf8(bytes).map_err(|e| Error::Parse {
        kind: ParseErrorKind::MalformedEntry,
        source_name: owner.to_string(),
        line: 0,
        message: format!("manifest is not valid UTF-8: {}", e),
    })?;
    parse(text, owner)
}

/// Reads and parses a manifest file from disk.
pub fn from_file(path: &Path, owner: &Requester) -> Result<ManifestNode> {
    let bytes = std::fs::read(path)?;
    parse_bytes(&bytes, owner)
}

fn parse_record(record: &RawRecord, source_name: &str) -> Result<DependencyReference> {
    let malformed = |message: String| Error::Parse {
        kind: ParseErrorKind::MalformedEntry,
        source_name: source_name.to_string(),
        line: record.line,
        message,
    };

    let (spec, r#ref, path) = match record.fields.as_slice() {
        [spec, r#ref] => (spec, r#ref, None),
        [spec, r#ref, path] => (spec, r#ref, Some(path)),
        fields => {
            return Err(malformed(format!(
                "expected 'repository ref [path]', found {} field(s)",
                fields.len()
            )))
        }
    };

    let identity = RepositoryIdentity::parse(spec).map_err(|e| malformed(e.to_string()))?;
    let mut dependency = DependencyReference::new(identity, r#ref.as_str());
    if let Some(path) = path {
        dependency.path = Some(validate_checkout_path(path).map_err(malformed)?);
    }
    Ok(dependency)
}

/// Checkout paths must stay inside the workspace.
fn validate_checkout_path(raw: &str) -> std::result::Result<PathBuf, String> {
    let path = Path::new(raw);
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) if segment == ".git" => {
                return Err(format!("checkout path '{}' enters a .git directory", raw))
            }
            Component::Normal(segment) => normalized.push(segment),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(format!("checkout path '{}' escapes the workspace", raw))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("checkout path '{}' must be relative", raw))
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(format!("checkout path '{}' names the workspace root", raw));
    }
    Ok(normalized)
}
