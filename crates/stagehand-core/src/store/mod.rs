//! Versioned JSON document storage.
//!
//! Every piece of deploy and environment state lives in a document addressed
//! by a slash-separated path (see [`paths`]). Reads and writes go through a
//! [`Transaction`], which batches all changed documents into one
//! compare-and-swap commit against the [`VersionToken`] it started from.
//!
//! Three backends implement [`DocumentStore`]:
//! - [`GitStore`]: a branch in a git repository; one commit per transaction.
//! - [`FsStore`]: a plain directory; the token is a digest of the tree.
//! - [`MemoryStore`]: an in-process map, for tests and dry runs.

pub mod document;
pub mod fs;
pub mod git;
pub mod memory;
pub mod paths;
pub mod transaction;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use document::Document;
pub use fs::FsStore;
pub use git::GitStore;
pub use memory::MemoryStore;
pub use transaction::Transaction;

/// Opaque marker for one committed state of a store.
///
/// Git stores use the branch commit id, filesystem stores a tree digest and
/// memory stores a counter. Tokens are only ever compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of a directory listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

/// A pending write produced by a transaction commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: String,
    pub contents: String,
}

/// Errors surfaced by document stores and transactions.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another writer committed after this transaction started.
    #[error("store moved from {expected} to {actual} since the transaction began")]
    Conflict {
        expected: VersionToken,
        actual: VersionToken,
    },

    #[error("document not found: {path}")]
    NotFound { path: String },

    #[error("malformed document at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode document at {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Some files were written before a write failed.
    #[error("commit stopped after writing {written:?}; failed on {failed}: {source}")]
    PartialCommit {
        written: Vec<String>,
        failed: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid document path: {0}")]
    InvalidPath(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Git(#[from] git2::Error),

    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the caller should reload state and redo the step.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Backend contract shared by all stores.
///
/// Reads are taken as of a token so a transaction sees one consistent
/// snapshot where the backend can provide it. `commit` must apply every
/// change or none of them, and must fail with [`StoreError::Conflict`] when
/// the current head differs from `expected`.
pub trait DocumentStore {
    fn head(&self) -> Result<VersionToken, StoreError>;

    fn read(&self, token: &VersionToken, path: &str) -> Result<Option<String>, StoreError>;

    fn list(&self, token: &VersionToken, path: &str) -> Result<Vec<DirEntry>, StoreError>;

    fn commit(
        &self,
        expected: &VersionToken,
        changes: &[Change],
        message: &str,
    ) -> Result<VersionToken, StoreError>;
}

/// Split a document path into components, rejecting traversal.
pub(crate) fn path_components(path: &str) -> Result<Vec<&str>, StoreError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let components: Vec<&str> = trimmed.split('/').collect();
    for component in &components {
        if component.is_empty() || *component == "." || *component == ".." {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
    }
    Ok(components)
}
