//! In-process document store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use super::{Change, DirEntry, DocumentStore, EntryKind, StoreError, VersionToken};

type Snapshot = BTreeMap<String, String>;

#[derive(Debug, Default)]
struct MemoryState {
    /// Snapshot per version; index 0 is the empty store.
    snapshots: Vec<Snapshot>,
    messages: Vec<String>,
    fail_next_commit: Option<String>,
}

/// A versioned map of documents held in memory.
///
/// Every commit produces a new immutable snapshot so reads at an older
/// token keep returning what that token saw.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                snapshots: vec![Snapshot::new()],
                ..MemoryState::default()
            }),
        }
    }

    /// Seed a store with initial files as version 1.
    pub fn with_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let store = Self::new();
        {
            let mut state = store.lock();
            let seeded: Snapshot = files
                .into_iter()
                .map(|(path, contents)| (path.into(), contents.into()))
                .collect();
            state.snapshots.push(seeded);
            state.messages.push("seed".to_string());
        }
        store
    }

    /// Make the next commit fail without applying anything.
    pub fn fail_next_commit(&self, reason: impl Into<String>) {
        self.lock().fail_next_commit = Some(reason.into());
    }

    /// Commit messages in order, oldest first.
    pub fn commit_messages(&self) -> Vec<String> {
        self.lock().messages.clone()
    }

    /// Current contents of a file, bypassing transactions.
    pub fn file(&self, path: &str) -> Option<String> {
        let state = self.lock();
        state.snapshots.last().and_then(|s| s.get(path).cloned())
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // Snapshots are only pushed whole, so poisoned state is still valid.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn version_of(token: &VersionToken) -> Result<usize, StoreError> {
        token
            .as_str()
            .strip_prefix("mem-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| StoreError::Backend(format!("foreign version token: {token}")))
    }

    fn token_for(version: usize) -> VersionToken {
        VersionToken::new(format!("mem-{version}"))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn head(&self) -> Result<VersionToken, StoreError> {
        let state = self.lock();
        Ok(Self::token_for(state.snapshots.len() - 1))
    }

    fn read(&self, token: &VersionToken, path: &str) -> Result<Option<String>, StoreError> {
        let version = Self::version_of(token)?;
        let state = self.lock();
        let snapshot = state
            .snapshots
            .get(version)
            .ok_or_else(|| StoreError::Backend(format!("unknown version token: {token}")))?;
        Ok(snapshot.get(path.trim_matches('/')).cloned())
    }

    fn list(&self, token: &VersionToken, path: &str) -> Result<Vec<DirEntry>, StoreError> {
        let version = Self::version_of(token)?;
        let state = self.lock();
        let snapshot = state
            .snapshots
            .get(version)
            .ok_or_else(|| StoreError::Backend(format!("unknown version token: {token}")))?;

        let dir = path.trim_matches('/');
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };

        let mut files = BTreeSet::new();
        let mut dirs = BTreeSet::new();
        for key in snapshot.keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    dirs.insert(child.to_string());
                }
                None => {
                    files.insert(rest.to_string());
                }
            }
        }

        let mut entries: Vec<DirEntry> = dirs
            .into_iter()
            .map(|name| DirEntry {
                name,
                kind: EntryKind::Dir,
            })
            .collect();
        entries.extend(files.into_iter().map(|name| DirEntry {
            name,
            kind: EntryKind::File,
        }));
        Ok(entries)
    }

    fn commit(
        &self,
        expected: &VersionToken,
        changes: &[Change],
        message: &str,
    ) -> Result<VersionToken, StoreError> {
        let mut state = self.lock();
        let current = Self::token_for(state.snapshots.len() - 1);
        if &current != expected {
            return Err(StoreError::Conflict {
                expected: expected.clone(),
                actual: current,
            });
        }
        if let Some(reason) = state.fail_next_commit.take() {
            return Err(StoreError::Backend(reason));
        }

        let mut next = state.snapshots.last().cloned().unwrap_or_default();
        for change in changes {
            next.insert(
                change.path.trim_matches('/').to_string(),
                change.contents.clone(),
            );
        }
        state.snapshots.push(next);
        state.messages.push(message.to_string());
        Ok(Self::token_for(state.snapshots.len() - 1))
    }
}
