//! Atomic, optimistic-concurrency batches of document writes.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::{Change, DirEntry, Document, DocumentStore, StoreError, VersionToken};

/// A unit of work against a [`DocumentStore`].
///
/// The transaction pins the store's head when it begins. Documents fetched
/// through it are cached by path, so repeated calls hand back the same
/// document and edits accumulate. [`Transaction::commit`] writes every dirty
/// document in one compare-and-swap against the pinned token.
pub struct Transaction<'s> {
    store: &'s dyn DocumentStore,
    base: VersionToken,
    documents: BTreeMap<String, Document>,
}

impl<'s> Transaction<'s> {
    pub fn begin(store: &'s dyn DocumentStore) -> Result<Self, StoreError> {
        let base = store.head()?;
        debug!(base = %base, "transaction started");
        Ok(Self {
            store,
            base,
            documents: BTreeMap::new(),
        })
    }

    /// Token the next commit will be checked against.
    pub fn base(&self) -> &VersionToken {
        &self.base
    }

    /// Fetch a document that must exist.
    pub fn document(&mut self, path: &str) -> Result<&mut Document, StoreError> {
        let doc = self.fetch(path)?;
        if !doc.exists() && !doc.is_dirty() {
            return Err(StoreError::NotFound {
                path: path.to_string(),
            });
        }
        Ok(doc)
    }

    /// Fetch a document that may be absent; absence reads as `null`.
    pub fn optional_document(&mut self, path: &str) -> Result<&mut Document, StoreError> {
        self.fetch(path)
    }

    fn fetch(&mut self, path: &str) -> Result<&mut Document, StoreError> {
        super::path_components(path)?;
        match self.documents.entry(path.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let contents = self.store.read(&self.base, path)?;
                debug!(path, found = contents.is_some(), "fetched document");
                let doc = Document::from_contents(path, contents.as_deref())?;
                Ok(entry.insert(doc))
            }
        }
    }

    /// Decode a required document.
    pub fn read<T: DeserializeOwned>(&mut self, path: &str) -> Result<T, StoreError> {
        self.document(path)?.value()
    }

    /// Decode an optional document, defaulting when absent.
    pub fn read_or_default<T: DeserializeOwned + Default>(
        &mut self,
        path: &str,
    ) -> Result<T, StoreError> {
        self.optional_document(path)?.value_or_default()
    }

    /// Stage a value at `path`, creating the document if needed.
    pub fn write<T: Serialize>(&mut self, path: &str, value: &T) -> Result<(), StoreError> {
        self.optional_document(path)?.write(value)
    }

    pub fn directory_listing(&self, path: &str) -> Result<Vec<DirEntry>, StoreError> {
        super::path_components(path)?;
        self.store.list(&self.base, path)
    }

    pub fn has_changes(&self) -> bool {
        self.documents.values().any(Document::is_dirty)
    }

    pub fn dirty_paths(&self) -> Vec<&str> {
        self.documents
            .values()
            .filter(|doc| doc.is_dirty())
            .map(Document::path)
            .collect()
    }

    /// Commit every dirty document atomically.
    ///
    /// With nothing dirty this is a no-op returning the current base. On
    /// failure no document is marked committed, so all of them stay dirty.
    pub fn commit(&mut self, message: &str) -> Result<VersionToken, StoreError> {
        let mut changes = Vec::new();
        for doc in self.documents.values() {
            if let Some(contents) = doc.pending_contents()? {
                changes.push(Change {
                    path: doc.path().to_string(),
                    contents,
                });
            }
        }

        if changes.is_empty() {
            debug!(message, "nothing to commit");
            return Ok(self.base.clone());
        }

        let token = self.store.commit(&self.base, &changes, message)?;
        for doc in self.documents.values_mut() {
            if doc.is_dirty() {
                doc.mark_committed();
            }
        }
        info!(
            message,
            files = changes.len(),
            from = %self.base,
            to = %token,
            "committed"
        );
        self.base = token.clone();
        Ok(token)
    }
}
