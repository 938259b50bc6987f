//! Dirty-tracked JSON document.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::StoreError;

/// One persisted JSON document as seen by a transaction.
///
/// Three values are tracked:
/// - `remote`: what the store held when the document was fetched (or last
///   committed by this transaction). `None` when the file does not exist.
/// - `saved`: the value staged for the next commit.
/// - `working`: in-memory edits not yet staged.
///
/// A document is dirty when `saved` differs from `remote`.
#[derive(Debug, Clone)]
pub struct Document {
    path: String,
    remote: Option<Value>,
    saved: Option<Value>,
    working: Value,
}

impl Document {
    /// Build a document from raw file contents.
    pub(crate) fn from_contents(path: &str, contents: Option<&str>) -> Result<Self, StoreError> {
        let remote = match contents {
            Some(text) => {
                Some(
                    serde_json::from_str::<Value>(text).map_err(|source| StoreError::Parse {
                        path: path.to_string(),
                        source,
                    })?,
                )
            }
            None => None,
        };
        Ok(Self {
            path: path.to_string(),
            working: remote.clone().unwrap_or(Value::Null),
            saved: remote.clone(),
            remote,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the document existed when fetched.
    pub fn exists(&self) -> bool {
        self.remote.is_some()
    }

    pub fn working(&self) -> &Value {
        &self.working
    }

    /// Decode the working value.
    pub fn value<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.working.clone()).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Decode the working value, treating an absent document as `T::default()`.
    pub fn value_or_default<T: DeserializeOwned + Default>(&self) -> Result<T, StoreError> {
        if self.working.is_null() {
            return Ok(T::default());
        }
        self.value()
    }

    /// Replace the working value without staging it.
    pub fn set<T: Serialize>(&mut self, value: &T) -> Result<(), StoreError> {
        self.working = serde_json::to_value(value).map_err(|source| StoreError::Encode {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }

    /// Stage the working value for the next commit.
    pub fn save(&mut self) {
        self.saved = Some(self.working.clone());
    }

    /// Set and stage in one call.
    pub fn write<T: Serialize>(&mut self, value: &T) -> Result<(), StoreError> {
        self.set(value)?;
        self.save();
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.saved != self.remote
    }

    pub fn is_up_to_date(&self) -> bool {
        !self.is_dirty()
    }

    /// Serialized staged value, if it needs writing.
    pub(crate) fn pending_contents(&self) -> Result<Option<String>, StoreError> {
        if !self.is_dirty() {
            return Ok(None);
        }
        let Some(saved) = &self.saved else {
            return Ok(None);
        };
        let mut text =
            serde_json::to_string_pretty(saved).map_err(|source| StoreError::Encode {
                path: self.path.clone(),
                source,
            })?;
        text.push('\n');
        Ok(Some(text))
    }

    /// Record that the staged value is now the remote value.
    pub(crate) fn mark_committed(&mut self) {
        self.remote = self.saved.clone();
    }
}
