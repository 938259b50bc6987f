//! Plain-directory document store.
//!
//! Documents are files under a root directory. The version token is a
//! deterministic blake3 digest over every (relative path, content) pair, so
//! any write by another process moves the token and a later commit from a
//! stale transaction is refused.
//!
//! Files are written one at a time (temp file + rename). A failure after the
//! first file has landed is reported as [`StoreError::PartialCommit`] rather
//! than swallowed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{Change, DirEntry, DocumentStore, EntryKind, StoreError, VersionToken};

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let mut resolved = self.root.clone();
        for component in super::path_components(path)? {
            resolved.push(component);
        }
        Ok(resolved)
    }
}

impl DocumentStore for FsStore {
    fn head(&self) -> Result<VersionToken, StoreError> {
        Ok(VersionToken::new(hash_tree(&self.root)?))
    }

    /// Reads the current file; filesystem stores keep no snapshots, so a
    /// concurrent write is only detected when the transaction commits.
    fn read(&self, _token: &VersionToken, path: &str) -> Result<Option<String>, StoreError> {
        let file = self.resolve(path)?;
        match fs::read_to_string(&file) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn list(&self, _token: &VersionToken, path: &str) -> Result<Vec<DirEntry>, StoreError> {
        let dir = self.resolve(path)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut listing = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if is_hidden(&name) {
                continue;
            }
            let kind = if entry.file_type()?.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::File
            };
            listing.push(DirEntry { name, kind });
        }
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }

    fn commit(
        &self,
        expected: &VersionToken,
        changes: &[Change],
        message: &str,
    ) -> Result<VersionToken, StoreError> {
        let actual = self.head()?;
        if &actual != expected {
            return Err(StoreError::Conflict {
                expected: expected.clone(),
                actual,
            });
        }

        let mut written = Vec::new();
        for change in changes {
            let target = self.resolve(&change.path)?;
            if let Err(source) = write_atomic(&target, &change.contents) {
                if written.is_empty() {
                    return Err(source.into());
                }
                return Err(StoreError::PartialCommit {
                    written,
                    failed: change.path.clone(),
                    source,
                });
            }
            written.push(change.path.clone());
        }
        debug!(message, files = written.len(), root = %self.root.display(), "wrote documents");
        self.head()
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Write through a sibling temp file so readers never see a torn document.
fn write_atomic(target: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = target.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));
    fs::write(&tmp, contents)?;
    if let Err(err) = fs::rename(&tmp, target) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(())
}

/// Deterministic digest of a directory tree.
///
/// Entries are visited in sorted order and hashed as
/// `path || 0x00 || content` for files and `path || 0xFF` for directories.
/// Hidden entries (leading `.`) are skipped, which also excludes in-flight
/// temp files.
pub fn hash_tree(root: &Path) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    if root.exists() {
        hash_dir_recursive(&mut hasher, root, "")?;
    }
    Ok(hasher.finalize().to_hex().to_string())
}

fn hash_dir_recursive(hasher: &mut blake3::Hasher, dir: &Path, base: &str) -> io::Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_hidden(&name) {
            continue;
        }
        let rel_path = if base.is_empty() {
            name
        } else {
            format!("{base}/{name}")
        };

        let ty = entry.file_type()?;
        if ty.is_dir() {
            hasher.update(rel_path.as_bytes());
            hasher.update(&[0xFF]);
            hash_dir_recursive(hasher, &entry.path(), &rel_path)?;
        } else if ty.is_file() {
            hasher.update(rel_path.as_bytes());
            hasher.update(&[0x00]);
            hasher.update(&fs::read(entry.path())?);
        } else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported entry in store: {}", entry.path().display()),
            ));
        }
    }
    Ok(())
}
