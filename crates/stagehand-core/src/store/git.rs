//! Git-backed document store.
//!
//! State lives on one branch of a git repository. Each transaction commit
//! becomes exactly one git commit whose tree is the base commit's tree with
//! every changed document replaced. The branch is then moved with a
//! compare-and-swap ref update, so two writers racing from the same base
//! cannot both succeed.
//!
//! Only the branch ref is touched; a checked-out working tree of the same
//! branch is not updated. Point the store at a bare repository (or a branch
//! nobody has checked out) to keep the two from drifting.

use std::path::{Path, PathBuf};

use git2::{Commit, ErrorCode, ObjectType, Oid, Repository, Signature, Sort, Tree};
use tracing::debug;

use super::{Change, DirEntry, DocumentStore, EntryKind, StoreError, VersionToken};

const FILE_MODE: i32 = 0o100644;
const DIR_MODE: i32 = 0o040000;

/// Summary of one commit on the state branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub id: String,
    pub message: String,
    pub timestamp: i64,
}

pub struct GitStore {
    repo: Repository,
    path: PathBuf,
    refname: String,
}

impl std::fmt::Debug for GitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitStore")
            .field("path", &self.path)
            .field("refname", &self.refname)
            .finish()
    }
}

impl GitStore {
    /// Open an existing repository.
    pub fn open(path: impl Into<PathBuf>, branch: &str) -> Result<Self, StoreError> {
        let path = path.into();
        let repo = Repository::open(&path)?;
        Ok(Self::from_repo(repo, path, branch))
    }

    /// Open a repository, initialising a bare one if nothing exists at `path`.
    pub fn open_or_init(path: impl Into<PathBuf>, branch: &str) -> Result<Self, StoreError> {
        let path = path.into();
        let repo = match Repository::open(&path) {
            Ok(repo) => repo,
            Err(err) if err.code() == ErrorCode::NotFound => {
                debug!(path = %path.display(), "initialising bare state repository");
                Repository::init_bare(&path)?
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self::from_repo(repo, path, branch))
    }

    fn from_repo(repo: Repository, path: PathBuf, branch: &str) -> Self {
        Self {
            repo,
            path,
            refname: format!("refs/heads/{branch}"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn refname(&self) -> &str {
        &self.refname
    }

    /// Most recent commits on the state branch, newest first.
    pub fn history(&self, limit: usize) -> Result<Vec<CommitSummary>, StoreError> {
        let Some(head) = self.head_oid()? else {
            return Ok(Vec::new());
        };
        let mut revwalk = self.repo.revwalk()?;
        revwalk.push(head)?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;

        let mut summaries = Vec::new();
        for oid in revwalk.take(limit) {
            let commit = self.repo.find_commit(oid?)?;
            summaries.push(CommitSummary {
                id: commit.id().to_string(),
                message: commit.message().unwrap_or_default().trim_end().to_string(),
                timestamp: commit.time().seconds(),
            });
        }
        Ok(summaries)
    }

    fn head_oid(&self) -> Result<Option<Oid>, StoreError> {
        match self.repo.find_reference(&self.refname) {
            Ok(reference) => Ok(reference.target()),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn token_for(oid: Option<Oid>) -> VersionToken {
        VersionToken::new(oid.unwrap_or_else(Oid::zero).to_string())
    }

    fn tree_at(&self, token: &VersionToken) -> Result<Option<Tree<'_>>, StoreError> {
        let oid = Oid::from_str(token.as_str())?;
        if oid.is_zero() {
            return Ok(None);
        }
        let commit = self.repo.find_commit(oid)?;
        Ok(Some(commit.tree()?))
    }

    fn signature(&self) -> Result<Signature<'static>, StoreError> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => Ok(Signature::now("stagehand", "stagehand@localhost")?),
        }
    }
}

impl DocumentStore for GitStore {
    fn head(&self) -> Result<VersionToken, StoreError> {
        Ok(Self::token_for(self.head_oid()?))
    }

    fn read(&self, token: &VersionToken, path: &str) -> Result<Option<String>, StoreError> {
        let components = super::path_components(path)?;
        let Some(tree) = self.tree_at(token)? else {
            return Ok(None);
        };
        let entry = match tree.get_path(Path::new(&components.join("/"))) {
            Ok(entry) => entry,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if entry.kind() != Some(ObjectType::Blob) {
            return Err(StoreError::Backend(format!("{path} is not a file")));
        }
        let blob = self.repo.find_blob(entry.id())?;
        let contents = String::from_utf8(blob.content().to_vec())
            .map_err(|_| StoreError::Backend(format!("{path} is not valid UTF-8")))?;
        Ok(Some(contents))
    }

    fn list(&self, token: &VersionToken, path: &str) -> Result<Vec<DirEntry>, StoreError> {
        let components = super::path_components(path)?;
        let Some(root) = self.tree_at(token)? else {
            return Ok(Vec::new());
        };

        let dir = if components.is_empty() {
            root
        } else {
            let entry = match root.get_path(Path::new(&components.join("/"))) {
                Ok(entry) => entry,
                Err(err) if err.code() == ErrorCode::NotFound => return Ok(Vec::new()),
                Err(err) => return Err(err.into()),
            };
            if entry.kind() != Some(ObjectType::Tree) {
                return Ok(Vec::new());
            }
            self.repo.find_tree(entry.id())?
        };

        let mut listing = Vec::new();
        for entry in dir.iter() {
            let Some(name) = entry.name() else {
                continue;
            };
            let kind = match entry.kind() {
                Some(ObjectType::Tree) => EntryKind::Dir,
                _ => EntryKind::File,
            };
            listing.push(DirEntry {
                name: name.to_string(),
                kind,
            });
        }
        Ok(listing)
    }

    fn commit(
        &self,
        expected: &VersionToken,
        changes: &[Change],
        message: &str,
    ) -> Result<VersionToken, StoreError> {
        let head = self.head_oid()?;
        let actual = Self::token_for(head);
        if &actual != expected {
            return Err(StoreError::Conflict {
                expected: expected.clone(),
                actual,
            });
        }

        let parent: Option<Commit<'_>> = head.map(|oid| self.repo.find_commit(oid)).transpose()?;
        let mut tree_oid = match &parent {
            Some(commit) => commit.tree_id(),
            None => self.repo.treebuilder(None)?.write()?,
        };

        for change in changes {
            let components = super::path_components(&change.path)?;
            if components.is_empty() {
                return Err(StoreError::InvalidPath(change.path.clone()));
            }
            let blob = self.repo.blob(change.contents.as_bytes())?;
            let base = self.repo.find_tree(tree_oid)?;
            tree_oid = upsert_blob(&self.repo, Some(&base), &components, blob)?;
        }

        let tree = self.repo.find_tree(tree_oid)?;
        let signature = self.signature()?;
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let commit_oid =
            self.repo
                .commit(None, &signature, &signature, message, &tree, &parents)?;

        let moved = match head {
            Some(current) => {
                self.repo
                    .reference_matching(&self.refname, commit_oid, true, current, message)
            }
            None => self
                .repo
                .reference(&self.refname, commit_oid, false, message),
        };

        match moved {
            Ok(_) => {
                debug!(commit = %commit_oid, refname = %self.refname, "moved state branch");
                Ok(Self::token_for(Some(commit_oid)))
            }
            Err(err) if matches!(err.code(), ErrorCode::Modified | ErrorCode::Exists) => {
                Err(StoreError::Conflict {
                    expected: expected.clone(),
                    actual: self.head()?,
                })
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Return the id of `base` with `blob` placed at `components`.
fn upsert_blob(
    repo: &Repository,
    base: Option<&Tree<'_>>,
    components: &[&str],
    blob: Oid,
) -> Result<Oid, git2::Error> {
    let Some((name, rest)) = components.split_first() else {
        return Err(git2::Error::from_str("empty document path"));
    };
    let mut builder = repo.treebuilder(base)?;

    if rest.is_empty() {
        builder.insert(*name, blob, FILE_MODE)?;
    } else {
        let existing = match base.and_then(|tree| tree.get_name(name)) {
            Some(entry) if entry.kind() == Some(ObjectType::Tree) => {
                Some(repo.find_tree(entry.id())?)
            }
            _ => None,
        };
        let subtree = upsert_blob(repo, existing.as_ref(), rest, blob)?;
        builder.insert(*name, subtree, DIR_MODE)?;
    }
    builder.write()
}
