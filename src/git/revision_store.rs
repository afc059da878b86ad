use super::decode::TextDecoder;
use crate::error::{GitError, Result};
use crate::types::CommitRef;
use git2::{ErrorCode, ObjectType, Oid, Repository, Sort, Tree};
use std::path::{Path, PathBuf};

/// Read access to commit metadata and historical file contents
pub trait RevisionStore {
    /// Commits whose snapshot of `path` differs from their parents', newest first
    fn commits_touching(&self, path: &str) -> Result<Vec<CommitRef>>;

    /// Content of `path` at `commit`, or `None` when the path did not exist there
    fn content_at(&self, commit: &str, path: &str) -> Result<Option<String>>;
}

/// `RevisionStore` backed by a local git repository through libgit2
pub struct GitRevisionStore {
    repo: Repository,
    repo_path: PathBuf,
    decoder: TextDecoder,
}

impl GitRevisionStore {
    pub fn open<P: AsRef<Path>>(path: P, decoder: TextDecoder) -> Result<Self> {
        let repo_path = path.as_ref().to_path_buf();
        let repo = Repository::open(&repo_path).map_err(|e| {
            GitError::OpenFailed(format!("{}: {}", repo_path.display(), e.message()))
        })?;

        tracing::debug!("Opened revision store at {}", repo_path.display());
        Ok(Self {
            repo,
            repo_path,
            decoder,
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn commit_ref(commit: &git2::Commit) -> CommitRef {
        let author = commit.author();
        CommitRef {
            hash: commit.id().to_string(),
            author_name: author.name().unwrap_or("Unknown").to_string(),
            author_email: author.email().unwrap_or("").to_string(),
            message: commit.message().unwrap_or("").trim().to_string(),
            timestamp: commit.time().seconds(),
        }
    }
}

/// Blob id of `path` in `tree`; `None` when the path is absent or not a file
fn blob_id(tree: &Tree, path: &str) -> Result<Option<Oid>> {
    match tree.get_path(Path::new(path)) {
        Ok(entry) if entry.kind() == Some(ObjectType::Blob) => Ok(Some(entry.id())),
        Ok(_) => Ok(None),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(GitError::ReadFailed(format!("{}: {}", path, e.message())).into()),
    }
}

impl RevisionStore for GitRevisionStore {
    fn commits_touching(&self, path: &str) -> Result<Vec<CommitRef>> {
        let mut revwalk = self
            .repo
            .revwalk()
            .map_err(|e| GitError::IterFailed(e.message().to_string()))?;
        revwalk
            .set_sorting(Sort::TOPOLOGICAL | Sort::TIME)
            .map_err(|e| GitError::IterFailed(e.message().to_string()))?;

        match revwalk.push_head() {
            Ok(()) => {}
            // Unborn HEAD: no commits at all
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(GitError::IterFailed(e.message().to_string()).into()),
        }

        let mut commits = Vec::new();
        for oid in revwalk {
            let oid = oid.map_err(|e| GitError::IterFailed(e.message().to_string()))?;
            let commit = self.repo.find_commit(oid)?;
            let current = blob_id(&commit.tree()?, path)?;

            let touched = if commit.parent_count() == 0 {
                current.is_some()
            } else {
                let mut differs_from_all = true;
                for parent in commit.parents() {
                    if blob_id(&parent.tree()?, path)? == current {
                        differs_from_all = false;
                        break;
                    }
                }
                differs_from_all
            };

            if touched {
                commits.push(Self::commit_ref(&commit));
            }
        }

        tracing::debug!("{} commits touch {}", commits.len(), path);
        Ok(commits)
    }

    fn content_at(&self, commit: &str, path: &str) -> Result<Option<String>> {
        let oid = Oid::from_str(commit)
            .map_err(|e| GitError::ReadFailed(format!("bad commit id '{}': {}", commit, e.message())))?;
        let commit = self.repo.find_commit(oid)?;

        let Some(id) = blob_id(&commit.tree()?, path)? else {
            return Ok(None);
        };

        let blob = self.repo.find_blob(id)?;
        Ok(Some(self.decoder.decode(blob.content())))
    }
}
