use super::command::GitCommandRunner;
use crate::error::{GitError, Result, ValidationError};
use crate::types::CloneResult;
use git2::{ErrorCode, Repository, StatusOptions};
use std::path::{Path, PathBuf};

/// Branch, HEAD and dirtiness of a local checkout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingCopyStatus {
    pub branch: Option<String>,
    pub head_commit: Option<String>,
    pub is_dirty: bool,
}

/// Resolves repository ids to local checkouts under one base directory
#[derive(Debug, Clone)]
pub struct RepositoryRegistry {
    base_path: PathBuf,
    runner: GitCommandRunner,
}

impl RepositoryRegistry {
    pub fn new(base_path: impl Into<PathBuf>, runner: GitCommandRunner) -> Self {
        Self {
            base_path: base_path.into(),
            runner,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Repository ids are single path components
    pub fn validate_repo_id(repo_id: &str) -> std::result::Result<(), ValidationError> {
        if repo_id.trim().is_empty() {
            return Err(ValidationError::Empty("repository id".to_string()));
        }
        if repo_id == "."
            || repo_id == ".."
            || repo_id.contains(['/', '\\', '\0'])
            || repo_id.starts_with('.')
        {
            return Err(ValidationError::InvalidRepoId(repo_id.to_string()));
        }
        Ok(())
    }

    /// Local checkout path for `repo_id`; `RepoNotFound` when there is none
    pub fn resolve(&self, repo_id: &str) -> Result<PathBuf> {
        Self::validate_repo_id(repo_id)?;
        let path = self.base_path.join(repo_id);
        if !path.join(".git").exists() {
            return Err(GitError::RepoNotFound(repo_id.to_string()).into());
        }
        Ok(path)
    }

    /// Ids of every checkout under the base path, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if entry.path().join(".git").exists()
                && let Some(name) = entry.file_name().to_str()
            {
                ids.push(name.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Clone `url` into the base path under `name` (derived from the URL when omitted)
    pub async fn clone_repository(&self, url: &str, name: Option<&str>) -> Result<CloneResult> {
        if url.trim().is_empty() {
            return Err(ValidationError::Empty("repository url".to_string()).into());
        }

        let repo_id = match name {
            Some(name) => name.to_string(),
            None => derive_repo_name(url)
                .ok_or_else(|| ValidationError::InvalidRepoId(url.to_string()))?,
        };
        Self::validate_repo_id(&repo_id)?;

        let target = self.base_path.join(&repo_id);
        if target.exists() {
            return Err(GitError::RepoAlreadyExists(repo_id).into());
        }

        std::fs::create_dir_all(&self.base_path)?;
        let target_str = target.to_string_lossy().to_string();
        tracing::info!("Cloning {} into {}", url, target_str);
        self.runner
            .run(&self.base_path, &["clone", "--quiet", url, &target_str])
            .await?;

        // A checkout without a HEAD commit cannot be indexed or synced
        let head_commit = match self.runner.run_text(&target, &["rev-parse", "--verify", "HEAD"]).await {
            Ok(head) => head,
            Err(e) => {
                tracing::warn!("Clone of {} has no HEAD commit; removing {}", url, target_str);
                if let Err(cleanup) = std::fs::remove_dir_all(&target) {
                    tracing::warn!("Failed to remove {}: {}", target_str, cleanup);
                }
                return Err(e);
            }
        };

        Ok(CloneResult {
            repo_id,
            path: target_str,
            head_commit,
        })
    }

    /// Delete `repo_id`'s checkout from disk, returning the removed path
    pub fn remove_checkout(&self, repo_id: &str) -> Result<PathBuf> {
        let path = self.resolve(repo_id)?;
        tracing::info!("Removing checkout {}", path.display());
        std::fs::remove_dir_all(&path)?;
        Ok(path)
    }

    /// Branch, HEAD and dirtiness of `repo_id`'s checkout
    pub fn working_copy_status(&self, repo_id: &str) -> Result<WorkingCopyStatus> {
        let path = self.resolve(repo_id)?;
        let repo = Repository::open(&path)
            .map_err(|e| GitError::OpenFailed(format!("{}: {}", path.display(), e.message())))?;

        let (branch, head_commit) = match repo.head() {
            Ok(head) => (
                if head.is_branch() {
                    head.shorthand().map(|s| s.to_string())
                } else {
                    None
                },
                head.target().map(|oid| oid.to_string()),
            ),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                (None, None)
            }
            Err(e) => return Err(e.into()),
        };

        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .include_ignored(false)
            .recurse_untracked_dirs(false);
        let is_dirty = !repo.statuses(Some(&mut opts))?.is_empty();

        Ok(WorkingCopyStatus {
            branch,
            head_commit,
            is_dirty,
        })
    }
}

/// Last path component of a clone URL, without a trailing `.git`
pub fn derive_repo_name(url: &str) -> Option<String> {
    let last = url
        .trim()
        .trim_end_matches('/')
        .rsplit(['/', ':', '\\'])
        .next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
