use super::command::GitCommandRunner;
use crate::error::{GitError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;

/// Paths that differ between local HEAD and a resolved upstream commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Upstream commit the paths were computed against
    pub upstream_commit: String,
    /// Repository-relative paths, deduplicated, in diff order
    pub paths: Vec<String>,
}

impl ChangeSet {
    /// Parse NUL-separated `git diff --name-only -z` output
    pub fn from_name_only(upstream_commit: impl Into<String>, raw: &[u8]) -> Self {
        let mut seen = HashSet::new();
        let paths = raw
            .split(|b| *b == 0)
            .filter(|p| !p.is_empty())
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .filter(|p| seen.insert(p.clone()))
            .collect();

        Self {
            upstream_commit: upstream_commit.into(),
            paths,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }
}

/// Upstream operations the sync pipeline consumes
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Fetch without merging and list the paths that differ from upstream.
    /// Leaves the working copy untouched.
    async fn detect(&self, repo_path: &Path) -> Result<ChangeSet>;

    /// Fast-forward the working copy to the commit `change_set` was computed against
    async fn fast_forward(&self, repo_path: &Path, change_set: &ChangeSet) -> Result<()>;
}

/// Git CLI implementation of [`UpstreamSource`]
#[derive(Debug, Clone)]
pub struct ChangeSetDetector {
    runner: GitCommandRunner,
    remote: String,
    branch: String,
}

impl ChangeSetDetector {
    pub fn new(runner: GitCommandRunner, remote: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            runner,
            remote: remote.into(),
            branch: branch.into(),
        }
    }

    pub fn upstream_ref(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }
}

#[async_trait]
impl UpstreamSource for ChangeSetDetector {
    async fn detect(&self, repo_path: &Path) -> Result<ChangeSet> {
        self.runner
            .run(repo_path, &["fetch", "--quiet", &self.remote])
            .await?;

        let spec = format!("{}^{{commit}}", self.upstream_ref());
        let upstream_commit = self
            .runner
            .run_text(repo_path, &["rev-parse", "--verify", &spec])
            .await?;
        if upstream_commit.is_empty() {
            return Err(GitError::UnexpectedOutput(format!(
                "rev-parse returned nothing for {}",
                self.upstream_ref()
            ))
            .into());
        }

        let raw = self
            .runner
            .run(
                repo_path,
                &["diff", "--name-only", "--no-renames", "-z", "HEAD", &upstream_commit],
            )
            .await?;

        let change_set = ChangeSet::from_name_only(upstream_commit, &raw);
        tracing::info!(
            "{} path(s) differ between HEAD and {} ({})",
            change_set.len(),
            self.upstream_ref(),
            &change_set.upstream_commit
        );
        Ok(change_set)
    }

    async fn fast_forward(&self, repo_path: &Path, change_set: &ChangeSet) -> Result<()> {
        self.runner
            .run(
                repo_path,
                &["merge", "--ff-only", "--quiet", &change_set.upstream_commit],
            )
            .await?;
        tracing::info!(
            "Fast-forwarded {} to {}",
            repo_path.display(),
            &change_set.upstream_commit
        );
        Ok(())
    }
}
