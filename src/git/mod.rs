//! Git access for history tracing and upstream synchronization
//!
//! Historical reads go through libgit2 (`RevisionStore`); anything that talks
//! to a remote (fetch, fast-forward, clone) shells out to the git CLI under a
//! timeout.

/// Upstream change detection and fast-forward
pub mod change_set;
/// Timed git subprocess execution
pub mod command;
/// Encoding fallback for historical blobs
pub mod decode;
/// Repository id resolution, cloning and working-copy status
pub mod repository;
/// Commit listing and content-at-commit reads
pub mod revision_store;

pub use change_set::{ChangeSet, ChangeSetDetector, UpstreamSource};
pub use command::GitCommandRunner;
pub use decode::{DecodedText, TextDecoder};
pub use repository::{RepositoryRegistry, WorkingCopyStatus};
pub use revision_store::{GitRevisionStore, RevisionStore};

use crate::error::ValidationError;

/// Normalize a caller-supplied path into a repository-relative git path
pub fn normalize_repo_path(path: &str) -> Result<String, ValidationError> {
    let normalized = path.trim().replace('\\', "/");
    let normalized = normalized.trim_start_matches("./");

    if normalized.is_empty() {
        return Err(ValidationError::Empty("path".to_string()));
    }
    if normalized.starts_with('/')
        || normalized.split('/').any(|part| part == "..")
    {
        return Err(ValidationError::InvalidPath(path.to_string()));
    }

    Ok(normalized.trim_end_matches('/').to_string())
}
