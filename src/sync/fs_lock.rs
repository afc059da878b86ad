//! Filesystem-based locking for cross-process coordination
//!
//! Uses flock() so that two processes cannot sync the same repository at
//! once. Complements the in-process state flag in `state.rs`.

use anyhow::{Context, Result};
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Lock file for `key` inside `lock_dir`
fn lock_file_path(lock_dir: &Path, key: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    lock_dir.join(format!("{}.lock", &hash[..16]))
}

/// Guard that holds an exclusive filesystem lock
///
/// The lock is released when this guard is dropped, or by the OS if the
/// process dies.
pub struct FsLockGuard {
    _file: File,
    path: PathBuf,
}

impl FsLockGuard {
    /// Try to acquire an exclusive lock for `key`, non-blocking
    ///
    /// Returns:
    /// - `Ok(Some(guard))` if the lock was acquired
    /// - `Ok(None)` if another holder has it
    /// - `Err(...)` on IO errors
    pub fn try_acquire(lock_dir: &Path, key: &str) -> Result<Option<Self>> {
        let lock_path = lock_file_path(lock_dir, key);

        fs::create_dir_all(lock_dir).context("Failed to create lock directory")?;
        let file = File::create(&lock_path).context("Failed to create lock file")?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!("Acquired filesystem lock for {} ({:?})", key, lock_path);
                Ok(Some(Self {
                    _file: file,
                    path: lock_path,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                tracing::debug!("Filesystem lock for {} is held elsewhere", key);
                Ok(None)
            }
            Err(e) => Err(e).context("Failed to acquire filesystem lock"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FsLockGuard {
    fn drop(&mut self) {
        // The lock file is kept for reuse; closing it releases the flock
        tracing::debug!("Releasing filesystem lock {:?}", self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_is_blocked_until_release() {
        let dir = TempDir::new().unwrap();
        let first = FsLockGuard::try_acquire(dir.path(), "repo-a").unwrap();
        assert!(first.is_some());

        let second = FsLockGuard::try_acquire(dir.path(), "repo-a").unwrap();
        assert!(second.is_none());

        drop(first);
        let third = FsLockGuard::try_acquire(dir.path(), "repo-a").unwrap();
        assert!(third.is_some());
    }

    #[test]
    fn test_different_keys_do_not_conflict() {
        let dir = TempDir::new().unwrap();
        let a = FsLockGuard::try_acquire(dir.path(), "repo-a").unwrap().unwrap();
        let b = FsLockGuard::try_acquire(dir.path(), "repo-b").unwrap().unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_lock_file_name_is_hashed() {
        let path = lock_file_path(Path::new("/locks"), "../../etc/passwd");
        assert_eq!(path.parent(), Some(Path::new("/locks")));
        assert!(path.file_name().unwrap().to_string_lossy().ends_with(".lock"));
    }
}
