use super::fs_lock::FsLockGuard;
use crate::error::{Result, SyncError};
use crate::types::{SyncReport, SyncState, SyncStep};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Persisted status of one repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSyncRecord {
    pub state: SyncState,
    #[serde(default)]
    pub last_report: Option<SyncReport>,
    /// Changed paths already pulled into the working copy whose index
    /// entries have not been rebuilt yet. Cleared only when a run completes.
    #[serde(default)]
    pub pending_paths: Vec<String>,
    /// RFC 3339 time of the last state change
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Per-repository sync state, single writer per repository.
///
/// State lives in memory behind a mutex and is mirrored to a JSON file on
/// every transition. States that were in flight when the file was written
/// (a crashed process) load as `error`.
pub struct SyncStateStore {
    path: PathBuf,
    lock_dir: PathBuf,
    records: Mutex<BTreeMap<String, RepoSyncRecord>>,
}

impl SyncStateStore {
    pub fn load(path: impl Into<PathBuf>, lock_dir: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut records: BTreeMap<String, RepoSyncRecord> = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| SyncError::StatePersist {
                path: path.display().to_string(),
                reason: format!("corrupt state file: {}", e),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        for (repo_id, record) in records.iter_mut() {
            if record.state.is_in_flight() {
                let step = record.state.step().unwrap_or(SyncStep::Detect);
                tracing::warn!(
                    "[{}] Found sync interrupted during {}; marking as error",
                    repo_id,
                    step
                );
                record.state = SyncState::Error {
                    step,
                    message: "sync interrupted before completion".to_string(),
                };
            }
        }

        tracing::debug!("Loaded sync state for {} repositories", records.len());
        Ok(Self {
            path,
            lock_dir: lock_dir.into(),
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self, repo_id: &str) -> SyncState {
        self.lock()
            .get(repo_id)
            .map(|r| r.state.clone())
            .unwrap_or_default()
    }

    pub fn record(&self, repo_id: &str) -> Option<RepoSyncRecord> {
        self.lock().get(repo_id).cloned()
    }

    /// Claim `repo_id` for a new run starting at `first_step`.
    ///
    /// Returns `Ok(None)` without touching any state when a run is already
    /// in flight, in this process or another.
    pub fn try_begin(self: &Arc<Self>, repo_id: &str, first_step: SyncStep) -> Result<Option<SyncTicket>> {
        let mut records = self.lock();

        if records
            .get(repo_id)
            .is_some_and(|r| r.state.is_in_flight())
        {
            tracing::info!("[{}] Sync rejected: already in flight", repo_id);
            return Ok(None);
        }

        let fs_lock = FsLockGuard::try_acquire(&self.lock_dir, repo_id)
            .map_err(|e| SyncError::LockFailed(format!("{:#}", e)))?;
        let Some(fs_lock) = fs_lock else {
            tracing::info!("[{}] Sync rejected: locked by another process", repo_id);
            return Ok(None);
        };

        let record = records.entry(repo_id.to_string()).or_default();
        record.state = first_step.running_state();
        record.updated_at = Some(chrono::Utc::now().to_rfc3339());
        let pending = record.pending_paths.clone();
        if !pending.is_empty() {
            tracing::info!(
                "[{}] {} paths pending from an unfinished sync",
                repo_id,
                pending.len()
            );
        }
        self.persist(&records);
        drop(records);

        Ok(Some(SyncTicket {
            store: Arc::clone(self),
            repo_id: repo_id.to_string(),
            step: first_step,
            pending,
            _fs_lock: fs_lock,
            finished: false,
        }))
    }

    fn transition(&self, repo_id: &str, state: SyncState, report: Option<SyncReport>) {
        let mut records = self.lock();
        let record = records.entry(repo_id.to_string()).or_default();
        tracing::debug!("[{}] {} -> {}", repo_id, record.state, state);
        if state == SyncState::Active {
            record.pending_paths.clear();
        }
        record.state = state;
        if report.is_some() {
            record.last_report = report;
        }
        record.updated_at = Some(chrono::Utc::now().to_rfc3339());
        self.persist(&records);
    }

    fn remove(&self, repo_id: &str) {
        let mut records = self.lock();
        if records.remove(repo_id).is_some() {
            tracing::debug!("[{}] Sync record removed", repo_id);
            self.persist(&records);
        }
    }

    fn set_pending(&self, repo_id: &str, paths: &[String]) {
        let mut records = self.lock();
        let record = records.entry(repo_id.to_string()).or_default();
        record.pending_paths = paths.to_vec();
        self.persist(&records);
    }

    /// Mirror `records` to disk. The in-memory state stays authoritative, so a
    /// failed write is logged rather than aborting the run.
    fn persist(&self, records: &BTreeMap<String, RepoSyncRecord>) {
        if let Err(e) = self.write_file(records) {
            tracing::warn!("{}", e);
        }
    }

    fn write_file(&self, records: &BTreeMap<String, RepoSyncRecord>) -> std::result::Result<(), SyncError> {
        let err = |reason: String| SyncError::StatePersist {
            path: self.path.display().to_string(),
            reason,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| err(e.to_string()))?;
        }
        let json = serde_json::to_vec_pretty(records).map_err(|e| err(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| err(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| err(e.to_string()))?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, RepoSyncRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Exclusive claim on one repository for the duration of a run.
///
/// Dropping a ticket that was neither completed nor failed marks the
/// repository as errored at the step it was in.
pub struct SyncTicket {
    store: Arc<SyncStateStore>,
    repo_id: String,
    step: SyncStep,
    pending: Vec<String>,
    _fs_lock: FsLockGuard,
    finished: bool,
}

impl SyncTicket {
    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub fn step(&self) -> SyncStep {
        self.step
    }

    /// Paths left over from an earlier run that failed after pulling
    pub fn pending_paths(&self) -> &[String] {
        &self.pending
    }

    /// Persist `paths` as pulled-but-not-indexed until this run completes
    pub fn record_pending(&mut self, paths: Vec<String>) {
        self.store.set_pending(&self.repo_id, &paths);
        self.pending = paths;
    }

    pub fn advance(&mut self, step: SyncStep) {
        self.step = step;
        self.store
            .transition(&self.repo_id, step.running_state(), None);
    }

    pub fn complete(mut self, report: SyncReport) {
        self.finished = true;
        self.store
            .transition(&self.repo_id, SyncState::Active, Some(report));
    }

    /// Drop every trace of the repository from the store; it reads as idle
    /// afterwards. Used when the repository itself is removed.
    pub fn forget(mut self) {
        self.finished = true;
        self.store.remove(&self.repo_id);
    }

    pub fn fail(mut self, message: impl Into<String>) {
        self.finished = true;
        let state = SyncState::Error {
            step: self.step,
            message: message.into(),
        };
        self.store.transition(&self.repo_id, state, None);
    }
}

impl Drop for SyncTicket {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                "[{}] Sync dropped during {} without finishing",
                self.repo_id,
                self.step
            );
            let state = SyncState::Error {
                step: self.step,
                message: "sync interrupted before completion".to_string(),
            };
            self.store.transition(&self.repo_id, state, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Arc<SyncStateStore> {
        Arc::new(
            SyncStateStore::load(dir.path().join("state.json"), dir.path().join("locks")).unwrap(),
        )
    }

    #[test]
    fn test_unknown_repo_is_idle() {
        let dir = TempDir::new().unwrap();
        assert_eq!(store(&dir).state("demo"), SyncState::Idle);
    }

    #[test]
    fn test_second_begin_rejected_while_in_flight() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut ticket = store.try_begin("demo", SyncStep::Detect).unwrap().unwrap();
        ticket.advance(SyncStep::Pull);
        assert!(store.try_begin("demo", SyncStep::Detect).unwrap().is_none());
        assert_eq!(store.state("demo"), SyncState::Pulling);

        // Other repositories are independent
        assert!(store.try_begin("other", SyncStep::Detect).unwrap().is_some());
    }

    #[test]
    fn test_complete_records_report_and_releases() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let ticket = store.try_begin("demo", SyncStep::Detect).unwrap().unwrap();
        ticket.complete(SyncReport {
            repo_id: "demo".to_string(),
            chunks_inserted: 4,
            ..Default::default()
        });

        let record = store.record("demo").unwrap();
        assert_eq!(record.state, SyncState::Active);
        assert_eq!(record.last_report.unwrap().chunks_inserted, 4);
        assert!(store.try_begin("demo", SyncStep::Detect).unwrap().is_some());
    }

    #[test]
    fn test_fail_records_step_and_message() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut ticket = store.try_begin("demo", SyncStep::Detect).unwrap().unwrap();
        ticket.advance(SyncStep::Invalidate);
        ticket.fail("index unavailable");

        assert_eq!(
            store.state("demo"),
            SyncState::Error {
                step: SyncStep::Invalidate,
                message: "index unavailable".to_string()
            }
        );
    }

    #[test]
    fn test_pending_paths_survive_failure_and_clear_on_completion() {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("state.json");
        {
            let store = store(&dir);
            let mut ticket = store.try_begin("demo", SyncStep::Detect).unwrap().unwrap();
            assert!(ticket.pending_paths().is_empty());
            ticket.record_pending(vec!["a.py".to_string(), "b.py".to_string()]);
            ticket.advance(SyncStep::Invalidate);
            ticket.fail("index unavailable");
        }

        let reloaded = Arc::new(SyncStateStore::load(&state_path, dir.path().join("locks")).unwrap());
        assert_eq!(
            reloaded.record("demo").unwrap().pending_paths,
            vec!["a.py".to_string(), "b.py".to_string()]
        );

        let ticket = reloaded.try_begin("demo", SyncStep::Detect).unwrap().unwrap();
        assert_eq!(ticket.pending_paths(), ["a.py".to_string(), "b.py".to_string()]);
        ticket.complete(SyncReport::default());
        assert!(reloaded.record("demo").unwrap().pending_paths.is_empty());
    }

    #[test]
    fn test_forget_removes_record_and_releases() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .try_begin("demo", SyncStep::Detect)
            .unwrap()
            .unwrap()
            .complete(SyncReport::default());

        let ticket = store.try_begin("demo", SyncStep::Invalidate).unwrap().unwrap();
        ticket.forget();

        assert!(store.record("demo").is_none());
        assert_eq!(store.state("demo"), SyncState::Idle);
        let reloaded = SyncStateStore::load(dir.path().join("state.json"), dir.path().join("locks")).unwrap();
        assert!(reloaded.record("demo").is_none());
        assert!(store.try_begin("demo", SyncStep::Detect).unwrap().is_some());
    }

    #[test]
    fn test_dropped_ticket_marks_error() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        {
            let mut ticket = store.try_begin("demo", SyncStep::Detect).unwrap().unwrap();
            ticket.advance(SyncStep::Reparse);
        }
        assert!(matches!(
            store.state("demo"),
            SyncState::Error {
                step: SyncStep::Reparse,
                ..
            }
        ));
    }

    #[test]
    fn test_state_persists_and_in_flight_becomes_error_on_reload() {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("state.json");
        {
            let store = store(&dir);
            let done = store.try_begin("done", SyncStep::Detect).unwrap().unwrap();
            done.complete(SyncReport::default());

            let mut running = store.try_begin("running", SyncStep::Detect).unwrap().unwrap();
            running.advance(SyncStep::Embed);
            // Simulate a crash: the ticket never finishes or drops
            std::mem::forget(running);
        }
        assert!(state_path.exists());

        let reloaded = SyncStateStore::load(&state_path, dir.path().join("locks2")).unwrap();
        assert_eq!(reloaded.state("done"), SyncState::Active);
        assert!(matches!(
            reloaded.state("running"),
            SyncState::Error {
                step: SyncStep::Embed,
                ..
            }
        ));
    }

    #[test]
    fn test_corrupt_state_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{oops").unwrap();
        assert!(SyncStateStore::load(&path, dir.path().join("locks")).is_err());
    }
}
