use super::*;
use crate::embedding::{EmbeddingProvider, HashEmbedder};
use crate::error::{GitError, Result};
use crate::git::{ChangeSet, TextDecoder, UpstreamSource};
use crate::indexer::{Reparser, StructuralChunker};
use crate::types::{SearchResult, SyncOutcome, SyncState, SyncStep};
use crate::vector_db::{InMemoryVectorDB, IndexEntry, VectorDatabase};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Upstream that reports a fixed change set and applies `files` on fast-forward
struct FakeUpstream {
    change_set: ChangeSet,
    files: Vec<(String, Option<String>)>,
    detect_error: Option<String>,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeUpstream {
    fn new(paths: &[&str]) -> Self {
        Self {
            change_set: ChangeSet {
                upstream_commit: "abc123".to_string(),
                paths: paths.iter().map(|p| p.to_string()).collect(),
            },
            files: Vec::new(),
            detect_error: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn writes(mut self, path: &str, content: &str) -> Self {
        self.files.push((path.to_string(), Some(content.to_string())));
        self
    }

    fn deletes(mut self, path: &str) -> Self {
        self.files.push((path.to_string(), None));
        self
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpstreamSource for FakeUpstream {
    async fn detect(&self, _repo_path: &Path) -> Result<ChangeSet> {
        self.calls.lock().unwrap().push("detect");
        if let Some(stderr) = &self.detect_error {
            return Err(GitError::CommandFailed {
                command: "fetch --quiet origin".to_string(),
                stderr: stderr.clone(),
            }
            .into());
        }
        Ok(self.change_set.clone())
    }

    async fn fast_forward(&self, repo_path: &Path, change_set: &ChangeSet) -> Result<()> {
        assert_eq!(change_set, &self.change_set);
        self.calls.lock().unwrap().push("fast_forward");
        for (rel, content) in &self.files {
            let path = repo_path.join(rel);
            match content {
                Some(content) => {
                    std::fs::create_dir_all(path.parent().unwrap())?;
                    std::fs::write(path, content)?;
                }
                None => std::fs::remove_file(path)?,
            }
        }
        Ok(())
    }
}

/// In-memory index whose deletes fail while `failing` is set
struct FlakyIndex {
    inner: InMemoryVectorDB,
    failing: AtomicBool,
}

impl FlakyIndex {
    fn new(failing: bool) -> Self {
        Self {
            inner: InMemoryVectorDB::new(),
            failing: AtomicBool::new(failing),
        }
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl VectorDatabase for FlakyIndex {
    async fn initialize(&self, dimension: usize) -> anyhow::Result<()> {
        self.inner.initialize(dimension).await
    }

    async fn delete_by_files(&self, repo_id: &str, file_paths: &[String]) -> anyhow::Result<usize> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("index unavailable");
        }
        self.inner.delete_by_files(repo_id, file_paths).await
    }

    async fn delete_repository(&self, repo_id: &str) -> anyhow::Result<usize> {
        self.inner.delete_repository(repo_id).await
    }

    async fn store_embeddings(&self, embeddings: Vec<Vec<f32>>, entries: Vec<IndexEntry>) -> anyhow::Result<usize> {
        self.inner.store_embeddings(embeddings, entries).await
    }

    async fn search(&self, query_vector: Vec<f32>, limit: usize, repo_id: Option<&str>) -> anyhow::Result<Vec<SearchResult>> {
        self.inner.search(query_vector, limit, repo_id).await
    }

    async fn entries_for_file(&self, repo_id: &str, file_path: &str) -> anyhow::Result<Vec<IndexEntry>> {
        self.inner.entries_for_file(repo_id, file_path).await
    }

    async fn count(&self, repo_id: Option<&str>) -> anyhow::Result<usize> {
        self.inner.count(repo_id).await
    }
}

struct Harness {
    _dir: TempDir,
    repo: PathBuf,
    store: Arc<SyncStateStore>,
    reparser: Arc<Reparser>,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        let store = Arc::new(
            SyncStateStore::load(dir.path().join("state.json"), dir.path().join("locks")).unwrap(),
        );
        let reparser = Arc::new(Reparser::new(
            StructuralChunker::default(),
            TextDecoder::default(),
            dir.path().join("parsed"),
        ));
        Self {
            _dir: dir,
            repo,
            store,
            reparser,
        }
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.repo.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn engine(&self, upstream: Arc<dyn UpstreamSource>, vector_db: Arc<dyn VectorDatabase>) -> SyncEngine {
        SyncEngine::new(
            upstream,
            Arc::clone(&self.reparser),
            Arc::new(HashEmbedder::default()) as Arc<dyn EmbeddingProvider>,
            vector_db,
            EmbedSettings::default(),
        )
    }
}

async fn seeded_index(harness: &Harness, db: Arc<dyn VectorDatabase>) {
    let engine = harness.engine(Arc::new(FakeUpstream::new(&[])), db);
    let ticket = harness.store.try_begin("demo", SyncStep::Reparse).unwrap().unwrap();
    let outcome = engine.run_full_index(ticket, &harness.repo).await;
    assert!(outcome.is_completed(), "{:?}", outcome);
}

#[tokio::test]
async fn test_full_index_embeds_every_parsed_file() {
    let harness = Harness::new();
    harness.write("a.py", "def foo():\n    return 1\n\ndef bar():\n    return 2\n");
    harness.write("pkg/b.py", "X = 1\n");
    let db = Arc::new(InMemoryVectorDB::new());

    seeded_index(&harness, db.clone()).await;

    assert_eq!(db.count(Some("demo")).await.unwrap(), 3);
    let record = harness.store.record("demo").unwrap();
    assert_eq!(record.state, SyncState::Active);
    let report = record.last_report.unwrap();
    assert_eq!(report.files_reembedded, 2);
    assert_eq!(report.chunks_inserted, 3);
}

#[tokio::test]
async fn test_full_index_twice_does_not_duplicate() {
    let harness = Harness::new();
    harness.write("a.py", "def foo():\n    return 1\n");
    let db = Arc::new(InMemoryVectorDB::new());

    seeded_index(&harness, db.clone()).await;
    seeded_index(&harness, db.clone()).await;

    assert_eq!(db.count(Some("demo")).await.unwrap(), 1);
}

#[tokio::test]
async fn test_sync_with_no_changes_still_reaches_active() {
    let harness = Harness::new();
    harness.write("a.py", "def foo():\n    return 1\n");
    let db = Arc::new(InMemoryVectorDB::new());
    seeded_index(&harness, db.clone()).await;

    let upstream = Arc::new(FakeUpstream::new(&[]));
    let engine = harness.engine(upstream.clone(), db.clone());
    let ticket = harness.store.try_begin("demo", SyncStep::Detect).unwrap().unwrap();
    let outcome = engine.run_sync(ticket, &harness.repo).await;

    let report = outcome.report().unwrap();
    assert!(report.changed_paths.is_empty());
    assert_eq!(report.entries_deleted, 0);
    assert_eq!(report.files_reembedded, 0);
    assert_eq!(upstream.calls(), vec!["detect", "fast_forward"]);
    assert_eq!(harness.store.state("demo"), SyncState::Active);
    assert_eq!(db.count(Some("demo")).await.unwrap(), 1);
}

#[tokio::test]
async fn test_sync_replaces_entries_of_changed_files_only() {
    let harness = Harness::new();
    harness.write("a.py", "def foo():\n    return 1\n");
    harness.write("b.py", "def untouched():\n    pass\n");
    let db = Arc::new(InMemoryVectorDB::new());
    seeded_index(&harness, db.clone()).await;

    let upstream = Arc::new(
        FakeUpstream::new(&["a.py"])
            .writes("a.py", "def foo():\n    return 2\n\ndef baz():\n    return 3\n"),
    );
    let engine = harness.engine(upstream, db.clone());
    let ticket = harness.store.try_begin("demo", SyncStep::Detect).unwrap().unwrap();
    let outcome = engine.run_sync(ticket, &harness.repo).await;

    let report = outcome.report().unwrap();
    assert_eq!(report.changed_paths, vec!["a.py".to_string()]);
    assert_eq!(report.entries_deleted, 1);
    assert_eq!(report.chunks_inserted, 2);

    let a = db.entries_for_file("demo", "a.py").await.unwrap();
    let names: Vec<&str> = a.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["foo", "baz"]);
    assert!(a[0].content.contains("return 2"));

    let b = db.entries_for_file("demo", "b.py").await.unwrap();
    assert_eq!(b.len(), 1);
}

#[tokio::test]
async fn test_deleted_file_is_invalidated_and_skipped() {
    let harness = Harness::new();
    harness.write("a.py", "def foo():\n    return 1\n");
    harness.write("gone.py", "def old():\n    pass\n");
    let db = Arc::new(InMemoryVectorDB::new());
    seeded_index(&harness, db.clone()).await;

    let upstream = Arc::new(FakeUpstream::new(&["gone.py"]).deletes("gone.py"));
    let engine = harness.engine(upstream, db.clone());
    let ticket = harness.store.try_begin("demo", SyncStep::Detect).unwrap().unwrap();
    let outcome = engine.run_sync(ticket, &harness.repo).await;

    let report = outcome.report().unwrap();
    assert_eq!(report.skipped_missing_artifacts, vec!["gone.py".to_string()]);
    assert_eq!(report.files_reembedded, 0);
    assert!(db.entries_for_file("demo", "gone.py").await.unwrap().is_empty());
    assert_eq!(db.count(Some("demo")).await.unwrap(), 1);
}

#[tokio::test]
async fn test_detect_failure_records_error_and_skips_later_steps() {
    let harness = Harness::new();
    let mut upstream = FakeUpstream::new(&["a.py"]);
    upstream.detect_error = Some("fatal: unable to access remote".to_string());
    let upstream = Arc::new(upstream);
    let engine = harness.engine(upstream.clone(), Arc::new(InMemoryVectorDB::new()));

    let ticket = harness.store.try_begin("demo", SyncStep::Detect).unwrap().unwrap();
    let outcome = engine.run_sync(ticket, &harness.repo).await;

    let SyncOutcome::Failed(failure) = outcome else {
        panic!("expected failure");
    };
    assert_eq!(failure.step, SyncStep::Detect);
    assert!(failure.message.contains("fatal: unable to access remote"));
    assert_eq!(upstream.calls(), vec!["detect"]);
    assert!(!harness.reparser.artifact_dir("demo").exists());
    assert!(matches!(
        harness.store.state("demo"),
        SyncState::Error {
            step: SyncStep::Detect,
            ..
        }
    ));
}

#[tokio::test]
async fn test_invalidation_failure_stops_before_reparse() {
    let harness = Harness::new();
    harness.write("a.py", "def foo():\n    return 1\n");
    let db = Arc::new(FlakyIndex::new(true));
    let engine = harness.engine(Arc::new(FakeUpstream::new(&["a.py"])), db.clone());

    let ticket = harness.store.try_begin("demo", SyncStep::Detect).unwrap().unwrap();
    let outcome = engine.run_sync(ticket, &harness.repo).await;

    let SyncOutcome::Failed(failure) = outcome else {
        panic!("expected failure");
    };
    assert_eq!(failure.step, SyncStep::Invalidate);
    assert!(failure.message.contains("index unavailable"));
    assert!(!harness.reparser.artifact_dir("demo").exists());
    assert_eq!(db.count(None).await.unwrap(), 0);

    // A failed run releases the repository for the next request
    assert!(harness.store.try_begin("demo", SyncStep::Detect).unwrap().is_some());
}

#[tokio::test]
async fn test_full_index_drops_entries_of_removed_files() {
    let harness = Harness::new();
    harness.write("a.py", "def foo():\n    return 1\n");
    harness.write("gone.py", "def old():\n    pass\n");
    let db = Arc::new(InMemoryVectorDB::new());
    seeded_index(&harness, db.clone()).await;
    assert_eq!(db.entries_for_file("demo", "gone.py").await.unwrap().len(), 1);

    std::fs::remove_file(harness.repo.join("gone.py")).unwrap();
    seeded_index(&harness, db.clone()).await;

    assert!(db.entries_for_file("demo", "gone.py").await.unwrap().is_empty());
    assert_eq!(db.count(Some("demo")).await.unwrap(), 1);
    let report = harness.store.record("demo").unwrap().last_report.unwrap();
    assert_eq!(report.paths_invalidated, 2);
    assert_eq!(report.files_reembedded, 1);
}

#[tokio::test]
async fn test_retry_after_failure_past_pull_reindexes_pulled_paths() {
    let harness = Harness::new();
    harness.write("a.py", "def foo():\n    return 1\n");
    let db = Arc::new(FlakyIndex::new(false));
    seeded_index(&harness, db.clone()).await;

    db.set_failing(true);
    let pulled = Arc::new(FakeUpstream::new(&["a.py"]).writes("a.py", "def foo():\n    return 2\n"));
    let ticket = harness.store.try_begin("demo", SyncStep::Detect).unwrap().unwrap();
    let outcome = harness.engine(pulled, db.clone()).run_sync(ticket, &harness.repo).await;
    assert!(!outcome.is_completed());
    assert_eq!(
        harness.store.record("demo").unwrap().pending_paths,
        vec!["a.py".to_string()]
    );

    // The working copy already matches upstream, so detection finds nothing
    db.set_failing(false);
    let caught_up = Arc::new(FakeUpstream::new(&[]));
    let ticket = harness.store.try_begin("demo", SyncStep::Detect).unwrap().unwrap();
    let outcome = harness.engine(caught_up, db.clone()).run_sync(ticket, &harness.repo).await;

    let report = outcome.report().unwrap();
    assert_eq!(report.changed_paths, vec!["a.py".to_string()]);
    assert_eq!(report.entries_deleted, 1);
    let entries = db.entries_for_file("demo", "a.py").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].content.contains("return 2"));

    let record = harness.store.record("demo").unwrap();
    assert_eq!(record.state, SyncState::Active);
    assert!(record.pending_paths.is_empty());
}
