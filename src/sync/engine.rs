use super::state::SyncTicket;
use crate::embedding::EmbeddingProvider;
use crate::error::{EmbeddingError, LineageError, Result, VectorDbError};
use crate::git::UpstreamSource;
use crate::indexer::{ParsedChunk, ReparseSummary, Reparser};
use crate::types::{SyncFailure, SyncOutcome, SyncReport, SyncStep};
use crate::vector_db::{IndexEntry, VectorDatabase};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Embedding knobs used by the embed step
#[derive(Debug, Clone)]
pub struct EmbedSettings {
    pub batch_size: usize,
    pub timeout: Duration,
    pub max_parallel_files: usize,
}

impl Default for EmbedSettings {
    fn default() -> Self {
        Self {
            batch_size: 32,
            timeout: Duration::from_secs(30),
            max_parallel_files: 4,
        }
    }
}

enum FileEmbed {
    Inserted(usize),
    MissingArtifact,
}

/// Staged pipeline that brings the derived index back in line with upstream.
///
/// Steps run strictly in order: detect, pull, invalidate, reparse, embed.
/// The first failing step ends the run and is recorded on the ticket; there
/// are no automatic retries.
pub struct SyncEngine {
    upstream: Arc<dyn UpstreamSource>,
    reparser: Arc<Reparser>,
    embedder: Arc<dyn EmbeddingProvider>,
    vector_db: Arc<dyn VectorDatabase>,
    settings: EmbedSettings,
}

impl SyncEngine {
    pub fn new(
        upstream: Arc<dyn UpstreamSource>,
        reparser: Arc<Reparser>,
        embedder: Arc<dyn EmbeddingProvider>,
        vector_db: Arc<dyn VectorDatabase>,
        settings: EmbedSettings,
    ) -> Self {
        Self {
            upstream,
            reparser,
            embedder,
            vector_db,
            settings,
        }
    }

    pub fn reparser(&self) -> &Reparser {
        &self.reparser
    }

    /// Incremental sync of `repo_path` against upstream.
    /// `ticket` must have been claimed at [`SyncStep::Detect`].
    pub async fn run_sync(&self, mut ticket: SyncTicket, repo_path: &Path) -> SyncOutcome {
        let started = Instant::now();
        let mut report = SyncReport {
            repo_id: ticket.repo_id().to_string(),
            ..Default::default()
        };

        let result = self.sync_steps(&mut ticket, repo_path, &mut report).await;
        self.finish(ticket, report, started, result)
    }

    /// Full (re)index: reparse everything and re-embed every parsed file.
    /// `ticket` must have been claimed at [`SyncStep::Reparse`].
    pub async fn run_full_index(&self, mut ticket: SyncTicket, repo_path: &Path) -> SyncOutcome {
        let started = Instant::now();
        let mut report = SyncReport {
            repo_id: ticket.repo_id().to_string(),
            ..Default::default()
        };

        let result = self
            .full_index_steps(&mut ticket, repo_path, &mut report)
            .await;
        self.finish(ticket, report, started, result)
    }

    fn finish(
        &self,
        ticket: SyncTicket,
        mut report: SyncReport,
        started: Instant,
        result: Result<()>,
    ) -> SyncOutcome {
        match result {
            Ok(()) => {
                report.duration_ms = started.elapsed().as_millis() as u64;
                tracing::info!(
                    "[{}] Sync complete: {} paths invalidated ({} entries), {} files re-embedded ({} chunks) in {}ms",
                    report.repo_id,
                    report.paths_invalidated,
                    report.entries_deleted,
                    report.files_reembedded,
                    report.chunks_inserted,
                    report.duration_ms
                );
                ticket.complete(report.clone());
                SyncOutcome::Completed(report)
            }
            Err(e) => {
                let step = ticket.step();
                let message = e.to_string();
                tracing::error!("[{}] Sync failed during {}: {}", report.repo_id, step, message);
                ticket.fail(message.clone());
                SyncOutcome::Failed(SyncFailure { step, message })
            }
        }
    }

    async fn sync_steps(&self, ticket: &mut SyncTicket, repo_path: &Path, report: &mut SyncReport) -> Result<()> {
        let repo_id = ticket.repo_id().to_string();

        tracing::info!("[{}] Detecting upstream changes", repo_id);
        let change_set = self.upstream.detect(repo_path).await?;

        // HEAD already sits on the commit an earlier failed run pulled, so
        // its paths no longer show up in the diff and must be carried over.
        let paths = merge_paths(&change_set.paths, ticket.pending_paths());
        if paths.len() > change_set.len() {
            tracing::info!(
                "[{}] Carrying over {} paths from an unfinished sync",
                repo_id,
                paths.len() - change_set.len()
            );
        }
        ticket.record_pending(paths.clone());
        report.changed_paths = paths.clone();

        ticket.advance(SyncStep::Pull);
        self.upstream.fast_forward(repo_path, &change_set).await?;

        ticket.advance(SyncStep::Invalidate);
        if paths.is_empty() {
            tracing::info!("[{}] No changed paths; invalidation skipped", repo_id);
        } else {
            report.entries_deleted = self.invalidate(&repo_id, &paths).await?;
            report.paths_invalidated = paths.len();
        }

        ticket.advance(SyncStep::Reparse);
        let summary = self.reparse(&repo_id, repo_path).await?;
        report.files_reparsed = summary.files;
        report.chunks_reparsed = summary.chunks;

        ticket.advance(SyncStep::Embed);
        if paths.is_empty() {
            tracing::info!("[{}] No changed paths; embedding skipped", repo_id);
        } else {
            self.embed_paths(&repo_id, &paths, report).await?;
        }

        Ok(())
    }

    async fn full_index_steps(&self, ticket: &mut SyncTicket, repo_path: &Path, report: &mut SyncReport) -> Result<()> {
        let repo_id = ticket.repo_id().to_string();

        // Artifacts from the previous reparse name every file that may still
        // have entries, including files removed since then.
        let previous = self.reparser.list_artifacts(&repo_id)?;

        let summary = self.reparse(&repo_id, repo_path).await?;
        report.files_reparsed = summary.files;
        report.chunks_reparsed = summary.chunks;

        ticket.advance(SyncStep::Invalidate);
        let files = self.reparser.list_artifacts(&repo_id)?;
        let stale = merge_paths(&merge_paths(&files, &previous), ticket.pending_paths());
        report.entries_deleted = self.invalidate(&repo_id, &stale).await?;
        report.paths_invalidated = stale.len();

        ticket.advance(SyncStep::Embed);
        self.embed_paths(&repo_id, &files, report).await?;
        Ok(())
    }

    async fn invalidate(&self, repo_id: &str, paths: &[String]) -> Result<usize> {
        if paths.is_empty() {
            return Ok(0);
        }
        let deleted = self
            .vector_db
            .delete_by_files(repo_id, paths)
            .await
            .map_err(|e| VectorDbError::InvalidationFailed(format!("{:#}", e)))?;
        tracing::info!(
            "[{}] Invalidated {} entries for {} paths",
            repo_id,
            deleted,
            paths.len()
        );
        Ok(deleted)
    }

    async fn reparse(&self, repo_id: &str, repo_path: &Path) -> Result<ReparseSummary> {
        let reparser = Arc::clone(&self.reparser);
        let repo_id = repo_id.to_string();
        let repo_path: PathBuf = repo_path.to_path_buf();
        tokio::task::spawn_blocking(move || reparser.reparse_repository(&repo_id, &repo_path))
            .await
            .map_err(|e| LineageError::other(format!("Reparse task failed: {}", e)))?
    }

    /// Re-embed the freshly parsed chunks of `paths`, several files at a time
    async fn embed_paths(&self, repo_id: &str, paths: &[String], report: &mut SyncReport) -> Result<()> {
        let results: Vec<(String, Result<FileEmbed>)> = stream::iter(paths.iter().cloned())
            .map(|path| async move {
                let outcome = self.embed_file(repo_id, &path).await;
                (path, outcome)
            })
            .buffer_unordered(self.settings.max_parallel_files.max(1))
            .collect()
            .await;

        let mut first_error = None;
        for (path, outcome) in results {
            match outcome {
                Ok(FileEmbed::Inserted(count)) => {
                    report.files_reembedded += 1;
                    report.chunks_inserted += count;
                }
                Ok(FileEmbed::MissingArtifact) => {
                    tracing::warn!(
                        "[{}] No parsed artifact for changed path {}; skipping",
                        repo_id,
                        path
                    );
                    report.skipped_missing_artifacts.push(path);
                }
                Err(e) => {
                    tracing::error!("[{}] Failed to embed {}: {}", repo_id, path, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        report.skipped_missing_artifacts.sort();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn embed_file(&self, repo_id: &str, path: &str) -> Result<FileEmbed> {
        let Some(chunks) = self.reparser.load_artifact(repo_id, path)? else {
            return Ok(FileEmbed::MissingArtifact);
        };

        let mut inserted = 0;
        for batch in chunks.chunks(self.settings.batch_size.max(1)) {
            inserted += self.embed_batch(repo_id, batch).await?;
        }
        tracing::debug!("[{}] Re-embedded {} ({} chunks)", repo_id, path, inserted);
        Ok(FileEmbed::Inserted(inserted))
    }

    async fn embed_batch(&self, repo_id: &str, batch: &[ParsedChunk]) -> Result<usize> {
        let texts: Vec<String> = batch.iter().map(|c| c.code.clone()).collect();
        let provider = Arc::clone(&self.embedder);
        let embed_future = tokio::task::spawn_blocking(move || provider.embed_batch(texts));

        let embeddings = match tokio::time::timeout(self.settings.timeout, embed_future).await {
            Ok(Ok(Ok(embeddings))) => embeddings,
            Ok(Ok(Err(e))) => return Err(EmbeddingError::GenerationFailed(format!("{:#}", e)).into()),
            Ok(Err(e)) => return Err(EmbeddingError::GenerationFailed(e.to_string()).into()),
            Err(_) => return Err(EmbeddingError::Timeout(self.settings.timeout.as_secs()).into()),
        };

        let entries = batch
            .iter()
            .map(|chunk| IndexEntry::from_chunk(repo_id, chunk))
            .collect();
        self.vector_db
            .store_embeddings(embeddings, entries)
            .await
            .map_err(|e| VectorDbError::InsertFailed(format!("{:#}", e)).into())
    }
}

/// `first` followed by the entries of `second` it lacks, order preserved
fn merge_paths(first: &[String], second: &[String]) -> Vec<String> {
    let mut seen: HashSet<&str> = first.iter().map(String::as_str).collect();
    let mut merged = first.to_vec();
    for path in second {
        if seen.insert(path.as_str()) {
            merged.push(path.clone());
        }
    }
    merged
}
