//! Library client for lineage-rag
//!
//! [`LineageClient`] is the composition root: it owns the repository
//! registry, sync state, sync engine, embedder and derived index, and exposes
//! every caller-facing operation.

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{EmbeddingError, LineageError, Result, SyncError, ValidationError, VectorDbError};
use crate::git::{
    ChangeSetDetector, GitCommandRunner, GitRevisionStore, RepositoryRegistry, TextDecoder,
    UpstreamSource, normalize_repo_path,
};
use crate::history::HistoryTracker;
use crate::indexer::{Reparser, StructuralChunker, StructuralLocator};
use crate::sync::{EmbedSettings, SyncEngine, SyncStateStore};
use crate::types::*;
use crate::vector_db::{InMemoryVectorDB, LanceVectorDB, VectorDatabase};
use std::sync::Arc;
use std::time::Duration;

/// Main client for tracing history and keeping the derived index in sync
///
/// # Example
///
/// ```no_run
/// use lineage_rag::{Config, ConstructQuery, LineageClient};
///
/// #[tokio::main]
/// async fn main() -> lineage_rag::Result<()> {
///     let client = LineageClient::with_config(Config::new()?).await?;
///
///     let history = client
///         .trace_history("demo", "src/app.py", Some(ConstructQuery::function("main")))
///         .await?;
///     for record in history {
///         println!("{} {}", record.commit.short_hash(), record.commit.message);
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct LineageClient {
    config: Arc<Config>,
    registry: Arc<RepositoryRegistry>,
    states: Arc<SyncStateStore>,
    engine: Arc<SyncEngine>,
    embedder: Arc<dyn EmbeddingProvider>,
    vector_db: Arc<dyn VectorDatabase>,
    decoder: TextDecoder,
    locator: StructuralLocator,
}

impl LineageClient {
    /// Create a client with default configuration and environment overrides
    pub async fn new() -> Result<Self> {
        Self::with_config(Config::new()?).await
    }

    /// Create a client whose upstream, embedder and index are built from `config`
    pub async fn with_config(config: Config) -> Result<Self> {
        config.validate()?;
        tracing::info!("Initializing lineage client");
        tracing::debug!("Vector DB backend: {}", config.vector_db.backend);
        tracing::debug!("Embedding model: {}", config.embedding.model_name);

        let embedder = embedding::provider_for(&config.embedding.model_name)
            .map_err(|e| EmbeddingError::InitializationFailed(format!("{:#}", e)))?;

        let vector_db: Arc<dyn VectorDatabase> = match config.vector_db.backend.as_str() {
            "memory" => {
                tracing::info!("Using in-memory vector index");
                Arc::new(InMemoryVectorDB::new())
            }
            _ => {
                tracing::info!(
                    "Using LanceDB vector database backend at {}",
                    config.vector_db.lancedb_path.display()
                );
                Arc::new(
                    LanceVectorDB::with_path(
                        &config.vector_db.lancedb_path.to_string_lossy(),
                        &config.vector_db.table_name,
                    )
                    .await
                    .map_err(|e| VectorDbError::InitializationFailed(format!("{:#}", e)))?,
                )
            }
        };
        vector_db
            .initialize(embedder.dimension())
            .await
            .map_err(|e| VectorDbError::InitializationFailed(format!("{:#}", e)))?;

        let upstream = Arc::new(ChangeSetDetector::new(
            GitCommandRunner::from_secs(config.git.command_timeout_secs),
            config.git.remote.clone(),
            config.git.branch.clone(),
        ));

        Self::with_components(config, upstream, embedder, vector_db)
    }

    /// Assemble a client from already-constructed parts.
    ///
    /// `vector_db` must already be initialized for `embedder`'s dimension.
    pub fn with_components(
        config: Config,
        upstream: Arc<dyn UpstreamSource>,
        embedder: Arc<dyn EmbeddingProvider>,
        vector_db: Arc<dyn VectorDatabase>,
    ) -> Result<Self> {
        let decoder = TextDecoder::from_labels(&config.history.encodings)?;
        let locator = StructuralLocator::default();

        let registry = Arc::new(RepositoryRegistry::new(
            config.repositories.base_path.clone(),
            GitCommandRunner::from_secs(config.git.command_timeout_secs),
        ));
        let states = Arc::new(SyncStateStore::load(
            config.state.state_path.clone(),
            config.state.lock_dir.clone(),
        )?);

        let reparser = Arc::new(Reparser::new(
            StructuralChunker::new(locator.language().clone()),
            decoder.clone(),
            config.repositories.parsed_path.clone(),
        ));
        let settings = EmbedSettings {
            batch_size: config.embedding.batch_size,
            timeout: Duration::from_secs(config.embedding.timeout_secs),
            max_parallel_files: config.embedding.max_parallel_files,
        };
        let engine = Arc::new(SyncEngine::new(
            upstream,
            reparser,
            Arc::clone(&embedder),
            Arc::clone(&vector_db),
            settings,
        ));

        Ok(Self {
            config: Arc::new(config),
            registry,
            states,
            engine,
            embedder,
            vector_db,
            decoder,
            locator,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn embedding_dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Ids of every local checkout under the configured base path
    pub fn list_repositories(&self) -> Result<Vec<String>> {
        self.registry.list()
    }

    /// Start a sync of `repo_id` in the background.
    ///
    /// Returns immediately. A repository that is already syncing is
    /// rejected and its in-flight state is left untouched.
    pub async fn trigger_sync(&self, repo_id: &str) -> Result<TriggerResponse> {
        let repo_path = self.registry.resolve(repo_id)?;
        let Some(ticket) = self.states.try_begin(repo_id, SyncStep::Detect)? else {
            return Ok(TriggerResponse::Rejected {
                reason: RejectReason::AlreadySyncing,
            });
        };

        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            engine.run_sync(ticket, &repo_path).await;
        });
        Ok(TriggerResponse::Accepted)
    }

    /// Run a sync of `repo_id` to completion
    pub async fn run_sync(&self, repo_id: &str) -> Result<SyncOutcome> {
        let repo_path = self.registry.resolve(repo_id)?;
        let ticket = self
            .states
            .try_begin(repo_id, SyncStep::Detect)?
            .ok_or_else(|| SyncError::AlreadySyncing(repo_id.to_string()))?;
        Ok(self.engine.run_sync(ticket, &repo_path).await)
    }

    /// Reparse the whole checkout and re-embed every parsed file
    pub async fn index_repository(&self, repo_id: &str) -> Result<SyncOutcome> {
        let repo_path = self.registry.resolve(repo_id)?;
        let ticket = self
            .states
            .try_begin(repo_id, SyncStep::Reparse)?
            .ok_or_else(|| SyncError::AlreadySyncing(repo_id.to_string()))?;
        Ok(self.engine.run_full_index(ticket, &repo_path).await)
    }

    pub fn sync_state(&self, repo_id: &str) -> SyncState {
        self.states.state(repo_id)
    }

    /// Report of the last successful sync or index, if any
    pub fn last_report(&self, repo_id: &str) -> Option<SyncReport> {
        self.states.record(repo_id).and_then(|r| r.last_report)
    }

    /// Change history of `path` in `repo_id`, newest first.
    ///
    /// With no query the whole file is tracked.
    pub async fn trace_history(
        &self,
        repo_id: &str,
        path: &str,
        query: Option<ConstructQuery>,
    ) -> Result<Vec<ChangeRecord>> {
        let repo_path = self.registry.resolve(repo_id)?;
        let path = normalize_repo_path(path)?;
        if let Some(query) = &query {
            query.validate()?;
        }

        let decoder = self.decoder.clone();
        let locator = self.locator.clone();
        tokio::task::spawn_blocking(move || {
            let store = GitRevisionStore::open(&repo_path, decoder)?;
            HistoryTracker::new(store, locator).trace(&path, query.as_ref())
        })
        .await
        .map_err(|e| LineageError::other(format!("History task failed: {}", e)))?
    }

    /// Clone `url` into the repository base path
    pub async fn clone_repository(&self, url: &str, name: Option<&str>) -> Result<CloneResult> {
        self.registry.clone_repository(url, name).await
    }

    /// Remove `repo_id` entirely: its index entries, parsed artifacts,
    /// sync record and local checkout.
    ///
    /// Holds the repository's sync claim throughout, so it is rejected
    /// while a sync is in flight.
    pub async fn delete_repository(&self, repo_id: &str) -> Result<DeleteResult> {
        self.registry.resolve(repo_id)?;
        let ticket = self
            .states
            .try_begin(repo_id, SyncStep::Invalidate)?
            .ok_or_else(|| SyncError::AlreadySyncing(repo_id.to_string()))?;

        let removal = async {
            let entries_deleted = self
                .vector_db
                .delete_repository(repo_id)
                .await
                .map_err(|e| VectorDbError::InvalidationFailed(format!("{:#}", e)))?;
            self.engine.reparser().remove_artifacts(repo_id)?;

            let registry = Arc::clone(&self.registry);
            let id = repo_id.to_string();
            let path = tokio::task::spawn_blocking(move || registry.remove_checkout(&id))
                .await
                .map_err(|e| LineageError::other(format!("Delete task failed: {}", e)))??;
            Ok::<_, LineageError>((entries_deleted, path))
        };

        match removal.await {
            Ok((entries_deleted, path)) => {
                ticket.forget();
                tracing::info!("[{}] Repository deleted ({} index entries)", repo_id, entries_deleted);
                Ok(DeleteResult {
                    repo_id: repo_id.to_string(),
                    path: path.to_string_lossy().to_string(),
                    entries_deleted,
                })
            }
            Err(e) => {
                tracing::error!("[{}] Repository deletion failed: {}", repo_id, e);
                ticket.fail(e.to_string());
                Err(e)
            }
        }
    }

    pub async fn repository_status(&self, repo_id: &str) -> Result<RepositoryStatus> {
        let registry = Arc::clone(&self.registry);
        let id = repo_id.to_string();
        let status = tokio::task::spawn_blocking(move || registry.working_copy_status(&id))
            .await
            .map_err(|e| LineageError::other(format!("Status task failed: {}", e)))??;

        Ok(RepositoryStatus {
            repo_id: repo_id.to_string(),
            branch: status.branch,
            head_commit: status.head_commit,
            is_dirty: status.is_dirty,
            sync_state: self.sync_state(repo_id),
        })
    }

    /// Nearest chunks to `query`, optionally within one repository
    pub async fn search(&self, repo_id: Option<&str>, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Err(ValidationError::Empty("query".to_string()).into());
        }
        if let Some(repo_id) = repo_id {
            RepositoryRegistry::validate_repo_id(repo_id)?;
        }

        let provider = Arc::clone(&self.embedder);
        let text = query.to_string();
        let mut vectors = tokio::task::spawn_blocking(move || provider.embed_batch(vec![text]))
            .await
            .map_err(|e| EmbeddingError::GenerationFailed(e.to_string()))?
            .map_err(|e| EmbeddingError::GenerationFailed(format!("{:#}", e)))?;
        let query_vector = vectors
            .pop()
            .ok_or_else(|| EmbeddingError::GenerationFailed("no embedding generated".to_string()))?;

        let results = self
            .vector_db
            .search(query_vector, limit, repo_id)
            .await
            .map_err(|e| VectorDbError::SearchFailed(format!("{:#}", e)))?;
        tracing::debug!("Search returned {} results", results.len());
        Ok(results)
    }
}
