// LanceDB is the default embedded vector database
pub mod lance_client;
pub use lance_client::LanceVectorDB;

// In-process index for offline runs and tests
pub mod memory_client;
pub use memory_client::InMemoryVectorDB;

use crate::indexer::ParsedChunk;
use crate::types::SearchResult;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// One chunk in the derived index, tagged with its repository and source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub repo_id: String,
    pub file_path: String,
    pub kind: String,
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
}

impl IndexEntry {
    pub fn from_chunk(repo_id: &str, chunk: &ParsedChunk) -> Self {
        Self {
            repo_id: repo_id.to_string(),
            file_path: chunk.file_path.clone(),
            kind: chunk.kind.as_str().to_string(),
            name: chunk.name.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            content: chunk.code.clone(),
        }
    }
}

/// Trait for vector database operations
#[async_trait::async_trait]
pub trait VectorDatabase: Send + Sync {
    /// Initialize the database and create tables if needed
    async fn initialize(&self, dimension: usize) -> Result<()>;

    /// Delete every entry of `repo_id` whose source file is in `file_paths`,
    /// in one request. Returns the number of entries removed.
    async fn delete_by_files(&self, repo_id: &str, file_paths: &[String]) -> Result<usize>;

    /// Delete every entry of `repo_id`. Returns the number of entries removed.
    async fn delete_repository(&self, repo_id: &str) -> Result<usize>;

    /// Store embeddings with their entries
    async fn store_embeddings(
        &self,
        embeddings: Vec<Vec<f32>>,
        entries: Vec<IndexEntry>,
    ) -> Result<usize>;

    /// Nearest entries to `query_vector`, optionally restricted to one repository
    async fn search(
        &self,
        query_vector: Vec<f32>,
        limit: usize,
        repo_id: Option<&str>,
    ) -> Result<Vec<SearchResult>>;

    /// Entries currently stored for one source file, ordered by start line
    async fn entries_for_file(&self, repo_id: &str, file_path: &str) -> Result<Vec<IndexEntry>>;

    /// Number of entries, optionally restricted to one repository
    async fn count(&self, repo_id: Option<&str>) -> Result<usize>;
}

/// Quote a string literal for a SQL-like filter
pub(crate) fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `repo_id = '..' AND file_path IN ('..', ..)`
pub(crate) fn file_filter(repo_id: &str, file_paths: &[String]) -> String {
    let list = file_paths
        .iter()
        .map(|p| sql_literal(p))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "repo_id = {} AND file_path IN ({})",
        sql_literal(repo_id),
        list
    )
}
