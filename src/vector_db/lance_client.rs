//! LanceDB vector database client

use crate::types::SearchResult;
use crate::vector_db::{IndexEntry, VectorDatabase, file_filter, sql_literal};
use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
    UInt32Array, types::Float32Type,
};
use arrow_schema::{DataType, Field, Schema};
use futures::stream::TryStreamExt;
use lancedb::Table;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use std::sync::Arc;

/// LanceDB vector database implementation (embedded, no server required)
pub struct LanceVectorDB {
    connection: Connection,
    table_name: String,
    db_path: String,
}

impl LanceVectorDB {
    /// Create a new LanceDB instance with default path and table
    pub async fn new() -> Result<Self> {
        let db_path = Self::default_lancedb_path();
        Self::with_path(&db_path, "code_chunks").await
    }

    /// Create a new LanceDB instance with custom path and table name
    pub async fn with_path(db_path: &str, table_name: &str) -> Result<Self> {
        tracing::info!("Connecting to LanceDB at: {}", db_path);

        let connection = lancedb::connect(db_path)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self {
            connection,
            table_name: table_name.to_string(),
            db_path: db_path.to_string(),
        })
    }

    /// Get default database path (public for CLI version info)
    pub fn default_lancedb_path() -> String {
        crate::paths::PlatformPaths::default_lancedb_path()
            .to_string_lossy()
            .to_string()
    }

    /// Create schema for the chunk table
    fn create_schema(dimension: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension as i32,
                ),
                false,
            ),
            Field::new("id", DataType::Utf8, false),
            Field::new("repo_id", DataType::Utf8, false),
            Field::new("file_path", DataType::Utf8, false),
            Field::new("kind", DataType::Utf8, false),
            Field::new("name", DataType::Utf8, false),
            Field::new("start_line", DataType::UInt32, false),
            Field::new("end_line", DataType::UInt32, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("indexed_at", DataType::Utf8, false),
        ]))
    }

    async fn get_table(&self) -> Result<Table> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .context("Failed to open table")
    }

    /// Convert embeddings and entries to a RecordBatch
    fn create_record_batch(
        embeddings: Vec<Vec<f32>>,
        entries: &[IndexEntry],
        schema: Arc<Schema>,
    ) -> Result<RecordBatch> {
        let dimension = embeddings.first().map(|v| v.len()).unwrap_or(0);
        let indexed_at = chrono::Utc::now().to_rfc3339();

        let vector_array = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            embeddings
                .into_iter()
                .map(|v| Some(v.into_iter().map(Some))),
            dimension as i32,
        );

        let strings = |f: fn(&IndexEntry) -> &str| {
            StringArray::from(entries.iter().map(f).collect::<Vec<_>>())
        };

        let id_array = StringArray::from(
            entries
                .iter()
                .map(|e| format!("{}:{}:{}", e.repo_id, e.file_path, e.start_line))
                .collect::<Vec<_>>(),
        );
        let start_line_array =
            UInt32Array::from(entries.iter().map(|e| e.start_line as u32).collect::<Vec<_>>());
        let end_line_array =
            UInt32Array::from(entries.iter().map(|e| e.end_line as u32).collect::<Vec<_>>());
        let indexed_at_array = StringArray::from(vec![indexed_at.as_str(); entries.len()]);

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(vector_array),
                Arc::new(id_array),
                Arc::new(strings(|e| e.repo_id.as_str())),
                Arc::new(strings(|e| e.file_path.as_str())),
                Arc::new(strings(|e| e.kind.as_str())),
                Arc::new(strings(|e| e.name.as_str())),
                Arc::new(start_line_array),
                Arc::new(end_line_array),
                Arc::new(strings(|e| e.content.as_str())),
                Arc::new(indexed_at_array),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    /// Read entry columns out of a result batch
    fn entries_from_batch(batch: &RecordBatch) -> Result<Vec<IndexEntry>> {
        let string_col = |name: &str| -> Result<&StringArray> {
            batch
                .column_by_name(name)
                .with_context(|| format!("Missing {} column", name))?
                .as_any()
                .downcast_ref::<StringArray>()
                .with_context(|| format!("Invalid {} type", name))
        };
        let u32_col = |name: &str| -> Result<&UInt32Array> {
            batch
                .column_by_name(name)
                .with_context(|| format!("Missing {} column", name))?
                .as_any()
                .downcast_ref::<UInt32Array>()
                .with_context(|| format!("Invalid {} type", name))
        };

        let repo_ids = string_col("repo_id")?;
        let files = string_col("file_path")?;
        let kinds = string_col("kind")?;
        let names = string_col("name")?;
        let contents = string_col("content")?;
        let starts = u32_col("start_line")?;
        let ends = u32_col("end_line")?;

        Ok((0..batch.num_rows())
            .map(|i| IndexEntry {
                repo_id: repo_ids.value(i).to_string(),
                file_path: files.value(i).to_string(),
                kind: kinds.value(i).to_string(),
                name: names.value(i).to_string(),
                start_line: starts.value(i) as usize,
                end_line: ends.value(i) as usize,
                content: contents.value(i).to_string(),
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl VectorDatabase for LanceVectorDB {
    async fn initialize(&self, dimension: usize) -> Result<()> {
        tracing::info!(
            "Initializing LanceDB with dimension {} at {}",
            dimension,
            self.db_path
        );

        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;

        if table_names.contains(&self.table_name) {
            tracing::info!("Table '{}' already exists", self.table_name);
            return Ok(());
        }

        let schema = Self::create_schema(dimension);
        let empty_batch = RecordBatch::new_empty(schema.clone());
        let batches =
            RecordBatchIterator::new(vec![empty_batch].into_iter().map(Ok), schema.clone());

        self.connection
            .create_table(&self.table_name, Box::new(batches))
            .execute()
            .await
            .context("Failed to create table")?;

        tracing::info!("Created table '{}'", self.table_name);
        Ok(())
    }

    async fn delete_by_files(&self, repo_id: &str, file_paths: &[String]) -> Result<usize> {
        if file_paths.is_empty() {
            return Ok(0);
        }

        let table = self.get_table().await?;
        let filter = file_filter(repo_id, file_paths);

        // LanceDB's delete does not report a row count
        let existing = table
            .count_rows(Some(filter.clone()))
            .await
            .context("Failed to count entries to delete")?;

        table
            .delete(&filter)
            .await
            .context("Failed to delete records")?;

        tracing::info!(
            "[{}] Deleted {} entries across {} files",
            repo_id,
            existing,
            file_paths.len()
        );
        Ok(existing)
    }

    async fn delete_repository(&self, repo_id: &str) -> Result<usize> {
        let table = self.get_table().await?;
        let filter = format!("repo_id = {}", sql_literal(repo_id));

        let existing = table
            .count_rows(Some(filter.clone()))
            .await
            .context("Failed to count entries to delete")?;
        table
            .delete(&filter)
            .await
            .context("Failed to delete repository records")?;

        tracing::info!("[{}] Deleted all {} entries", repo_id, existing);
        Ok(existing)
    }

    async fn store_embeddings(
        &self,
        embeddings: Vec<Vec<f32>>,
        entries: Vec<IndexEntry>,
    ) -> Result<usize> {
        if embeddings.is_empty() {
            return Ok(0);
        }
        if embeddings.len() != entries.len() {
            anyhow::bail!(
                "{} embeddings for {} entries",
                embeddings.len(),
                entries.len()
            );
        }

        let schema = Self::create_schema(embeddings[0].len());
        let batch = Self::create_record_batch(embeddings, &entries, schema.clone())?;
        let count = batch.num_rows();
        let batches = RecordBatchIterator::new(vec![batch].into_iter().map(Ok), schema);

        self.get_table()
            .await?
            .add(Box::new(batches))
            .execute()
            .await
            .context("Failed to add records to table")?;

        tracing::debug!("Stored {} embeddings", count);
        Ok(count)
    }

    async fn search(
        &self,
        query_vector: Vec<f32>,
        limit: usize,
        repo_id: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        let table = self.get_table().await?;

        let query = table
            .vector_search(query_vector)
            .context("Failed to create vector search")?
            .limit(limit);
        let query = match repo_id {
            Some(id) => query.only_if(format!("repo_id = {}", sql_literal(id))),
            None => query,
        };

        let batches: Vec<RecordBatch> = query
            .execute()
            .await
            .context("Failed to execute search")?
            .try_collect()
            .await
            .context("Failed to collect search results")?;

        let mut results = Vec::new();
        for batch in &batches {
            let distances = batch
                .column_by_name("_distance")
                .context("Missing _distance column")?
                .as_any()
                .downcast_ref::<Float32Array>()
                .context("Invalid _distance type")?;

            for (i, entry) in Self::entries_from_batch(batch)?.into_iter().enumerate() {
                let distance = if distances.is_null(i) {
                    f32::MAX
                } else {
                    distances.value(i)
                };
                results.push(SearchResult {
                    repo_id: entry.repo_id,
                    file_path: entry.file_path,
                    kind: entry.kind,
                    name: entry.name,
                    content: entry.content,
                    score: 1.0 / (1.0 + distance),
                    start_line: entry.start_line,
                    end_line: entry.end_line,
                });
            }
        }

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(results)
    }

    async fn entries_for_file(&self, repo_id: &str, file_path: &str) -> Result<Vec<IndexEntry>> {
        let table = self.get_table().await?;
        let batches: Vec<RecordBatch> = table
            .query()
            .only_if(file_filter(repo_id, &[file_path.to_string()]))
            .execute()
            .await
            .context("Failed to query entries")?
            .try_collect()
            .await
            .context("Failed to collect entries")?;

        let mut entries = Vec::new();
        for batch in &batches {
            entries.extend(Self::entries_from_batch(batch)?);
        }
        entries.sort_by_key(|e| e.start_line);
        Ok(entries)
    }

    async fn count(&self, repo_id: Option<&str>) -> Result<usize> {
        let table = self.get_table().await?;
        let filter = repo_id.map(|id| format!("repo_id = {}", sql_literal(id)));
        table
            .count_rows(filter)
            .await
            .context("Failed to count rows")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(file: &str, line: usize) -> IndexEntry {
        IndexEntry {
            repo_id: "demo".to_string(),
            file_path: file.to_string(),
            kind: "function".to_string(),
            name: format!("f{}", line),
            start_line: line,
            end_line: line + 2,
            content: format!("def f{}():\n    pass", line),
        }
    }

    async fn open(dir: &TempDir) -> LanceVectorDB {
        let path = dir.path().join("lance");
        let db = LanceVectorDB::with_path(path.to_str().unwrap(), "chunks")
            .await
            .unwrap();
        db.initialize(4).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_store_and_delete_by_files() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;

        let stored = db
            .store_embeddings(
                vec![vec![1.0, 0.0, 0.0, 0.0]; 3],
                vec![entry("a.py", 1), entry("a.py", 10), entry("it's.py", 1)],
            )
            .await
            .unwrap();
        assert_eq!(stored, 3);
        assert_eq!(db.count(Some("demo")).await.unwrap(), 3);

        let deleted = db
            .delete_by_files("demo", &["a.py".to_string(), "it's.py".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(db.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_entries_for_file_and_search() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        db.store_embeddings(
            vec![vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0]],
            vec![entry("a.py", 7), entry("b.py", 1)],
        )
        .await
        .unwrap();

        let entries = db.entries_for_file("demo", "a.py").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].start_line, 7);

        let results = db
            .search(vec![0.0, 1.0, 0.0, 0.0], 5, Some("demo"))
            .await
            .unwrap();
        assert_eq!(results[0].file_path, "b.py");
        assert!(db.search(vec![0.0; 4], 5, Some("other")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_repository_is_scoped() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        let mut other = entry("a.py", 1);
        other.repo_id = "other".to_string();
        db.store_embeddings(
            vec![vec![1.0, 0.0, 0.0, 0.0]; 3],
            vec![entry("a.py", 1), entry("b.py", 1), other],
        )
        .await
        .unwrap();

        assert_eq!(db.delete_repository("demo").await.unwrap(), 2);
        assert_eq!(db.count(Some("demo")).await.unwrap(), 0);
        assert_eq!(db.count(Some("other")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        db.initialize(4).await.unwrap();
        assert_eq!(db.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_with_no_files_is_noop() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        assert_eq!(db.delete_by_files("demo", &[]).await.unwrap(), 0);
    }
}
