use super::{IndexEntry, VectorDatabase};
use crate::types::SearchResult;
use anyhow::Result;
use std::sync::RwLock;

/// Brute-force cosine index held in memory
#[derive(Default)]
pub struct InMemoryVectorDB {
    rows: RwLock<Vec<(Vec<f32>, IndexEntry)>>,
}

impl InMemoryVectorDB {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[async_trait::async_trait]
impl VectorDatabase for InMemoryVectorDB {
    async fn initialize(&self, _dimension: usize) -> Result<()> {
        Ok(())
    }

    async fn delete_by_files(&self, repo_id: &str, file_paths: &[String]) -> Result<usize> {
        if file_paths.is_empty() {
            return Ok(0);
        }
        let mut rows = self
            .rows
            .write()
            .map_err(|e| anyhow::anyhow!("Index lock poisoned: {}", e))?;
        let before = rows.len();
        rows.retain(|(_, entry)| {
            !(entry.repo_id == repo_id && file_paths.iter().any(|p| *p == entry.file_path))
        });
        Ok(before - rows.len())
    }

    async fn delete_repository(&self, repo_id: &str) -> Result<usize> {
        let mut rows = self
            .rows
            .write()
            .map_err(|e| anyhow::anyhow!("Index lock poisoned: {}", e))?;
        let before = rows.len();
        rows.retain(|(_, entry)| entry.repo_id != repo_id);
        Ok(before - rows.len())
    }

    async fn store_embeddings(
        &self,
        embeddings: Vec<Vec<f32>>,
        entries: Vec<IndexEntry>,
    ) -> Result<usize> {
        if embeddings.len() != entries.len() {
            anyhow::bail!(
                "{} embeddings for {} entries",
                embeddings.len(),
                entries.len()
            );
        }
        let count = entries.len();
        let mut rows = self
            .rows
            .write()
            .map_err(|e| anyhow::anyhow!("Index lock poisoned: {}", e))?;
        rows.extend(embeddings.into_iter().zip(entries));
        Ok(count)
    }

    async fn search(
        &self,
        query_vector: Vec<f32>,
        limit: usize,
        repo_id: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        let rows = self
            .rows
            .read()
            .map_err(|e| anyhow::anyhow!("Index lock poisoned: {}", e))?;

        let mut scored: Vec<SearchResult> = rows
            .iter()
            .filter(|(_, entry)| repo_id.is_none_or(|id| entry.repo_id == id))
            .map(|(vector, entry)| SearchResult {
                repo_id: entry.repo_id.clone(),
                file_path: entry.file_path.clone(),
                kind: entry.kind.clone(),
                name: entry.name.clone(),
                content: entry.content.clone(),
                score: cosine(&query_vector, vector),
                start_line: entry.start_line,
                end_line: entry.end_line,
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn entries_for_file(&self, repo_id: &str, file_path: &str) -> Result<Vec<IndexEntry>> {
        let rows = self
            .rows
            .read()
            .map_err(|e| anyhow::anyhow!("Index lock poisoned: {}", e))?;
        let mut entries: Vec<IndexEntry> = rows
            .iter()
            .filter(|(_, e)| e.repo_id == repo_id && e.file_path == file_path)
            .map(|(_, e)| e.clone())
            .collect();
        entries.sort_by_key(|e| e.start_line);
        Ok(entries)
    }

    async fn count(&self, repo_id: Option<&str>) -> Result<usize> {
        let rows = self
            .rows
            .read()
            .map_err(|e| anyhow::anyhow!("Index lock poisoned: {}", e))?;
        Ok(rows
            .iter()
            .filter(|(_, e)| repo_id.is_none_or(|id| e.repo_id == id))
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(repo: &str, file: &str, line: usize) -> IndexEntry {
        IndexEntry {
            repo_id: repo.to_string(),
            file_path: file.to_string(),
            kind: "function".to_string(),
            name: format!("f{}", line),
            start_line: line,
            end_line: line + 1,
            content: format!("def f{}(): pass", line),
        }
    }

    #[tokio::test]
    async fn test_delete_by_files_is_scoped_to_repo() {
        let db = InMemoryVectorDB::new();
        db.store_embeddings(
            vec![vec![1.0, 0.0]; 3],
            vec![entry("a", "x.py", 1), entry("a", "y.py", 1), entry("b", "x.py", 1)],
        )
        .await
        .unwrap();

        let deleted = db.delete_by_files("a", &["x.py".to_string()]).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(db.count(Some("a")).await.unwrap(), 1);
        assert_eq!(db.count(Some("b")).await.unwrap(), 1);
        assert_eq!(db.delete_by_files("a", &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_repository_leaves_other_repos() {
        let db = InMemoryVectorDB::new();
        db.store_embeddings(
            vec![vec![1.0, 0.0]; 3],
            vec![entry("a", "x.py", 1), entry("a", "y.py", 1), entry("b", "x.py", 1)],
        )
        .await
        .unwrap();

        assert_eq!(db.delete_repository("a").await.unwrap(), 2);
        assert_eq!(db.count(Some("a")).await.unwrap(), 0);
        assert_eq!(db.count(Some("b")).await.unwrap(), 1);
        assert_eq!(db.delete_repository("a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let db = InMemoryVectorDB::new();
        db.store_embeddings(
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            vec![entry("a", "x.py", 1), entry("a", "y.py", 5)],
        )
        .await
        .unwrap();

        let results = db.search(vec![0.1, 0.9], 10, None).await.unwrap();
        assert_eq!(results[0].file_path, "y.py");
        assert!(results[0].score > results[1].score);

        let limited = db.search(vec![1.0, 0.0], 1, Some("a")).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert!(db.search(vec![1.0, 0.0], 10, Some("zzz")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_lengths_rejected() {
        let db = InMemoryVectorDB::new();
        assert!(db.store_embeddings(vec![], vec![entry("a", "x.py", 1)]).await.is_err());
    }

    #[tokio::test]
    async fn test_entries_for_file_sorted() {
        let db = InMemoryVectorDB::new();
        db.store_embeddings(
            vec![vec![1.0]; 2],
            vec![entry("a", "x.py", 9), entry("a", "x.py", 2)],
        )
        .await
        .unwrap();
        let entries = db.entries_for_file("a", "x.py").await.unwrap();
        assert_eq!(entries.iter().map(|e| e.start_line).collect::<Vec<_>>(), vec![2, 9]);
    }
}
