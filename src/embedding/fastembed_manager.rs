use super::EmbeddingProvider;
use crate::error::EmbeddingError;
use anyhow::{Context, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Mutex;

/// FastEmbed-based embedding provider
pub struct FastEmbedManager {
    model: Mutex<TextEmbedding>,
    dimension: usize,
    model_name: String,
}

impl FastEmbedManager {
    /// Create a new FastEmbedManager with the default model (all-MiniLM-L6-v2)
    pub fn new() -> Result<Self> {
        Self::with_model(EmbeddingModel::AllMiniLML6V2)
    }

    /// Create a manager from a configured model name
    pub fn from_model_name(name: &str) -> Result<Self> {
        let model = match name {
            "all-MiniLM-L6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
                EmbeddingModel::AllMiniLML6V2
            }
            "all-MiniLM-L12-v2" | "sentence-transformers/all-MiniLM-L12-v2" => {
                EmbeddingModel::AllMiniLML12V2
            }
            "BAAI/bge-small-en-v1.5" | "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "BAAI/bge-base-en-v1.5" | "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
            other => return Err(EmbeddingError::UnknownModel(other.to_string()).into()),
        };
        Self::with_model(model)
    }

    /// Create a new FastEmbedManager with a specific model
    pub fn with_model(model: EmbeddingModel) -> Result<Self> {
        tracing::info!("Initializing FastEmbed model: {:?}", model);

        let (dimension, model_name) = match model {
            EmbeddingModel::AllMiniLML6V2 => (384, "all-MiniLM-L6-v2"),
            EmbeddingModel::AllMiniLML12V2 => (384, "all-MiniLM-L12-v2"),
            EmbeddingModel::BGEBaseENV15 => (768, "BAAI/bge-base-en-v1.5"),
            EmbeddingModel::BGESmallENV15 => (384, "BAAI/bge-small-en-v1.5"),
            _ => (384, "unknown"),
        };

        let mut options = InitOptions::default();
        options.model_name = model;
        options.show_download_progress = true;

        let embedding_model =
            TextEmbedding::try_new(options).context("Failed to initialize FastEmbed model")?;

        Ok(Self {
            model: Mutex::new(embedding_model),
            dimension,
            model_name: model_name.to_string(),
        })
    }
}

impl EmbeddingProvider for FastEmbedManager {
    fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut model = self
            .model
            .lock()
            .map_err(|e| anyhow::anyhow!("Embedding model lock poisoned: {}", e))?;
        let embeddings = model
            .embed(texts, None)
            .context("Failed to generate embeddings")?;

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_name_rejected() {
        let err = FastEmbedManager::from_model_name("definitely-not-a-model")
            .err()
            .unwrap();
        assert!(err.to_string().contains("Unknown embedding model"));
    }

    // The following download model weights on first run
    #[test]
    #[ignore]
    fn test_embedding_generation() {
        let manager = FastEmbedManager::new().unwrap();
        let texts = vec![
            "def main():\n    print('hello')".to_string(),
            "class Vector:\n    x: float".to_string(),
        ];

        let embeddings = manager.embed_batch(texts).unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), 384);
    }

    #[test]
    #[ignore]
    fn test_empty_batch() {
        let manager = FastEmbedManager::new().unwrap();
        assert!(manager.embed_batch(vec![]).unwrap().is_empty());
    }

    #[test]
    #[ignore]
    fn test_from_model_name_bge_base() {
        let manager = FastEmbedManager::from_model_name("BAAI/bge-base-en-v1.5").unwrap();
        assert_eq!(manager.dimension(), 768);
        assert_eq!(manager.model_name(), "BAAI/bge-base-en-v1.5");
    }
}
