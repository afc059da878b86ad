mod fastembed_manager;
mod hash_embedder;

pub use fastembed_manager::FastEmbedManager;
pub use hash_embedder::HashEmbedder;

use anyhow::Result;
use std::sync::Arc;

/// Trait for embedding generation
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a batch of text
    fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Get the dimension of the embeddings
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Build the provider named in configuration. `"hash"` selects the offline
/// [`HashEmbedder`]; anything else is a FastEmbed model name.
pub fn provider_for(model_name: &str) -> Result<Arc<dyn EmbeddingProvider>> {
    if model_name == "hash" {
        return Ok(Arc::new(HashEmbedder::default()));
    }
    Ok(Arc::new(FastEmbedManager::from_model_name(model_name)?))
}
