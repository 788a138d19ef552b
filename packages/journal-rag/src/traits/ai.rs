//! Model provider traits.
//!
//! The pipeline needs two capabilities from the outside world:
//! - `LanguageModel`: prompt completion for classification and synthesis
//! - `Embedder`: fixed-dimension vectors for semantic ranking
//!
//! Implementations are shared across queries behind `Arc` and must be
//! usable concurrently.

use async_trait::async_trait;

use crate::error::Result;

/// Text completion.
///
/// Implementations wrap a specific provider (OpenAI-compatible server, local
/// model, test double) and return the raw reply text; parsing is the
/// caller's job.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete `prompt`, producing at most `max_tokens` tokens.
    async fn complete(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String>;

    /// Model name for logs.
    fn model_name(&self) -> &str {
        "unknown"
    }
}

/// Text embedding.
///
/// Must be deterministic: the same text always yields the same vector, and
/// every vector has exactly [`Embedder::dimension`] components.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Number of components in every embedding.
    fn dimension(&self) -> usize;

    /// Generate embeddings for multiple texts.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }
}
