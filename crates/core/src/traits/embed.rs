//! Embedding adapter

use async_trait::async_trait;

use crate::Result;

/// Dense embedding interface. Owned by the vector-store adapter; the core
/// never interprets the vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, preserving order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Output dimension
    fn dimension(&self) -> usize;
}
