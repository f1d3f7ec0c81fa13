//! Cross-encoder adapter

use async_trait::async_trait;

use crate::Result;

/// Joint query-passage scoring.
///
/// Callers always pass a flat slice of `(query, passage)` pairs; the
/// adapter slices it into batches of `batch_size` itself, so no nested
/// batch shape ever crosses this boundary.
#[async_trait]
pub trait CrossEncoderScorer: Send + Sync {
    /// Score each pair; the output has one score per input pair, in order.
    async fn score(&self, pairs: &[(String, String)], batch_size: usize) -> Result<Vec<f32>>;

    /// Adapter name for logging and annotations
    fn name(&self) -> &str;

    /// Whether the underlying model is loaded. When false the reranker
    /// passes candidates through unchanged.
    fn is_loaded(&self) -> bool {
        true
    }
}
