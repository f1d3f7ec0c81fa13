//! Vector retriever adapter

use async_trait::async_trait;

use crate::{Result, SearchFilters, SearchResult};

/// Dense nearest-neighbor retrieval over an external vector store.
///
/// The adapter owns the embedding model and the ANN index. Returned scores
/// are bounded in [0, 1] with higher = more similar; adapters convert if the
/// underlying store reports a distance.
#[async_trait]
pub trait VectorSearcher: Send + Sync {
    /// Retrieve the `k` most similar passages for a query text
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<SearchResult>>;

    /// Adapter name for logging and annotations
    fn name(&self) -> &str;
}
