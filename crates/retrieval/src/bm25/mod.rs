//! BM25 sparse retrieval
//!
//! Okapi BM25 over the passage store with metadata filters. The index is
//! built in one pass at startup and republished atomically on rebuild;
//! discrete add/remove notifications from the ingester are serialized
//! against concurrent searches through a reader-writer lock around an
//! `Arc` snapshot. Searches never fail fatally: an empty index yields an
//! empty result list.

pub mod index;
pub mod tokenize;

pub use index::{Bm25Index, Bm25Params};
pub use tokenize::tokenize;

use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ragpipe_core::{Error, Passage, PassageStore, Result, SearchFilters, SearchResult};

use crate::cache::ResultCache;

/// BM25 retriever configuration
#[derive(Debug, Clone)]
pub struct Bm25RetrieverConfig {
    /// Term frequency saturation parameter
    pub k1: f32,
    /// Document length normalization parameter
    pub b: f32,
    /// Cache scored results per query
    pub use_cache: bool,
    /// TTL for the query cache
    pub cache_ttl: Duration,
}

impl Default for Bm25RetrieverConfig {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            use_cache: true,
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

impl From<&ragpipe_config::Bm25Config> for Bm25RetrieverConfig {
    fn from(config: &ragpipe_config::Bm25Config) -> Self {
        Self {
            k1: config.k1,
            b: config.b,
            use_cache: config.use_cache,
            cache_ttl: Duration::from_secs(config.cache_ttl_s),
        }
    }
}

/// BM25 retriever over the passage store
pub struct Bm25Retriever {
    index: RwLock<Arc<Bm25Index>>,
    store: Arc<dyn PassageStore>,
    cache: Option<ResultCache>,
    params: Bm25Params,
}

impl Bm25Retriever {
    /// Create a retriever with an empty index. Call [`Self::rebuild`] to
    /// populate it from the store.
    pub fn new(config: Bm25RetrieverConfig, store: Arc<dyn PassageStore>) -> Self {
        let cache = config
            .use_cache
            .then(|| ResultCache::new(config.cache_ttl, 1000));

        Self {
            index: RwLock::new(Arc::new(Bm25Index::default())),
            store,
            cache,
            params: Bm25Params {
                k1: config.k1 as f64,
                b: config.b as f64,
            },
        }
    }

    /// Current index snapshot
    fn snapshot(&self) -> Arc<Bm25Index> {
        Arc::clone(&self.index.read())
    }

    /// Search using BM25.
    ///
    /// Candidates are the union of posting lists for the query terms;
    /// passages matching no term are excluded. Result text and metadata
    /// come from the passage store; ids the store no longer knows are
    /// logged and dropped.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<SearchResult>> {
        let start = Instant::now();

        let cache_key = ResultCache::key(query, k, filters, "bm25");
        if let Some(ref cache) = self.cache {
            if let Some(cached) = cache.get(cache_key) {
                tracing::debug!(query, "BM25 cache hit");
                return Ok(cached);
            }
        }

        let index = self.snapshot();
        if index.document_count() == 0 {
            return Ok(Vec::new());
        }

        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(String, f64)> = index
            .candidates(&query_terms)
            .into_iter()
            .filter(|id| filters.map_or(true, |f| index.matches_filters(id, f)))
            .map(|id| (id.to_string(), index.score(&query_terms, id, self.params)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);

        let mut results = Vec::with_capacity(scored.len());
        for (id, score) in scored {
            let passage = match self.store.get(&id).await {
                Ok(passage) => passage,
                Err(e) => {
                    tracing::warn!(id, error = %e, "dropping result without passage content");
                    continue;
                },
            };

            let mut result = SearchResult::new(id, passage.text, score as f32);
            for (key, value) in index
                .document_metadata
                .get(&result.id)
                .into_iter()
                .flatten()
            {
                result.metadata.insert(key.clone(), value.clone());
            }
            result.annotate("retrieval_method", "bm25");
            results.push(result);
        }

        if let Some(ref cache) = self.cache {
            cache.insert(cache_key, results.clone());
        }

        tracing::debug!(
            query,
            results = results.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "BM25 search completed"
        );

        Ok(results)
    }

    /// Index newly ingested passages.
    pub fn add_passages(&self, passages: &[Passage]) {
        let mut guard = self.index.write();
        let index = Arc::make_mut(&mut guard);
        for passage in passages {
            index.add(passage);
        }
        self.invalidate_cache();
    }

    /// Drop passages removed by the ingester.
    pub fn remove_passages(&self, ids: &[String]) {
        let mut guard = self.index.write();
        let index = Arc::make_mut(&mut guard);
        for id in ids {
            index.remove(id);
        }
        self.invalidate_cache();
    }

    /// Rebuild the index from the passage store.
    ///
    /// The replacement is built off-line and swapped in atomically, so
    /// concurrent searches keep reading a complete index throughout.
    /// Returns the number of indexed passages.
    pub async fn rebuild(&self) -> Result<usize> {
        let start = Instant::now();
        let passages = self.store.scan().await?;
        let fresh = Bm25Index::build(&passages);
        let count = fresh.document_count();
        let terms = fresh.term_count();

        *self.index.write() = Arc::new(fresh);
        self.invalidate_cache();

        tracing::info!(
            documents = count,
            terms,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "BM25 index rebuilt"
        );

        Ok(count)
    }

    /// Persist the current index snapshot for warm restarts.
    pub async fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let index = self.snapshot();
        let bytes = serde_json::to_vec(&*index)
            .map_err(|e| Error::Internal(format!("serialize index snapshot: {e}")))?;
        tokio::fs::write(path.as_ref(), bytes)
            .await
            .map_err(|e| Error::Internal(format!("write index snapshot: {e}")))?;

        tracing::info!(
            path = %path.as_ref().display(),
            documents = index.document_count(),
            "BM25 snapshot saved"
        );
        Ok(())
    }

    /// Restore the index from a snapshot written by [`Self::save_snapshot`].
    ///
    /// The snapshot is validated before it replaces the live index;
    /// callers fall back to [`Self::rebuild`] when loading fails.
    pub async fn load_snapshot(&self, path: impl AsRef<Path>) -> Result<usize> {
        let bytes = tokio::fs::read(path.as_ref())
            .await
            .map_err(|e| Error::NotFound(format!("index snapshot: {e}")))?;
        let index: Bm25Index = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Internal(format!("parse index snapshot: {e}")))?;
        index.validate().map_err(Error::Internal)?;

        let count = index.document_count();
        *self.index.write() = Arc::new(index);
        self.invalidate_cache();

        tracing::info!(
            path = %path.as_ref().display(),
            documents = count,
            "BM25 snapshot restored"
        );
        Ok(count)
    }

    fn invalidate_cache(&self) {
        if let Some(ref cache) = self.cache {
            cache.clear();
        }
    }

    /// Number of indexed passages
    pub fn document_count(&self) -> usize {
        self.snapshot().document_count()
    }

    /// Run the structural invariant checks against the live index.
    pub fn validate_index(&self) -> std::result::Result<(), String> {
        self.snapshot().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryPassageStore;

    fn store_with(passages: Vec<Passage>) -> Arc<InMemoryPassageStore> {
        let store = InMemoryPassageStore::new();
        store.insert_all(passages);
        Arc::new(store)
    }

    fn corpus() -> Vec<Passage> {
        let mut passages = vec![Passage::new(
            "c1",
            "d1",
            "Used car prices in Istanbul range from affordable to premium.",
            0,
        )];
        for i in 2..=10 {
            passages.push(Passage::new(
                format!("c{i}"),
                format!("d{i}"),
                format!("Completely unrelated passage number {i} about cooking and weather."),
                0,
            ));
        }
        passages
    }

    #[tokio::test]
    async fn test_keyword_query_ranks_matching_passage_first() {
        let store = store_with(corpus());
        let retriever = Bm25Retriever::new(Bm25RetrieverConfig::default(), store);
        retriever.rebuild().await.unwrap();

        let results = retriever.search("car price istanbul", 5, None).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].id, "c1");
        assert_eq!(results[0].metadata_str("retrieval_method"), Some("bm25"));
        assert!(results.iter().all(|r| r.score >= 0.0));
    }

    #[tokio::test]
    async fn test_empty_index_returns_empty() {
        let store = store_with(Vec::new());
        let retriever = Bm25Retriever::new(Bm25RetrieverConfig::default(), store);
        retriever.rebuild().await.unwrap();

        let results = retriever.search("anything", 5, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_no_term_match_is_excluded() {
        let store = store_with(corpus());
        let retriever = Bm25Retriever::new(Bm25RetrieverConfig::default(), store);
        retriever.rebuild().await.unwrap();

        let results = retriever.search("istanbul", 10, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "c1");
    }

    #[tokio::test]
    async fn test_document_id_filter() {
        let store = store_with(corpus());
        let retriever = Bm25Retriever::new(Bm25RetrieverConfig::default(), store);
        retriever.rebuild().await.unwrap();

        let mut filters = SearchFilters::new();
        filters.insert("document_id".into(), serde_json::json!("d2"));

        let results = retriever
            .search("passage cooking", 10, Some(&filters))
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.document_id() == Some("d2")));
    }

    #[tokio::test]
    async fn test_add_and_remove_maintain_invariants() {
        let store = store_with(corpus());
        let retriever = Bm25Retriever::new(Bm25RetrieverConfig::default(), store.clone());
        retriever.rebuild().await.unwrap();

        let extra = Passage::new("c11", "d11", "Electric car adoption in Istanbul grows.", 0);
        store.insert(extra.clone());
        retriever.add_passages(&[extra]);
        retriever.validate_index().unwrap();
        assert_eq!(retriever.document_count(), 11);

        let results = retriever.search("electric car", 5, None).await.unwrap();
        assert_eq!(results[0].id, "c11");

        retriever.remove_passages(&["c11".to_string()]);
        retriever.validate_index().unwrap();
        assert_eq!(retriever.document_count(), 10);
    }

    #[tokio::test]
    async fn test_rebuild_swaps_index() {
        let store = store_with(corpus());
        let retriever = Bm25Retriever::new(Bm25RetrieverConfig::default(), store.clone());
        retriever.rebuild().await.unwrap();
        assert_eq!(retriever.document_count(), 10);

        store.remove("c1");
        retriever.rebuild().await.unwrap();
        assert_eq!(retriever.document_count(), 9);
        retriever.validate_index().unwrap();

        let results = retriever.search("istanbul", 5, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_missing_store_content_is_dropped() {
        let store = store_with(corpus());
        let retriever = Bm25Retriever::new(Bm25RetrieverConfig::default(), store.clone());
        retriever.rebuild().await.unwrap();

        // The passage disappears from the store but stays indexed until
        // the next rebuild; search drops it instead of failing.
        store.remove("c1");
        let results = retriever
            .search("car price istanbul", 5, None)
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.id != "c1"));
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let store = store_with(corpus());
        let retriever = Bm25Retriever::new(Bm25RetrieverConfig::default(), store.clone());
        retriever.rebuild().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bm25.json");
        retriever.save_snapshot(&path).await.unwrap();

        // A fresh retriever restores the full index from disk.
        let restored = Bm25Retriever::new(Bm25RetrieverConfig::default(), store);
        let count = restored.load_snapshot(&path).await.unwrap();
        assert_eq!(count, 10);
        restored.validate_index().unwrap();

        let results = restored.search("car price istanbul", 5, None).await.unwrap();
        assert_eq!(results[0].id, "c1");
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_not_found() {
        let store = store_with(Vec::new());
        let retriever = Bm25Retriever::new(Bm25RetrieverConfig::default(), store);
        let err = retriever.load_snapshot("/nonexistent/bm25.json").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_query_cache_round_trip() {
        let store = store_with(corpus());
        let retriever = Bm25Retriever::new(Bm25RetrieverConfig::default(), store);
        retriever.rebuild().await.unwrap();

        let first = retriever.search("car price istanbul", 5, None).await.unwrap();
        let second = retriever.search("car price istanbul", 5, None).await.unwrap();
        assert_eq!(first, second);
    }
}
