//! Hybrid retrieval
//!
//! Runs the dense and sparse retrievers concurrently and fuses their
//! results by weighted min-max-normalized scores. A failed or timed-out
//! branch contributes an empty list; the other side still answers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ragpipe_core::{Result, SearchFilters, SearchResult, VectorSearcher};

use crate::bm25::Bm25Retriever;

/// Min-max normalize scores into [0, 1]. If every score is equal, all
/// normalized scores are 0.
pub fn normalize_scores(scores: &[f32]) -> Vec<f32> {
    let Some(&first) = scores.first() else {
        return Vec::new();
    };

    let (min, max) = scores.iter().fold((first, first), |(min, max), &s| {
        (min.min(s), max.max(s))
    });

    if (max - min).abs() < f32::EPSILON {
        return vec![0.0; scores.len()];
    }

    scores.iter().map(|&s| (s - min) / (max - min)).collect()
}

struct FusedEntry {
    result: SearchResult,
    dense_score: Option<f32>,
    sparse_score: Option<f32>,
    dense_norm: f32,
    sparse_norm: f32,
}

/// Hybrid retriever fusing dense and sparse search
pub struct HybridRetriever {
    alpha: f32,
    bm25: Arc<Bm25Retriever>,
    vector: Arc<dyn VectorSearcher>,
    adapter_timeout: Duration,
}

impl HybridRetriever {
    /// Create a hybrid retriever. `alpha` weights the dense side; the
    /// sparse side gets `1 - alpha`.
    pub fn new(
        alpha: f32,
        bm25: Arc<Bm25Retriever>,
        vector: Arc<dyn VectorSearcher>,
        adapter_timeout: Duration,
    ) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            bm25,
            vector,
            adapter_timeout,
        }
    }

    /// Run both retrievers with the same `k` and filters, then fuse.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<SearchResult>> {
        let dense_fut = async {
            match tokio::time::timeout(
                self.adapter_timeout,
                self.vector.similarity_search(query, k, filters),
            )
            .await
            {
                Ok(Ok(results)) => results,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "dense branch failed, continuing sparse-only");
                    Vec::new()
                },
                Err(_) => {
                    tracing::warn!(
                        adapter = self.vector.name(),
                        timeout_ms = self.adapter_timeout.as_millis() as u64,
                        "dense branch timed out, continuing sparse-only"
                    );
                    metrics::counter!("retrieval_adapter_timeouts", "adapter" => "vector")
                        .increment(1);
                    Vec::new()
                },
            }
        };

        let sparse_fut = async {
            match self.bm25.search(query, k, filters).await {
                Ok(results) => results,
                Err(e) => {
                    tracing::warn!(error = %e, "sparse branch failed, continuing dense-only");
                    Vec::new()
                },
            }
        };

        let (dense, sparse) = tokio::join!(dense_fut, sparse_fut);

        Ok(self.fuse(dense, sparse))
    }

    /// Fuse two result lists: `fused = α·n_dense + (1-α)·n_sparse`, with 0
    /// for the missing side. Ties break by higher dense score, then
    /// lexicographic passage id.
    pub fn fuse(&self, dense: Vec<SearchResult>, sparse: Vec<SearchResult>) -> Vec<SearchResult> {
        let dense_norms = normalize_scores(&dense.iter().map(|r| r.score).collect::<Vec<_>>());
        let sparse_norms = normalize_scores(&sparse.iter().map(|r| r.score).collect::<Vec<_>>());

        let mut entries: HashMap<String, FusedEntry> = HashMap::new();

        for (result, norm) in dense.into_iter().zip(dense_norms) {
            entries.insert(
                result.id.clone(),
                FusedEntry {
                    dense_score: Some(result.score),
                    sparse_score: None,
                    dense_norm: norm,
                    sparse_norm: 0.0,
                    result,
                },
            );
        }

        for (result, norm) in sparse.into_iter().zip(sparse_norms) {
            match entries.get_mut(&result.id) {
                Some(entry) => {
                    entry.sparse_score = Some(result.score);
                    entry.sparse_norm = norm;
                },
                None => {
                    entries.insert(
                        result.id.clone(),
                        FusedEntry {
                            dense_score: None,
                            sparse_score: Some(result.score),
                            dense_norm: 0.0,
                            sparse_norm: norm,
                            result,
                        },
                    );
                },
            }
        }

        let mut fused: Vec<(f32, f32, SearchResult)> = entries
            .into_values()
            .map(|entry| {
                let FusedEntry {
                    mut result,
                    dense_score,
                    sparse_score,
                    dense_norm,
                    sparse_norm,
                } = entry;

                let score = self.alpha * dense_norm + (1.0 - self.alpha) * sparse_norm;

                result.annotate("retrieval_method", "hybrid");
                result.annotate(
                    "boosting",
                    serde_json::json!({
                        "dense_score": dense_score,
                        "sparse_score": sparse_score,
                        "dense_norm": dense_norm,
                        "sparse_norm": sparse_norm,
                    }),
                );
                result.score = score;

                (score, dense_score.unwrap_or(f32::NEG_INFINITY), result)
            })
            .collect();

        fused.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.2.id.cmp(&b.2.id))
        });

        fused.into_iter().map(|(_, _, result)| result).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bm25::Bm25RetrieverConfig;
    use crate::store::InMemoryPassageStore;
    use async_trait::async_trait;
    use ragpipe_core::Passage;

    struct StaticVectorSearcher {
        results: Vec<SearchResult>,
    }

    #[async_trait]
    impl VectorSearcher for StaticVectorSearcher {
        async fn similarity_search(
            &self,
            _query: &str,
            k: usize,
            _filters: Option<&SearchFilters>,
        ) -> Result<Vec<SearchResult>> {
            Ok(self.results.iter().take(k).cloned().collect())
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    fn retriever_with(alpha: f32, dense: Vec<SearchResult>) -> HybridRetriever {
        let store = Arc::new(InMemoryPassageStore::new());
        let bm25 = Arc::new(Bm25Retriever::new(Bm25RetrieverConfig::default(), store));
        HybridRetriever::new(
            alpha,
            bm25,
            Arc::new(StaticVectorSearcher { results: dense }),
            Duration::from_secs(1),
        )
    }

    fn results(specs: &[(&str, f32)]) -> Vec<SearchResult> {
        specs
            .iter()
            .map(|(id, score)| SearchResult::new(*id, format!("text {id}"), *score))
            .collect()
    }

    #[test]
    fn test_normalize_scores() {
        let normalized = normalize_scores(&[0.5, 1.0, 0.0, 0.75]);
        assert_eq!(normalized[1], 1.0);
        assert_eq!(normalized[2], 0.0);
        assert!(normalized[0] > 0.0 && normalized[0] < 1.0);

        // All-equal scores normalize to zero.
        assert_eq!(normalize_scores(&[0.5, 0.5, 0.5]), vec![0.0, 0.0, 0.0]);
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_alpha_one_preserves_dense_ordering() {
        let retriever = retriever_with(1.0, Vec::new());
        let dense = results(&[("v1", 0.9), ("v2", 0.6), ("v3", 0.3)]);
        let sparse = results(&[("b1", 12.0), ("v2", 8.0)]);

        let fused = retriever.fuse(dense, sparse);
        let dense_positions: Vec<&str> = fused
            .iter()
            .filter(|r| ["v1", "v2", "v3"].contains(&r.id.as_str()))
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(dense_positions, vec!["v1", "v2", "v3"]);
        // Sparse-only results carry zero weight at alpha = 1.
        let b1 = fused.iter().find(|r| r.id == "b1").unwrap();
        assert_eq!(b1.score, 0.0);
    }

    #[test]
    fn test_alpha_zero_preserves_sparse_ordering() {
        let retriever = retriever_with(0.0, Vec::new());
        let dense = results(&[("v1", 0.9), ("v2", 0.6)]);
        let sparse = results(&[("b1", 12.0), ("b2", 8.0), ("b3", 2.0)]);

        let fused = retriever.fuse(dense, sparse);
        let sparse_positions: Vec<&str> = fused
            .iter()
            .filter(|r| ["b1", "b2", "b3"].contains(&r.id.as_str()))
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(sparse_positions, vec!["b1", "b2", "b3"]);
    }

    #[test]
    fn test_overlapping_id_gets_both_sides() {
        let retriever = retriever_with(0.7, Vec::new());
        let dense = results(&[("shared", 0.9), ("v2", 0.5)]);
        let sparse = results(&[("shared", 10.0), ("b2", 5.0)]);

        let fused = retriever.fuse(dense, sparse);
        // shared: dense_norm = 1, sparse_norm = 1 -> fused = 1.0
        assert_eq!(fused[0].id, "shared");
        assert!((fused[0].score - 1.0).abs() < 1e-6);
        assert_eq!(fused[0].metadata_str("retrieval_method"), Some("hybrid"));

        let boosting = fused[0].metadata.get("boosting").unwrap();
        assert_eq!(boosting["dense_score"], 0.9);
        assert_eq!(boosting["sparse_score"], 10.0);
    }

    #[test]
    fn test_tie_breaks_by_dense_then_id() {
        let retriever = retriever_with(1.0, Vec::new());
        // Both sparse-only, fused score 0; tie falls through to id order.
        let sparse = results(&[("z-last", 5.0), ("a-first", 3.0)]);
        let fused = retriever.fuse(Vec::new(), sparse);
        assert_eq!(fused[0].id, "a-first");
        assert_eq!(fused[1].id, "z-last");
    }

    #[tokio::test]
    async fn test_search_fuses_both_branches() {
        let store = Arc::new(InMemoryPassageStore::new());
        store.insert(Passage::new(
            "c1",
            "d1",
            "Used car prices in Istanbul range from affordable to premium.",
            0,
        ));
        store.insert(Passage::new("c2", "d2", "Cooking recipes for winter.", 0));

        let bm25 = Arc::new(Bm25Retriever::new(
            Bm25RetrieverConfig::default(),
            store.clone(),
        ));
        bm25.rebuild().await.unwrap();

        let vector = Arc::new(StaticVectorSearcher {
            results: results(&[("c1", 0.95), ("c2", 0.2)]),
        });

        let retriever = HybridRetriever::new(0.7, bm25, vector, Duration::from_secs(1));
        let fused = retriever
            .search("car price istanbul", 5, None)
            .await
            .unwrap();

        assert_eq!(fused[0].id, "c1");
        assert!(fused
            .iter()
            .all(|r| r.metadata_str("retrieval_method") == Some("hybrid")));
    }
}
