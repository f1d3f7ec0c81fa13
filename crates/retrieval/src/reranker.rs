//! Cross-encoder reranking
//!
//! Rescores first-stage candidates with a joint query-passage scorer. The
//! adapter is allowed to fail: any scoring error logs, bumps the failure
//! counter, and returns the input ordering unchanged. Reranking is never
//! fatal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ragpipe_core::{CrossEncoderScorer, SearchResult};

use crate::metrics::RetrievalMetrics;

/// Reranker configuration
#[derive(Debug, Clone)]
pub struct RerankerConfig {
    /// Skip reranking entirely when false
    pub enabled: bool,
    /// Cross-encoder batch size
    pub batch_size: usize,
    /// Per-call timeout for the scoring adapter
    pub adapter_timeout: Duration,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 32,
            adapter_timeout: Duration::from_secs(10),
        }
    }
}

/// Cross-encoder reranker over the scoring adapter
pub struct CrossEncoderReranker {
    scorer: Option<Arc<dyn CrossEncoderScorer>>,
    config: RerankerConfig,
    metrics: Arc<RetrievalMetrics>,
}

impl CrossEncoderReranker {
    pub fn new(
        scorer: Option<Arc<dyn CrossEncoderScorer>>,
        config: RerankerConfig,
        metrics: Arc<RetrievalMetrics>,
    ) -> Self {
        Self {
            scorer,
            config,
            metrics,
        }
    }

    /// Whether reranking will actually run
    pub fn is_active(&self) -> bool {
        self.config.enabled
            && self
                .scorer
                .as_ref()
                .is_some_and(|scorer| scorer.is_loaded())
    }

    /// Rerank candidates against the query.
    ///
    /// Each result's score is replaced by the cross-encoder score; the
    /// previous score moves to `metadata.original_score` and the adapter
    /// name to `metadata.reranker`. `threshold` filters, then `top_k`
    /// truncates. Inputs with at most one candidate, a missing adapter, or
    /// a failing adapter pass through unchanged.
    pub async fn rerank(
        &self,
        query: &str,
        results: Vec<SearchResult>,
        top_k: Option<usize>,
        threshold: Option<f32>,
    ) -> Vec<SearchResult> {
        if results.len() <= 1 {
            return results;
        }

        let Some(ref scorer) = self.scorer else {
            tracing::debug!("no cross-encoder adapter configured, skipping rerank");
            return results;
        };
        if !self.config.enabled || !scorer.is_loaded() {
            tracing::debug!("cross-encoder not active, skipping rerank");
            return results;
        }

        let start = Instant::now();
        let pairs: Vec<(String, String)> = results
            .iter()
            .map(|r| (query.to_string(), r.text.clone()))
            .collect();

        let scores = match tokio::time::timeout(
            self.config.adapter_timeout,
            scorer.score(&pairs, self.config.batch_size),
        )
        .await
        {
            Ok(Ok(scores)) => scores,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "cross-encoder scoring failed, keeping input order");
                self.metrics.record_rerank_failure();
                return results;
            },
            Err(_) => {
                tracing::warn!(
                    adapter = scorer.name(),
                    timeout_ms = self.config.adapter_timeout.as_millis() as u64,
                    "cross-encoder timed out, keeping input order"
                );
                self.metrics.record_rerank_failure();
                self.metrics.record_adapter_timeout(scorer.name());
                return results;
            },
        };

        if scores.len() != results.len() {
            tracing::warn!(
                expected = results.len(),
                got = scores.len(),
                "cross-encoder returned wrong score count, keeping input order"
            );
            self.metrics.record_rerank_failure();
            return results;
        }

        let adapter = scorer.name().to_string();
        let mut reranked: Vec<SearchResult> = results
            .into_iter()
            .zip(scores)
            .map(|(mut result, score)| {
                let original = result.score;
                result.annotate("original_score", original);
                result.annotate("reranker", "cross-encoder");
                result.annotate("reranker_model", adapter.clone());
                result.score = score;
                result
            })
            .collect();

        reranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if let Some(threshold) = threshold {
            reranked.retain(|r| r.score >= threshold);
        }
        if let Some(top_k) = top_k {
            reranked.truncate(top_k);
        }

        tracing::debug!(
            results = reranked.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "reranking completed"
        );

        reranked
    }
}
