//! Dynamic retrieval method selection
//!
//! Routes each query to the retrieval method most likely to perform well:
//! keyword queries to BM25, natural-language queries to dense search,
//! mixed queries to hybrid fusion. A `force_method` override wins
//! outright; a thin first pass falls back to hybrid with the same query.

use std::sync::Arc;
use std::time::Duration;

use ragpipe_core::{QueryType, RetrievalMethod, SearchFilters, SearchResult, VectorSearcher};

use crate::bm25::Bm25Retriever;
use crate::hybrid::HybridRetriever;

/// Outcome of routed retrieval
#[derive(Debug)]
pub struct SelectionOutcome {
    /// The method that produced the results
    pub method: RetrievalMethod,
    pub results: Vec<SearchResult>,
    /// Whether the thin-results hybrid fallback fired
    pub fell_back: bool,
}

/// Per-query retrieval router
pub struct DynamicSelector {
    bm25: Arc<Bm25Retriever>,
    vector: Arc<dyn VectorSearcher>,
    hybrid: Arc<HybridRetriever>,
    min_results: usize,
    adapter_timeout: Duration,
}

impl DynamicSelector {
    pub fn new(
        bm25: Arc<Bm25Retriever>,
        vector: Arc<dyn VectorSearcher>,
        hybrid: Arc<HybridRetriever>,
        min_results: usize,
        adapter_timeout: Duration,
    ) -> Self {
        Self {
            bm25,
            vector,
            hybrid,
            min_results,
            adapter_timeout,
        }
    }

    /// Pick the method for a query type, honoring a forced override.
    pub fn choose(
        &self,
        query_type: QueryType,
        force_method: Option<RetrievalMethod>,
    ) -> RetrievalMethod {
        if let Some(method) = force_method {
            return method;
        }
        match query_type {
            QueryType::Keyword => RetrievalMethod::Bm25,
            QueryType::NaturalLanguage => RetrievalMethod::Vector,
            QueryType::Hybrid => RetrievalMethod::Hybrid,
        }
    }

    /// Run one retrieval method. Branch failures are contained: a failed
    /// or timed-out retriever yields an empty list.
    pub async fn dispatch(
        &self,
        method: RetrievalMethod,
        query: &str,
        k: usize,
        filters: Option<&SearchFilters>,
    ) -> Vec<SearchResult> {
        match method {
            RetrievalMethod::Bm25 => match self.bm25.search(query, k, filters).await {
                Ok(results) => results,
                Err(e) => {
                    tracing::warn!(error = %e, "BM25 retrieval failed");
                    Vec::new()
                },
            },
            RetrievalMethod::Vector => {
                match tokio::time::timeout(
                    self.adapter_timeout,
                    self.vector.similarity_search(query, k, filters),
                )
                .await
                {
                    Ok(Ok(results)) => results,
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "vector retrieval failed");
                        Vec::new()
                    },
                    Err(_) => {
                        tracing::warn!(
                            adapter = self.vector.name(),
                            "vector retrieval timed out"
                        );
                        metrics::counter!("retrieval_adapter_timeouts", "adapter" => "vector")
                            .increment(1);
                        Vec::new()
                    },
                }
            },
            RetrievalMethod::Hybrid => match self.hybrid.search(query, k, filters).await {
                Ok(results) => results,
                Err(e) => {
                    tracing::warn!(error = %e, "hybrid retrieval failed");
                    Vec::new()
                },
            },
        }
    }

    /// Route and retrieve. If the chosen method returns fewer than
    /// `min_results` passages, retry through hybrid fusion with the same
    /// query.
    pub async fn retrieve(
        &self,
        query: &str,
        query_type: QueryType,
        k: usize,
        filters: Option<&SearchFilters>,
        force_method: Option<RetrievalMethod>,
    ) -> SelectionOutcome {
        let method = self.choose(query_type, force_method);
        let results = self.dispatch(method, query, k, filters).await;

        if results.len() < self.min_results && method != RetrievalMethod::Hybrid {
            tracing::debug!(
                method = method.as_str(),
                results = results.len(),
                min_results = self.min_results,
                "thin first pass, falling back to hybrid"
            );
            let fallback = self.dispatch(RetrievalMethod::Hybrid, query, k, filters).await;
            if fallback.len() > results.len() {
                return SelectionOutcome {
                    method: RetrievalMethod::Hybrid,
                    results: fallback,
                    fell_back: true,
                };
            }
        }

        SelectionOutcome {
            method,
            results,
            fell_back: false,
        }
    }
}
