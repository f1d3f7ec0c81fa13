//! Multi-stage retrieval pipeline
//!
//! Orchestrates the full query path: cache lookup, query analysis,
//! routed first-stage retrieval (with a variant union pass), reranking,
//! final truncation, and cache store. Stage latencies are captured per
//! request and fed into the metrics recorder. A per-request deadline
//! bounds the whole run; on expiry in-flight work is dropped and
//! `DeadlineExceeded` is surfaced.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::OptionFuture;
use tracing::Instrument;

use ragpipe_core::{
    Error, QueryAnalysis, RetrievalEnvelope, RetrievalMethod, Result, SearchFilters, SearchResult,
    StageTimings,
};

use crate::analyzer::QueryAnalyzer;
use crate::cache::ResultCache;
use crate::metrics::RetrievalMetrics;
use crate::reranker::CrossEncoderReranker;
use crate::selector::DynamicSelector;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct RetrievalPipelineConfig {
    /// Candidates fetched in the first stage
    pub first_stage_k: usize,
    /// Results returned to the caller
    pub final_k: usize,
    /// Gate for the reranking stage
    pub rerank_enabled: bool,
    /// Default per-request deadline
    pub request_deadline: Duration,
}

impl Default for RetrievalPipelineConfig {
    fn default() -> Self {
        Self {
            first_stage_k: 30,
            final_k: 5,
            rerank_enabled: true,
            request_deadline: Duration::from_secs(30),
        }
    }
}

/// A retrieval request
#[derive(Debug, Clone, Default)]
pub struct RetrieveRequest {
    pub query: String,
    /// Overrides the configured `final_k`
    pub k: Option<usize>,
    pub filters: Option<SearchFilters>,
    /// Query language; defaults to `en`
    pub language: Option<String>,
    /// Bypass the dynamic selector with a fixed method
    pub force_method: Option<RetrievalMethod>,
    /// Overrides the configured per-request deadline
    pub deadline: Option<Duration>,
}

impl RetrieveRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_force_method(mut self, method: RetrievalMethod) -> Self {
        self.force_method = Some(method);
        self
    }

    /// Parse a retrieval strategy name (`bm25`, `vector`, `hybrid`) into a
    /// forced method.
    pub fn with_strategy(mut self, strategy: &str) -> Result<Self> {
        self.force_method = Some(strategy.parse()?);
        Ok(self)
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Union two result lists by passage id; the first list wins duplicates.
fn union_by_id(mut first: Vec<SearchResult>, second: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen: std::collections::HashSet<String> =
        first.iter().map(|r| r.id.clone()).collect();
    for result in second {
        if seen.insert(result.id.clone()) {
            first.push(result);
        }
    }
    first
}

/// The multi-stage retrieval orchestrator
pub struct RetrievalPipeline {
    analyzer: Arc<QueryAnalyzer>,
    selector: Arc<DynamicSelector>,
    reranker: Arc<CrossEncoderReranker>,
    cache: Option<Arc<ResultCache>>,
    metrics: Arc<RetrievalMetrics>,
    config: RetrievalPipelineConfig,
}

impl RetrievalPipeline {
    pub fn new(
        analyzer: Arc<QueryAnalyzer>,
        selector: Arc<DynamicSelector>,
        reranker: Arc<CrossEncoderReranker>,
        cache: Option<Arc<ResultCache>>,
        metrics: Arc<RetrievalMetrics>,
        config: RetrievalPipelineConfig,
    ) -> Self {
        Self {
            analyzer,
            selector,
            reranker,
            cache,
            metrics,
            config,
        }
    }

    /// Run the full pipeline for one request.
    ///
    /// Validation failures and deadline expiry surface as errors; every
    /// other failure degrades inside its stage.
    pub async fn retrieve(&self, request: RetrieveRequest) -> Result<RetrievalEnvelope> {
        if request.query.trim().is_empty() {
            self.metrics.record_error("validation");
            return Err(Error::Validation("query must not be empty".into()));
        }
        if request.k == Some(0) {
            self.metrics.record_error("validation");
            return Err(Error::Validation("k must be at least 1".into()));
        }

        let deadline = request.deadline.unwrap_or(self.config.request_deadline);
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("retrieve", %request_id, query = %request.query);

        match tokio::time::timeout(deadline, self.run(request).instrument(span)).await {
            Ok(envelope) => Ok(envelope),
            Err(_) => {
                tracing::warn!(
                    %request_id,
                    deadline_ms = deadline.as_millis() as u64,
                    "request deadline exceeded, dropping in-flight stages"
                );
                self.metrics.record_deadline_exceeded();
                self.metrics.record_error("deadline_exceeded");
                Err(Error::DeadlineExceeded)
            },
        }
    }

    async fn run(&self, request: RetrieveRequest) -> RetrievalEnvelope {
        let start = Instant::now();
        let mut timings = StageTimings::default();

        let final_k = request.k.unwrap_or(self.config.final_k);
        let language = request.language.as_deref().unwrap_or("en");
        let filters = request.filters.as_ref();

        // Step 1: cache lookup.
        let cache_key = ResultCache::key(&request.query, final_k, filters, language);
        if let Some(ref cache) = self.cache {
            if let Some(results) = cache.get(cache_key) {
                self.metrics.record_cache_hit();

                let method = results
                    .first()
                    .and_then(|r| r.metadata_str("retrieval_method"))
                    .unwrap_or("unknown")
                    .to_string();
                let analysis = QueryAnalysis::fallback(
                    &request.query,
                    QueryAnalyzer::heuristic_type(&request.query, language),
                );

                timings.total_ms = start.elapsed().as_millis() as u64;
                self.metrics
                    .record_retrieval(&method, timings.total_ms, results.len());

                return RetrievalEnvelope {
                    results,
                    retrieval_method: method,
                    query_analysis: analysis,
                    timings,
                    cache_hit: true,
                };
            }
            self.metrics.record_cache_miss();
        }

        // Step 2: query analysis.
        let stage_start = Instant::now();
        let analysis = self.analyzer.analyze(&request.query, language).await;
        timings.record("analyze", stage_start.elapsed().as_millis() as u64);
        self.metrics.record_stage("analyze", stage_start.elapsed().as_millis() as u64);
        self.metrics.record_query_type(analysis.query_type.as_str());

        // Steps 3-4: routed first-stage retrieval, with a concurrent
        // variant pass unioned by id (the first list wins duplicates).
        let stage_start = Instant::now();
        let planned_method = self
            .selector
            .choose(analysis.query_type, request.force_method);

        let main_fut = self.selector.retrieve(
            &analysis.rewritten,
            analysis.query_type,
            self.config.first_stage_k,
            filters,
            request.force_method,
        );
        let variant_fut: OptionFuture<_> = analysis
            .top_distinct_variant()
            .map(|variant| {
                self.selector.dispatch(
                    planned_method,
                    variant,
                    (self.config.first_stage_k / 2).max(1),
                    filters,
                )
            })
            .into();

        let (outcome, variant_results) = tokio::join!(main_fut, variant_fut);

        let mut candidates = outcome.results;
        if let Some(variant_results) = variant_results {
            candidates = union_by_id(candidates, variant_results);
        }
        timings.record("retrieve", stage_start.elapsed().as_millis() as u64);
        self.metrics
            .record_stage("retrieve", stage_start.elapsed().as_millis() as u64);

        tracing::debug!(
            method = outcome.method.as_str(),
            fell_back = outcome.fell_back,
            candidates = candidates.len(),
            "first-stage retrieval completed"
        );

        // Step 5: reranking against the original query.
        if self.config.rerank_enabled && candidates.len() > 1 {
            let stage_start = Instant::now();
            candidates = self
                .reranker
                .rerank(&request.query, candidates, Some(final_k * 2), None)
                .await;
            timings.record("rerank", stage_start.elapsed().as_millis() as u64);
            self.metrics
                .record_stage("rerank", stage_start.elapsed().as_millis() as u64);
        }

        // Step 6: final ordering, truncation, and annotations.
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(final_k);

        let elapsed_ms = start.elapsed().as_millis() as u64;
        for result in &mut candidates {
            result.annotate("retrieval_pipeline", "multi_stage");
            result.annotate("original_query", request.query.clone());
            if !analysis.rewritten.eq_ignore_ascii_case(&request.query) {
                result.annotate("rewritten_query", analysis.rewritten.clone());
            }
            result.annotate("processing_time_ms", elapsed_ms);
        }

        // Step 7: cache store. Two racing identical queries may both get
        // here; the last writer wins, which is acceptable.
        if let Some(ref cache) = self.cache {
            cache.insert(cache_key, candidates.clone());
        }

        timings.total_ms = start.elapsed().as_millis() as u64;
        self.metrics
            .record_retrieval(outcome.method.as_str(), timings.total_ms, candidates.len());

        RetrievalEnvelope {
            results: candidates,
            retrieval_method: outcome.method.as_str().to_string(),
            query_analysis: analysis,
            timings,
            cache_hit: false,
        }
    }
}
