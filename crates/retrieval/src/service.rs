//! Retrieval service container
//!
//! Explicit dependency-injection container built once at process start
//! and passed by reference into request handlers. Wires adapters and
//! subsystems from [`Settings`] and exposes the transport-agnostic
//! operations: retrieve, rerank, optimize_context, attribute,
//! rebuild_bm25, metrics_snapshot. Teardown awaits in-flight rebuilds.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use ragpipe_config::Settings;
use ragpipe_core::{
    AttributedResponse, CitationStyle, ContextWindow, CrossEncoderScorer, Error, LanguageModel,
    Passage, PassageStore, Result, RetrievalEnvelope, SearchResult, TokenCounter, VectorSearcher,
};

use crate::analyzer::{QueryAnalyzer, QueryAnalyzerConfig};
use crate::attribution::{AttributionConfig, AttributionEnhancer};
use crate::bm25::{Bm25Retriever, Bm25RetrieverConfig};
use crate::cache::ResultCache;
use crate::expansion::SynonymExpander;
use crate::hybrid::HybridRetriever;
use crate::metrics::{MetricsSnapshot, RetrievalMetrics};
use crate::optimizer::{ContextOptimizer, OptimizeStrategy, OptimizerConfig};
use crate::pipeline::{RetrievalPipeline, RetrievalPipelineConfig, RetrieveRequest};
use crate::reranker::{CrossEncoderReranker, RerankerConfig};
use crate::selector::DynamicSelector;

/// Builder for [`RetrievalService`]
pub struct RetrievalServiceBuilder {
    settings: Settings,
    store: Option<Arc<dyn PassageStore>>,
    vector: Option<Arc<dyn VectorSearcher>>,
    llm: Option<Arc<dyn LanguageModel>>,
    cross_encoder: Option<Arc<dyn CrossEncoderScorer>>,
    tokenizer: Option<Arc<dyn TokenCounter>>,
    expander: Option<Arc<SynonymExpander>>,
}

impl RetrievalServiceBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            store: None,
            vector: None,
            llm: None,
            cross_encoder: None,
            tokenizer: None,
            expander: None,
        }
    }

    pub fn with_passage_store(mut self, store: Arc<dyn PassageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_vector_searcher(mut self, vector: Arc<dyn VectorSearcher>) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn with_language_model(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_cross_encoder(mut self, scorer: Arc<dyn CrossEncoderScorer>) -> Self {
        self.cross_encoder = Some(scorer);
        self
    }

    pub fn with_token_counter(mut self, tokenizer: Arc<dyn TokenCounter>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    pub fn with_synonym_expander(mut self, expander: Arc<SynonymExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    /// Wire everything together. The passage store and the vector
    /// searcher are required; the language model, cross-encoder, and
    /// tokenizer are optional and their stages degrade gracefully when
    /// absent.
    pub fn build(self) -> Result<RetrievalService> {
        let store = self
            .store
            .ok_or_else(|| Error::Validation("a passage store is required".into()))?;
        let vector = self
            .vector
            .ok_or_else(|| Error::Validation("a vector searcher is required".into()))?;

        let settings = self.settings;
        let adapter_timeout = Duration::from_millis(settings.deadline.adapter_ms);
        let metrics = Arc::new(RetrievalMetrics::new());

        let bm25 = Arc::new(Bm25Retriever::new(
            Bm25RetrieverConfig::from(&settings.bm25),
            Arc::clone(&store),
        ));

        let hybrid = Arc::new(HybridRetriever::new(
            settings.hybrid.alpha,
            Arc::clone(&bm25),
            Arc::clone(&vector),
            adapter_timeout,
        ));

        let selector = Arc::new(DynamicSelector::new(
            Arc::clone(&bm25),
            Arc::clone(&vector),
            hybrid,
            settings.pipeline.min_results,
            adapter_timeout,
        ));

        let analyzer_config = QueryAnalyzerConfig {
            expansion_enabled: settings.pipeline.query_expansion,
            ..QueryAnalyzerConfig::default()
        };
        let mut analyzer = match self.llm {
            Some(ref llm) => QueryAnalyzer::with_llm(analyzer_config, Arc::clone(llm)),
            None => QueryAnalyzer::new(analyzer_config),
        }
        .with_metrics(Arc::clone(&metrics));
        if let Some(expander) = self.expander {
            analyzer = analyzer.with_expander(expander);
        }

        let reranker = Arc::new(CrossEncoderReranker::new(
            self.cross_encoder,
            RerankerConfig {
                enabled: settings.reranker.enabled,
                batch_size: settings.reranker.batch_size,
                adapter_timeout,
            },
            Arc::clone(&metrics),
        ));

        let cache = settings.cache.enabled.then(|| {
            Arc::new(ResultCache::new(
                Duration::from_secs(settings.cache.ttl_s),
                settings.cache.max_entries,
            ))
        });

        let pipeline = Arc::new(RetrievalPipeline::new(
            Arc::new(analyzer),
            selector,
            Arc::clone(&reranker),
            cache,
            Arc::clone(&metrics),
            RetrievalPipelineConfig {
                first_stage_k: settings.pipeline.first_stage_k,
                final_k: settings.pipeline.final_k,
                rerank_enabled: settings.reranker.enabled,
                request_deadline: Duration::from_millis(settings.deadline.request_ms),
            },
        ));

        let mut optimizer = ContextOptimizer::new(OptimizerConfig::from(&settings.optimizer));
        if let Some(tokenizer) = self.tokenizer {
            optimizer = optimizer.with_tokenizer(tokenizer);
        }

        let attribution = match self.llm {
            Some(ref llm) => {
                AttributionEnhancer::with_llm(AttributionConfig::default(), Arc::clone(llm))
            },
            None => AttributionEnhancer::new(AttributionConfig::default()),
        };

        Ok(RetrievalService {
            pipeline,
            bm25,
            reranker,
            optimizer,
            attribution,
            metrics,
            rebuilds_in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }
}

/// The assembled retrieval core
pub struct RetrievalService {
    pipeline: Arc<RetrievalPipeline>,
    bm25: Arc<Bm25Retriever>,
    reranker: Arc<CrossEncoderReranker>,
    optimizer: ContextOptimizer,
    attribution: AttributionEnhancer,
    metrics: Arc<RetrievalMetrics>,
    rebuilds_in_flight: Arc<AtomicUsize>,
}

impl RetrievalService {
    /// Start building a service from settings
    pub fn builder(settings: Settings) -> RetrievalServiceBuilder {
        RetrievalServiceBuilder::new(settings)
    }

    /// Build the BM25 index from the passage store. Call once at startup.
    pub async fn init(&self) -> Result<usize> {
        let count = self.bm25.rebuild().await?;
        self.metrics.record_bm25_rebuild(count);
        tracing::info!(documents = count, "retrieval service initialized");
        Ok(count)
    }

    /// Warm-start from a persisted BM25 snapshot, rebuilding from the
    /// passage store when the snapshot is missing or unreadable.
    pub async fn init_from_snapshot(&self, path: impl AsRef<std::path::Path>) -> Result<usize> {
        match self.bm25.load_snapshot(path.as_ref()).await {
            Ok(count) => {
                self.metrics.record_bm25_rebuild(count);
                tracing::info!(documents = count, "retrieval service warm-started");
                Ok(count)
            },
            Err(e) => {
                tracing::warn!(error = %e, "snapshot load failed, rebuilding from store");
                self.init().await
            },
        }
    }

    /// Persist the BM25 index snapshot for the next warm start.
    pub async fn save_bm25_snapshot(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        self.bm25.save_snapshot(path).await
    }

    /// Run the multi-stage retrieval pipeline.
    pub async fn retrieve(&self, request: RetrieveRequest) -> Result<RetrievalEnvelope> {
        self.pipeline.retrieve(request).await
    }

    /// Rerank caller-provided candidates.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<SearchResult>,
        top_k: Option<usize>,
        threshold: Option<f32>,
    ) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Err(Error::Validation("query must not be empty".into()));
        }
        if top_k == Some(0) {
            return Err(Error::Validation("top_k must be at least 1".into()));
        }
        Ok(self.reranker.rerank(query, candidates, top_k, threshold).await)
    }

    /// Select a token-budgeted context window from candidates.
    pub fn optimize_context(
        &self,
        candidates: &[SearchResult],
        query: &str,
        strategy: OptimizeStrategy,
        max_tokens: Option<usize>,
    ) -> Result<ContextWindow> {
        if max_tokens == Some(0) {
            return Err(Error::Validation("max_tokens must be at least 1".into()));
        }
        Ok(self.optimizer.optimize(candidates, query, strategy, max_tokens))
    }

    /// Attribute a generated response to its source passages.
    pub async fn attribute(
        &self,
        response: &str,
        sources: &[SearchResult],
        query: Option<&str>,
        style: Option<CitationStyle>,
        auto_detect: bool,
    ) -> AttributedResponse {
        self.attribution
            .enhance(response, sources, query, style, auto_detect)
            .await
    }

    /// Ingester notification: new passages were added.
    pub fn notify_passages_added(&self, passages: &[Passage]) {
        self.bm25.add_passages(passages);
    }

    /// Ingester notification: passages were removed.
    pub fn notify_passages_removed(&self, ids: &[String]) {
        self.bm25.remove_passages(ids);
    }

    /// Rebuild the BM25 index in the background. Progress is observable
    /// through the metrics snapshot (`bm25_rebuilds`,
    /// `bm25_indexed_documents`).
    pub fn rebuild_bm25(&self) -> JoinHandle<Result<usize>> {
        let bm25 = Arc::clone(&self.bm25);
        let metrics = Arc::clone(&self.metrics);
        let in_flight = Arc::clone(&self.rebuilds_in_flight);

        in_flight.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            let outcome = bm25.rebuild().await;
            if let Ok(count) = outcome {
                metrics.record_bm25_rebuild(count);
            }
            in_flight.fetch_sub(1, Ordering::AcqRel);
            outcome
        })
    }

    /// Point-in-time metrics view.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Shared metrics recorder.
    pub fn metrics(&self) -> Arc<RetrievalMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Await in-flight background work before teardown.
    pub async fn shutdown(&self) {
        while self.rebuilds_in_flight.load(Ordering::Acquire) > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tracing::info!("retrieval service shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryPassageStore;
    use async_trait::async_trait;
    use ragpipe_core::SearchFilters;

    struct EmptyVectorSearcher;

    #[async_trait]
    impl VectorSearcher for EmptyVectorSearcher {
        async fn similarity_search(
            &self,
            _query: &str,
            _k: usize,
            _filters: Option<&SearchFilters>,
        ) -> Result<Vec<SearchResult>> {
            Ok(Vec::new())
        }

        fn name(&self) -> &str {
            "empty"
        }
    }

    #[test]
    fn test_builder_requires_store_and_vector() {
        let missing_store = RetrievalService::builder(Settings::default())
            .with_vector_searcher(Arc::new(EmptyVectorSearcher))
            .build();
        assert!(matches!(missing_store, Err(Error::Validation(_))));

        let missing_vector = RetrievalService::builder(Settings::default())
            .with_passage_store(Arc::new(InMemoryPassageStore::new()))
            .build();
        assert!(matches!(missing_vector, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_init_builds_index() {
        let store = Arc::new(InMemoryPassageStore::new());
        store.insert(Passage::new("c1", "d1", "some indexed text", 0));

        let service = RetrievalService::builder(Settings::default())
            .with_passage_store(store)
            .with_vector_searcher(Arc::new(EmptyVectorSearcher))
            .build()
            .unwrap();

        let count = service.init().await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(service.metrics_snapshot().bm25_indexed_documents, 1);
    }

    #[tokio::test]
    async fn test_background_rebuild_and_shutdown() {
        let store = Arc::new(InMemoryPassageStore::new());
        store.insert(Passage::new("c1", "d1", "some indexed text", 0));

        let service = RetrievalService::builder(Settings::default())
            .with_passage_store(store)
            .with_vector_searcher(Arc::new(EmptyVectorSearcher))
            .build()
            .unwrap();

        let handle = service.rebuild_bm25();
        let count = handle.await.unwrap().unwrap();
        assert_eq!(count, 1);

        service.shutdown().await;
        assert_eq!(service.metrics_snapshot().bm25_rebuilds, 1);
    }

    #[tokio::test]
    async fn test_rerank_validation() {
        let store = Arc::new(InMemoryPassageStore::new());
        let service = RetrievalService::builder(Settings::default())
            .with_passage_store(store)
            .with_vector_searcher(Arc::new(EmptyVectorSearcher))
            .build()
            .unwrap();

        assert!(service.rerank("", Vec::new(), None, None).await.is_err());
        assert!(service.rerank("q", Vec::new(), Some(0), None).await.is_err());
        assert!(service
            .optimize_context(&[], "q", OptimizeStrategy::Greedy, Some(0))
            .is_err());
    }
}
