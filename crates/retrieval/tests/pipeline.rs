//! End-to-end pipeline scenarios against mock adapters.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use ragpipe_config::Settings;
use ragpipe_core::{
    CrossEncoderScorer, Error, Passage, Result, SearchFilters, SearchResult, TokenCounter,
    VectorSearcher,
};
use ragpipe_retrieval::optimizer::OptimizeStrategy;
use ragpipe_retrieval::pipeline::RetrieveRequest;
use ragpipe_retrieval::service::RetrievalService;
use ragpipe_retrieval::store::InMemoryPassageStore;

/// Vector searcher standing in for an embedding store: scores passages by
/// query-term overlap and returns the top k, mirroring how an ANN index
/// always returns k nearest neighbors regardless of absolute relevance.
struct OverlapVectorSearcher {
    passages: Vec<Passage>,
}

impl OverlapVectorSearcher {
    fn score(query: &str, text: &str) -> f32 {
        let query_terms: HashSet<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|w| !w.is_empty())
            .collect();
        if query_terms.is_empty() {
            return 0.0;
        }
        let text_terms: HashSet<String> = text
            .to_lowercase()
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .collect();
        query_terms.intersection(&text_terms).count() as f32 / query_terms.len() as f32
    }
}

#[async_trait]
impl VectorSearcher for OverlapVectorSearcher {
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        _filters: Option<&SearchFilters>,
    ) -> Result<Vec<SearchResult>> {
        let mut results: Vec<SearchResult> = self
            .passages
            .iter()
            .map(|p| {
                let mut result =
                    SearchResult::new(&p.id, &p.text, Self::score(query, &p.text).clamp(0.0, 1.0));
                result.annotate("document_id", p.document_id.clone());
                result.annotate("retrieval_method", "vector");
                result
            })
            .collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        results.truncate(k);
        Ok(results)
    }

    fn name(&self) -> &str {
        "overlap-ann"
    }
}

/// Cross-encoder that scores by keyword overlap.
struct OverlapCrossEncoder;

#[async_trait]
impl CrossEncoderScorer for OverlapCrossEncoder {
    async fn score(&self, pairs: &[(String, String)], _batch_size: usize) -> Result<Vec<f32>> {
        Ok(pairs
            .iter()
            .map(|(q, d)| OverlapVectorSearcher::score(q, d))
            .collect())
    }

    fn name(&self) -> &str {
        "overlap-cross-encoder"
    }
}

/// Cross-encoder that always fails.
struct BrokenCrossEncoder;

#[async_trait]
impl CrossEncoderScorer for BrokenCrossEncoder {
    async fn score(&self, _pairs: &[(String, String)], _batch_size: usize) -> Result<Vec<f32>> {
        Err(Error::AdapterUnavailable("cross-encoder crashed".into()))
    }

    fn name(&self) -> &str {
        "broken-cross-encoder"
    }
}

struct FixedTokens(usize);

impl TokenCounter for FixedTokens {
    fn count(&self, _text: &str) -> usize {
        self.0
    }
}

fn unrelated_passages() -> Vec<Passage> {
    let topics = [
        "Sourdough bread needs a long fermentation before baking.",
        "The marathon route follows the waterfront at dawn.",
        "Jazz ensembles often improvise over a twelve bar form.",
        "Glacier melt accelerates under warm spring winds.",
        "The museum reopened its antiquities wing last month.",
        "Beekeepers harvest honey at the end of summer.",
        "The novel follows three siblings across two decades.",
        "Volcanic soil makes the vineyard unusually fertile.",
        "Chess engines evaluate millions of positions per second.",
    ];
    topics
        .iter()
        .enumerate()
        .map(|(i, text)| {
            Passage::new(format!("u{i}"), format!("ud{i}"), *text, 0)
                .with_metadata("title", format!("Unrelated {i}"))
        })
        .collect()
}

fn car_corpus() -> Vec<Passage> {
    let mut passages = vec![
        Passage::new(
            "car-1",
            "docs-cars",
            "Used car prices in Istanbul range from budget hatchbacks to premium sedans, \
             and the average price keeps shifting with demand.",
            0,
        )
        .with_metadata("title", "Istanbul Car Market"),
        Passage::new(
            "car-2",
            "docs-insurance",
            "Car insurance premiums in Istanbul depend on driver history.",
            0,
        )
        .with_metadata("title", "Insurance Notes"),
    ];
    passages.extend(unrelated_passages());
    passages
}

fn rag_corpus() -> Vec<Passage> {
    let mut passages = vec![Passage::new(
        "rag-1",
        "docs-rag",
        "Retrieval augmented generation grounds language model answers in retrieved passages.",
        0,
    )
    .with_metadata("title", "RAG Definition")];
    passages.extend(unrelated_passages());
    passages
}

async fn service_for(
    passages: Vec<Passage>,
    cross_encoder: Option<Arc<dyn CrossEncoderScorer>>,
    mutate: impl FnOnce(&mut Settings),
) -> RetrievalService {
    let store = Arc::new(InMemoryPassageStore::new());
    store.insert_all(passages.clone());

    let mut settings = Settings::default();
    settings.pipeline.min_results = 1;
    mutate(&mut settings);
    ragpipe_retrieval::telemetry::init_tracing(&settings.logging);

    let mut builder = RetrievalService::builder(settings)
        .with_passage_store(store)
        .with_vector_searcher(Arc::new(OverlapVectorSearcher { passages }));
    if let Some(scorer) = cross_encoder {
        builder = builder.with_cross_encoder(scorer);
    }

    let service = builder.build().unwrap();
    service.init().await.unwrap();
    service
}

// Scenario 1: a keyword query routes to BM25 and the matching passage
// comes back first with final_k = 5.
#[tokio::test]
async fn keyword_query_ranks_matching_passage_first() {
    let service = service_for(car_corpus(), Some(Arc::new(OverlapCrossEncoder)), |_| {}).await;

    let envelope = service
        .retrieve(RetrieveRequest::new("car price istanbul").with_k(5))
        .await
        .unwrap();

    assert_eq!(envelope.retrieval_method, "bm25");
    assert!(!envelope.cache_hit);
    assert_eq!(envelope.results[0].id, "car-1");
    assert!(envelope.results.len() <= 5);
    assert_eq!(
        envelope.results[0].metadata_str("retrieval_pipeline"),
        Some("multi_stage")
    );
}

// Scenario 1, hybrid leg: fusion with alpha = 0.7 still ranks the
// matching passage first.
#[tokio::test]
async fn hybrid_fusion_keeps_matching_passage_first() {
    let service = service_for(car_corpus(), Some(Arc::new(OverlapCrossEncoder)), |_| {}).await;

    let envelope = service
        .retrieve(
            RetrieveRequest::new("car price istanbul")
                .with_k(5)
                .with_strategy("hybrid")
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(envelope.retrieval_method, "hybrid");
    assert_eq!(envelope.results[0].id, "car-1");
}

// Scenario 2: a natural-language query routes to the vector retriever
// and the definitional passage leads after reranking.
#[tokio::test]
async fn natural_language_query_routes_to_vector() {
    let service = service_for(rag_corpus(), Some(Arc::new(OverlapCrossEncoder)), |_| {}).await;

    let envelope = service
        .retrieve(RetrieveRequest::new(
            "What is retrieval augmented generation?",
        ))
        .await
        .unwrap();

    assert_eq!(envelope.retrieval_method, "vector");
    assert_eq!(envelope.query_analysis.query_type.as_str(), "natural_language");
    assert_eq!(envelope.results[0].id, "rag-1");
}

// Scenario 3: near-duplicate passages dedup to the higher-scored one.
#[tokio::test]
async fn context_optimizer_deduplicates() {
    let service = service_for(car_corpus(), None, |_| {}).await;

    let shared = "Istanbul traffic peaks at rush hour. Parking downtown is scarce. Fuel costs keep climbing.";
    let candidates = vec![
        SearchResult::new("a", shared, 0.9).with_metadata("document_id", "d1"),
        SearchResult::new("b", format!("{shared} One extra remark."), 0.88)
            .with_metadata("document_id", "d2"),
    ];

    let window = service
        .optimize_context(&candidates, "istanbul traffic", OptimizeStrategy::Greedy, None)
        .unwrap();

    assert_eq!(window.chunks.len(), 1);
    assert_eq!(window.chunks[0].id, "a");
}

// Scenario 4: the token budget admits exactly two 50-token passages
// under a 120-token cap.
#[tokio::test]
async fn token_budget_is_enforced() {
    let passages = car_corpus();
    let store = Arc::new(InMemoryPassageStore::new());
    store.insert_all(passages.clone());

    let service = RetrievalService::builder(Settings::default())
        .with_passage_store(store)
        .with_vector_searcher(Arc::new(OverlapVectorSearcher { passages }))
        .with_token_counter(Arc::new(FixedTokens(50)))
        .build()
        .unwrap();

    let candidates: Vec<SearchResult> = (0..10)
        .map(|i| {
            SearchResult::new(
                format!("c{i}"),
                format!("Candidate passage number {i} with unique words {i}."),
                1.0 - i as f32 * 0.05,
            )
        })
        .collect();

    let window = service
        .optimize_context(&candidates, "query", OptimizeStrategy::Greedy, Some(120))
        .unwrap();

    assert_eq!(window.chunks.len(), 2);
    assert_eq!(window.total_tokens, 100);
}

// Scenario 5: a crashing cross-encoder leaves the first-stage order
// intact, bumps the failure counter, and surfaces no error.
#[tokio::test]
async fn broken_reranker_degrades_silently() {
    let service = service_for(car_corpus(), Some(Arc::new(BrokenCrossEncoder)), |_| {}).await;

    let envelope = service
        .retrieve(RetrieveRequest::new("car price istanbul").with_k(5))
        .await
        .unwrap();

    assert_eq!(envelope.results[0].id, "car-1");
    assert!(envelope
        .results
        .iter()
        .all(|r| r.metadata_str("reranker").is_none()));

    let snapshot = service.metrics_snapshot();
    assert_eq!(snapshot.rerank_failures, 1);
}

// Scenario 6: a repeated query within the TTL hits the cache and returns
// byte-equal results.
#[tokio::test]
async fn cache_hit_returns_identical_results() {
    let service = service_for(car_corpus(), Some(Arc::new(OverlapCrossEncoder)), |_| {}).await;

    let request = RetrieveRequest::new("car price istanbul").with_k(5);
    let first = service.retrieve(request.clone()).await.unwrap();
    let second = service.retrieve(request).await.unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);

    let first_bytes = serde_json::to_vec(&first.results).unwrap();
    let second_bytes = serde_json::to_vec(&second.results).unwrap();
    assert_eq!(first_bytes, second_bytes);

    let snapshot = service.metrics_snapshot();
    assert_eq!(snapshot.cache_hits, 1);
    assert_eq!(snapshot.cache_misses, 1);
}

// Validation errors surface to the caller.
#[tokio::test]
async fn validation_errors_reach_the_caller() {
    let service = service_for(car_corpus(), None, |_| {}).await;

    let empty = service.retrieve(RetrieveRequest::new("   ")).await;
    assert!(matches!(empty, Err(Error::Validation(_))));

    let zero_k = service
        .retrieve(RetrieveRequest::new("car price").with_k(0))
        .await;
    assert!(matches!(zero_k, Err(Error::Validation(_))));
}

// Full flow: retrieve, optimize, attribute; the markdown footer lists
// the cited source.
#[tokio::test]
async fn retrieve_optimize_attribute_round_trip() {
    let service = service_for(car_corpus(), Some(Arc::new(OverlapCrossEncoder)), |_| {}).await;

    let envelope = service
        .retrieve(RetrieveRequest::new("car price istanbul").with_k(5))
        .await
        .unwrap();

    let window = service
        .optimize_context(
            &envelope.results,
            "car price istanbul",
            OptimizeStrategy::Greedy,
            None,
        )
        .unwrap();
    assert!(!window.chunks.is_empty());
    assert!(window.sources.contains_key("docs-cars"));

    let response = "Used car prices in Istanbul vary widely [1].";
    let attributed = service
        .attribute(response, &envelope.results, Some("car price istanbul"), None, false)
        .await;

    assert_eq!(attributed.citations.len(), 1);
    assert_eq!(attributed.citations[0].source_id, "car-1");
    assert!(attributed.markdown.contains("### Sources"));
    assert!(attributed.markdown.contains("Istanbul Car Market"));
}

// Per-stage timings are captured for a cache miss.
#[tokio::test]
async fn stage_timings_are_recorded() {
    let service = service_for(car_corpus(), Some(Arc::new(OverlapCrossEncoder)), |_| {}).await;

    let envelope = service
        .retrieve(RetrieveRequest::new("car price istanbul"))
        .await
        .unwrap();

    assert!(envelope.timings.per_stage_ms.contains_key("analyze"));
    assert!(envelope.timings.per_stage_ms.contains_key("retrieve"));
    assert!(envelope.timings.per_stage_ms.contains_key("rerank"));

    let snapshot = service.metrics_snapshot();
    assert!(snapshot.stages.contains_key("retrieve"));
    assert_eq!(snapshot.retrievals_total, 1);
}

// Metadata filters narrow BM25 results.
#[tokio::test]
async fn filters_restrict_results() {
    // min_results = 0 keeps the thin-results hybrid fallback out of the
    // way; the mock vector searcher does not honor filters.
    let service = service_for(car_corpus(), None, |s| s.pipeline.min_results = 0).await;

    let mut filters = SearchFilters::new();
    filters.insert("document_id".into(), serde_json::json!("missing-doc"));

    let envelope = service
        .retrieve(
            RetrieveRequest::new("car price istanbul")
                .with_strategy("bm25")
                .unwrap()
                .with_filters(filters),
        )
        .await
        .unwrap();

    assert!(envelope.results.is_empty());
}
