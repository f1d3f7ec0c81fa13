//! Multi-stage retrieval core
//!
//! Features:
//! - Query analysis and LLM-backed expansion with heuristic fallback
//! - Hand-built Okapi BM25 sparse retrieval with metadata filters
//! - Dense vector search via a Qdrant adapter
//! - Hybrid fusion with min-max score normalization
//! - Dynamic selection of the retrieval method per query
//! - Cross-encoder reranking with failure containment
//! - Token-budgeted context optimization (greedy/relevance/coverage/diverse)
//! - Response attribution with citation rendering
//! - Concurrent TTL result cache and a process-wide metrics recorder

pub mod analyzer;
pub mod attribution;
pub mod bm25;
pub mod cache;
pub mod cross_encoder;
pub mod embeddings;
pub mod expansion;
pub mod hybrid;
pub mod metrics;
pub mod optimizer;
pub mod pipeline;
pub mod reranker;
pub mod selector;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod text;
pub mod vector;

pub use analyzer::{QueryAnalyzer, QueryAnalyzerConfig};
pub use attribution::{AttributionConfig, AttributionEnhancer};
pub use bm25::{Bm25Retriever, Bm25RetrieverConfig};
pub use cache::ResultCache;
pub use cross_encoder::HttpCrossEncoder;
pub use embeddings::HttpEmbedder;
pub use expansion::{ExpandedQuery, SynonymExpander, SynonymExpanderConfig};
pub use hybrid::HybridRetriever;
pub use metrics::{MetricsSnapshot, RetrievalMetrics};
pub use optimizer::{ContextOptimizer, OptimizeStrategy};
pub use pipeline::{RetrievalPipeline, RetrieveRequest};
pub use reranker::CrossEncoderReranker;
pub use selector::{DynamicSelector, SelectionOutcome};
pub use service::{RetrievalService, RetrievalServiceBuilder};
pub use store::InMemoryPassageStore;
pub use vector::QdrantSearcher;
