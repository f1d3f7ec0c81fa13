//! Core types and traits for the retrieval pipeline
//!
//! This crate provides the foundation shared by every other crate:
//! - Passage, search result, and context window types
//! - The adapter traits the core consumes (LLM, embeddings, vector store,
//!   cross-encoder, tokenizer, passage store)
//! - The error taxonomy for stage boundaries

pub mod error;
pub mod tokens;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use tokens::estimate_tokens;
pub use types::{
    AttributedResponse, Attribution, CitationStyle, CitedSource, ContextChunk, ContextWindow,
    Passage, QueryAnalysis, QueryType, RetrievalEnvelope, RetrievalMethod, SearchFilters,
    SearchResult, SourceInfo, StageTimings,
};

pub use traits::{
    CrossEncoderScorer, Embedder, LanguageModel, PassageStore, TokenCounter, VectorSearcher,
};
