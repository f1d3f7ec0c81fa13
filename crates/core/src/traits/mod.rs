//! Adapter traits the retrieval core consumes
//!
//! Each trait is a narrow interface over an external dependency. Every call
//! is a suspension point: implementations are expected to pool connections
//! internally so a slow adapter does not starve unrelated requests.

mod embed;
mod llm;
mod rerank;
mod store;
mod tokenize;
mod vector;

pub use embed::Embedder;
pub use llm::LanguageModel;
pub use rerank::CrossEncoderScorer;
pub use store::PassageStore;
pub use tokenize::TokenCounter;
pub use vector::VectorSearcher;
