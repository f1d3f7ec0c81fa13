//! Configuration for the retrieval pipeline
//!
//! Settings are layered: a default config file, an optional
//! environment-specific file, and `RAGPIPE__`-prefixed environment
//! variables, validated after load.

pub mod settings;

pub use settings::{
    load_settings, Bm25Config, CacheConfig, CrossEncoderConfig, DeadlineConfig, EmbeddingsConfig,
    HybridConfig, LlmConfig, LoggingConfig, OptimizerConfig, PipelineConfig, RerankerConfig,
    RuntimeEnvironment, Settings, VectorStoreConfig,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
