//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Runtime environment enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    /// Check if this is a production environment
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Runtime environment (development, staging, production)
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Hybrid fusion configuration
    #[serde(default)]
    pub hybrid: HybridConfig,

    /// BM25 retriever configuration
    #[serde(default)]
    pub bm25: Bm25Config,

    /// Retrieval pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Cross-encoder reranker configuration
    #[serde(default)]
    pub reranker: RerankerConfig,

    /// Context optimizer configuration
    #[serde(default)]
    pub optimizer: OptimizerConfig,

    /// Result cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Deadline configuration
    #[serde(default)]
    pub deadline: DeadlineConfig,

    /// Language model adapter configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Vector store adapter configuration
    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    /// Embedding adapter configuration
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,

    /// Cross-encoder adapter configuration
    #[serde(default)]
    pub cross_encoder: CrossEncoderConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Hybrid fusion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    /// Weight for dense scores; sparse gets `1 - alpha`
    #[serde(default = "default_alpha")]
    pub alpha: f32,
}

fn default_alpha() -> f32 {
    0.7
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
        }
    }
}

/// BM25 retriever configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Config {
    /// Term frequency saturation parameter
    #[serde(default = "default_k1")]
    pub k1: f32,
    /// Document length normalization parameter
    #[serde(default = "default_b")]
    pub b: f32,
    /// Enable the retriever-local query cache
    #[serde(default = "default_true")]
    pub use_cache: bool,
    /// TTL for the retriever-local query cache, seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_s: u64,
}

fn default_k1() -> f32 {
    1.5
}
fn default_b() -> f32 {
    0.75
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
            use_cache: true,
            cache_ttl_s: default_cache_ttl(),
        }
    }
}

/// Retrieval pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Candidates fetched before reranking
    #[serde(default = "default_first_stage_k")]
    pub first_stage_k: usize,
    /// Results returned to the caller
    #[serde(default = "default_final_k")]
    pub final_k: usize,
    /// Minimum results before the selector falls back to hybrid
    #[serde(default = "default_min_results")]
    pub min_results: usize,
    /// Enable LLM-backed query expansion
    #[serde(default = "default_true")]
    pub query_expansion: bool,
}

fn default_first_stage_k() -> usize {
    30
}
fn default_final_k() -> usize {
    5
}
fn default_min_results() -> usize {
    3
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            first_stage_k: default_first_stage_k(),
            final_k: default_final_k(),
            min_results: default_min_results(),
            query_expansion: true,
        }
    }
}

/// Cross-encoder reranker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// Enable reranking
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cross-encoder batch size
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    32
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: default_batch_size(),
        }
    }
}

/// Context optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Token budget for a context window
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Chunk count cap for a context window
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
    /// Sentence-overlap fraction above which a candidate is a near-duplicate
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: f32,
    /// Lambda weighting coverage against relevance in the coverage strategy
    #[serde(default = "default_diversity_weight")]
    pub diversity_weight: f32,
    /// Chunks allowed per document once three documents are represented
    #[serde(default = "default_max_same_doc")]
    pub max_same_doc: usize,
    /// Re-sort the final selection by original candidate position
    #[serde(default)]
    pub preserve_order: bool,
}

fn default_max_tokens() -> usize {
    3000
}
fn default_max_chunks() -> usize {
    10
}
fn default_overlap_threshold() -> f32 {
    0.7
}
fn default_diversity_weight() -> f32 {
    0.3
}
fn default_max_same_doc() -> usize {
    2
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            max_chunks: default_max_chunks(),
            overlap_threshold: default_overlap_threshold(),
            diversity_weight: default_diversity_weight(),
            max_same_doc: default_max_same_doc(),
            preserve_order: false,
        }
    }
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable the pipeline result cache
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Entry time-to-live, seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_s: u64,
    /// Maximum cached entries; the oldest is evicted on overflow
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_cache_ttl() -> u64 {
    3600
}
fn default_max_entries() -> usize {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_s: default_cache_ttl(),
            max_entries: default_max_entries(),
        }
    }
}

/// Deadline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineConfig {
    /// Per-request deadline, milliseconds
    #[serde(default = "default_request_ms")]
    pub request_ms: u64,
    /// Per-adapter timeout, milliseconds
    #[serde(default = "default_adapter_ms")]
    pub adapter_ms: u64,
}

fn default_request_ms() -> u64 {
    30_000
}
fn default_adapter_ms() -> u64 {
    10_000
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            request_ms: default_request_ms(),
            adapter_ms: default_adapter_ms(),
        }
    }
}

/// Language model adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible chat completions endpoint
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// API key (optional)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Maximum tokens to generate
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,
    /// Request timeout, milliseconds
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum retry attempts for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial backoff in milliseconds; doubles each retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_llm_endpoint() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_llm_model() -> String {
    "qwen2.5:7b-instruct".to_string()
}
fn default_llm_max_tokens() -> usize {
    1024
}
fn default_llm_timeout_ms() -> u64 {
    10_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    100
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key: None,
            max_tokens: default_llm_max_tokens(),
            timeout_ms: default_llm_timeout_ms(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

/// Vector store adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// Qdrant endpoint URL
    #[serde(default = "default_qdrant_endpoint")]
    pub endpoint: String,
    /// Collection name
    #[serde(default = "default_collection")]
    pub collection: String,
    /// API key (optional, for cloud deployments)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Embedding dimension
    #[serde(default = "default_vector_dim")]
    pub vector_dim: usize,
}

fn default_qdrant_endpoint() -> String {
    "http://localhost:6334".to_string()
}
fn default_collection() -> String {
    "passages".to_string()
}
fn default_vector_dim() -> usize {
    384
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: default_qdrant_endpoint(),
            collection: default_collection(),
            api_key: None,
            vector_dim: default_vector_dim(),
        }
    }
}

/// Embedding adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// Embedding API endpoint (Ollama-compatible `/api/embed`)
    #[serde(default = "default_embed_endpoint")]
    pub endpoint: String,
    /// Model name
    #[serde(default = "default_embed_model")]
    pub model: String,
    /// Output dimension
    #[serde(default = "default_vector_dim")]
    pub dimension: usize,
    /// Request timeout, milliseconds
    #[serde(default = "default_adapter_ms")]
    pub timeout_ms: u64,
}

fn default_embed_endpoint() -> String {
    "http://localhost:11434".to_string()
}
fn default_embed_model() -> String {
    "nomic-embed-text".to_string()
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_embed_endpoint(),
            model: default_embed_model(),
            dimension: default_vector_dim(),
            timeout_ms: default_adapter_ms(),
        }
    }
}

/// Cross-encoder adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossEncoderConfig {
    /// Scoring API endpoint
    #[serde(default = "default_cross_encoder_endpoint")]
    pub endpoint: String,
    /// Model name
    #[serde(default = "default_cross_encoder_model")]
    pub model: String,
    /// Request timeout, milliseconds
    #[serde(default = "default_adapter_ms")]
    pub timeout_ms: u64,
}

fn default_cross_encoder_endpoint() -> String {
    "http://localhost:8501".to_string()
}
fn default_cross_encoder_model() -> String {
    "cross-encoder/ms-marco-MiniLM-L-6-v2".to_string()
}

impl Default for CrossEncoderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_cross_encoder_endpoint(),
            model: default_cross_encoder_model(),
            timeout_ms: default_adapter_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (`error`, `warn`, `info`, `debug`, `trace`)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON-formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.hybrid.alpha) {
            return Err(ConfigError::Invalid(format!(
                "hybrid.alpha must be in [0, 1], got {}",
                self.hybrid.alpha
            )));
        }
        if self.bm25.k1 <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "bm25.k1 must be positive, got {}",
                self.bm25.k1
            )));
        }
        if !(0.0..=1.0).contains(&self.bm25.b) {
            return Err(ConfigError::Invalid(format!(
                "bm25.b must be in [0, 1], got {}",
                self.bm25.b
            )));
        }
        if self.pipeline.final_k == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.final_k must be at least 1".to_string(),
            ));
        }
        if self.pipeline.first_stage_k < self.pipeline.final_k {
            return Err(ConfigError::Invalid(format!(
                "pipeline.first_stage_k ({}) must be >= pipeline.final_k ({})",
                self.pipeline.first_stage_k, self.pipeline.final_k
            )));
        }
        if self.reranker.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "reranker.batch_size must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.optimizer.overlap_threshold) {
            return Err(ConfigError::Invalid(format!(
                "optimizer.overlap_threshold must be in [0, 1], got {}",
                self.optimizer.overlap_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.optimizer.diversity_weight) {
            return Err(ConfigError::Invalid(format!(
                "optimizer.diversity_weight must be in [0, 1], got {}",
                self.optimizer.diversity_weight
            )));
        }
        if self.optimizer.max_tokens == 0 || self.optimizer.max_chunks == 0 {
            return Err(ConfigError::Invalid(
                "optimizer.max_tokens and optimizer.max_chunks must be at least 1".to_string(),
            ));
        }
        if self.deadline.request_ms == 0 || self.deadline.adapter_ms == 0 {
            return Err(ConfigError::Invalid(
                "deadline.request_ms and deadline.adapter_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load settings from layered sources.
///
/// Layers, later overriding earlier: `config/default.{toml,yaml,json}`, an
/// optional environment-specific `config/{env}` file, then `RAGPIPE__`
/// environment variables with `__` as the section separator
/// (`RAGPIPE__HYBRID__ALPHA=0.5`).
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("RAGPIPE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
