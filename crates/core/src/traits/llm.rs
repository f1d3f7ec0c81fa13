//! Language model adapter

use async_trait::async_trait;

use crate::Result;

/// Language model interface consumed by the analyzer and the attribution
/// enhancer.
///
/// # Example
///
/// ```ignore
/// let llm: Arc<dyn LanguageModel> = Arc::new(HttpLanguageModel::new(config)?);
/// let analysis = llm.generate_json(&prompt, 0.1).await?;
/// ```
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate free-form text
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String>;

    /// Generate a JSON value. Implementations are responsible for
    /// extracting JSON from whatever the model returns (code fences,
    /// leading prose).
    async fn generate_json(&self, prompt: &str, temperature: f32) -> Result<serde_json::Value>;

    /// Adapter name for logging and annotations
    fn name(&self) -> &str;
}
