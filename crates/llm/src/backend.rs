//! HTTP LLM backend
//!
//! Talks to any OpenAI-compatible chat completions endpoint (Ollama,
//! vLLM, llama.cpp server). Transient failures are retried with
//! exponential backoff; timeouts surface as `AdapterTimeout` so the
//! metrics recorder can count them separately.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use ragpipe_config::LlmConfig;
use ragpipe_core::{LanguageModel, Result};

use crate::LlmError;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: usize,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// OpenAI-compatible chat completions client
pub struct HttpLanguageModel {
    client: Client,
    config: LlmConfig,
}

impl HttpLanguageModel {
    /// Create a new backend from configuration
    pub fn new(config: LlmConfig) -> std::result::Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;

        Ok(Self { client, config })
    }

    async fn chat(&self, prompt: &str, temperature: f32) -> std::result::Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        };

        let url = format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'));

        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);
        let mut last_error = LlmError::Request("no attempts made".to_string());

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            let mut builder = self.client.post(&url).json(&request);
            if let Some(ref key) = self.config.api_key {
                builder = builder.bearer_auth(key);
            }

            match builder.send().await {
                Ok(response) if response.status().is_success() => {
                    let parsed: ChatResponse = response
                        .json()
                        .await
                        .map_err(|e| LlmError::Response(e.to_string()))?;
                    let content = parsed
                        .choices
                        .into_iter()
                        .next()
                        .map(|c| c.message.content)
                        .ok_or_else(|| LlmError::Response("empty choices".to_string()))?;
                    return Ok(content);
                },
                Ok(response) if response.status().is_server_error() => {
                    last_error = LlmError::Request(format!(
                        "server error {} from {}",
                        response.status(),
                        self.config.model
                    ));
                    tracing::warn!(
                        attempt,
                        status = %response.status(),
                        "LLM request failed, retrying"
                    );
                },
                Ok(response) => {
                    // Client errors are not retryable.
                    return Err(LlmError::Request(format!(
                        "status {} from {}",
                        response.status(),
                        self.config.model
                    )));
                },
                Err(e) if e.is_timeout() => {
                    return Err(LlmError::Timeout(format!(
                        "model {} exceeded {}ms",
                        self.config.model, self.config.timeout_ms
                    )));
                },
                Err(e) => {
                    last_error = LlmError::Request(e.to_string());
                    tracing::warn!(attempt, error = %e, "LLM request failed, retrying");
                },
            }
        }

        Err(last_error)
    }
}

/// Extract a JSON value from model output.
///
/// Models wrap JSON in code fences or prepend prose; this strips fences,
/// then falls back to the outermost bracketed span.
pub(crate) fn extract_json(raw: &str) -> std::result::Result<serde_json::Value, LlmError> {
    let trimmed = raw.trim();

    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    if let Ok(value) = serde_json::from_str(unfenced) {
        return Ok(value);
    }

    // Fall back to the outermost object or array span.
    let start = unfenced.find(['{', '[']);
    let end = unfenced.rfind(['}', ']']);
    if let (Some(start), Some(end)) = (start, end) {
        if end > start {
            if let Ok(value) = serde_json::from_str(&unfenced[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(LlmError::MalformedJson(
        unfenced.chars().take(120).collect::<String>(),
    ))
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String> {
        Ok(self.chat(prompt, temperature).await?)
    }

    async fn generate_json(&self, prompt: &str, temperature: f32) -> Result<serde_json::Value> {
        let raw = self.chat(prompt, temperature).await?;
        Ok(extract_json(&raw)?)
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_plain() {
        let value = extract_json(r#"{"query_type": "keyword"}"#).unwrap();
        assert_eq!(value["query_type"], "keyword");
    }

    #[test]
    fn test_extract_json_fenced() {
        let raw = "```json\n{\"rewritten_query\": \"used car prices\"}\n```";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["rewritten_query"], "used car prices");
    }

    #[test]
    fn test_extract_json_with_prose() {
        let raw = "Here is the analysis:\n[{\"text\": \"a claim\", \"confidence\": 0.8}]";
        let value = extract_json(raw).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["confidence"], 0.8);
    }

    #[test]
    fn test_extract_json_rejects_garbage() {
        assert!(extract_json("the model refused to answer").is_err());
    }
}
