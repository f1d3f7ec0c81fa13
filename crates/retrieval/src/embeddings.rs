//! HTTP embedding adapter
//!
//! Implements [`Embedder`] against an Ollama-compatible `/api/embed`
//! endpoint. Documents are embedded as plain text; batches are sent one
//! request per text to keep memory on the embedding server bounded.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use ragpipe_config::EmbeddingsConfig;
use ragpipe_core::{Embedder, Error, Result};

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama-compatible embedding client
pub struct HttpEmbedder {
    client: Client,
    config: EmbeddingsConfig,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::AdapterUnavailable(format!("embedding client: {e}")))?;

        Ok(Self { client, config })
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbedRequest {
            model: &self.config.model,
            input: text,
        };
        let url = format!("{}/api/embed", self.config.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::AdapterTimeout(format!(
                        "embedding model {} exceeded {}ms",
                        self.config.model, self.config.timeout_ms
                    ))
                } else {
                    Error::AdapterUnavailable(format!("embedding request: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(Error::AdapterUnavailable(format!(
                "embedding endpoint returned {}",
                response.status()
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::AdapterUnavailable(format!("embedding response: {e}")))?;

        let embedding = parsed
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::AdapterUnavailable("no embedding returned".into()))?;

        if embedding.len() != self.config.dimension {
            tracing::warn!(
                expected = self.config.dimension,
                got = embedding.len(),
                "embedding dimension differs from configuration"
            );
        }

        Ok(embedding)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed_one(text).await?);
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}
