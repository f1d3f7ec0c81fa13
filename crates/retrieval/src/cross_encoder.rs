//! HTTP cross-encoder adapter
//!
//! Implements [`CrossEncoderScorer`] against a pair-scoring service. Each
//! request carries one batch of `(query, passage)` pairs and returns one
//! score per pair; the adapter slices the caller's flat pair list into
//! batches itself.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use ragpipe_config::CrossEncoderConfig;
use ragpipe_core::{CrossEncoderScorer, Error, Result};

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    model: &'a str,
    pairs: Vec<[&'a str; 2]>,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    scores: Vec<f32>,
}

/// HTTP pair-scoring client
pub struct HttpCrossEncoder {
    client: Client,
    config: CrossEncoderConfig,
}

impl HttpCrossEncoder {
    pub fn new(config: CrossEncoderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::AdapterUnavailable(format!("cross-encoder client: {e}")))?;

        Ok(Self { client, config })
    }

    async fn score_batch(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
        let request = ScoreRequest {
            model: &self.config.model,
            pairs: pairs
                .iter()
                .map(|(q, d)| [q.as_str(), d.as_str()])
                .collect(),
        };
        let url = format!("{}/score", self.config.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::AdapterTimeout(format!(
                        "cross-encoder {} exceeded {}ms",
                        self.config.model, self.config.timeout_ms
                    ))
                } else {
                    Error::AdapterUnavailable(format!("cross-encoder request: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(Error::AdapterUnavailable(format!(
                "cross-encoder endpoint returned {}",
                response.status()
            )));
        }

        let parsed: ScoreResponse = response
            .json()
            .await
            .map_err(|e| Error::AdapterUnavailable(format!("cross-encoder response: {e}")))?;

        if parsed.scores.len() != pairs.len() {
            return Err(Error::AdapterUnavailable(format!(
                "cross-encoder returned {} scores for {} pairs",
                parsed.scores.len(),
                pairs.len()
            )));
        }

        Ok(parsed.scores)
    }
}

#[async_trait]
impl CrossEncoderScorer for HttpCrossEncoder {
    async fn score(&self, pairs: &[(String, String)], batch_size: usize) -> Result<Vec<f32>> {
        let batch_size = batch_size.max(1);
        let mut scores = Vec::with_capacity(pairs.len());

        for batch in pairs.chunks(batch_size) {
            scores.extend(self.score_batch(batch).await?);
        }

        Ok(scores)
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}
