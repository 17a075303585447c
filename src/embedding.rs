//! Embedding client abstraction and HTTP implementation.
//!
//! The [`EmbeddingClient`] trait is the contract the pipeline depends on:
//! `embed(texts) -> vectors`, one vector per input text, in input order,
//! all of [`EmbeddingClient::dims`] dimensionality. The HTTP implementation
//! targets an OpenAI-compatible `POST /v1/embeddings` endpoint (NVIDIA NIM
//! serves this shape) with batching and bounded backoff.
//!
//! Also home to [`cosine_similarity`], the metric both vector store variants
//! rank by.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::retry::{is_retryable_status, RetryPolicy};

/// Maps text to fixed-dimension vectors. Implementations must be cheap to
/// share behind an `Arc` across concurrent question pipelines.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Model identifier (e.g. `"nvidia/nv-embed-v1"`).
    fn model_name(&self) -> &str;

    /// Vector dimensionality; constant for the client's lifetime.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per text in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// HTTP embedding client for OpenAI-compatible endpoints.
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    batch_size: usize,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            warn!(
                env = %config.api_key_env,
                "embedding API key not set; requests will be unauthenticated"
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            api_key,
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in self.retry.attempts() {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay(attempt)).await;
            }

            let mut request = self.client.post(&self.url).json(&body);
            if let Some(key) = &self.api_key {
                request = request.header("Authorization", format!("Bearer {}", key));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embeddings_response(&json, texts.len(), self.dims);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if is_retryable_status(status) {
                        last_err =
                            Some(anyhow::anyhow!("embedding API error {}: {}", status, body_text));
                        continue;
                    }

                    bail!("embedding API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding failed after retries")))
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }
}

/// Parse `{"data": [{"embedding": [...]}, ...]}` and validate count and
/// dimensionality.
fn parse_embeddings_response(
    json: &serde_json::Value,
    expected_count: usize,
    expected_dims: usize,
) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid embeddings response: missing data array"))?;

    if data.len() != expected_count {
        bail!(
            "invalid embeddings response: expected {} vectors, got {}",
            expected_count,
            data.len()
        );
    }

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("invalid embeddings response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        if vec.len() != expected_dims {
            bail!(
                "invalid embeddings response: expected {}-dim vector, got {}",
                expected_dims,
                vec.len()
            );
        }

        embeddings.push(vec);
    }

    Ok(embeddings)
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched-length
/// vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_response() {
        let json = serde_json::json!({
            "data": [
                {"embedding": [1.0, 0.0, 0.5]},
                {"embedding": [0.0, 1.0, -0.5]},
            ]
        });
        let vecs = parse_embeddings_response(&json, 2, 3).unwrap();
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[0], vec![1.0, 0.0, 0.5]);
    }

    #[test]
    fn parse_rejects_wrong_count() {
        let json = serde_json::json!({"data": [{"embedding": [1.0]}]});
        assert!(parse_embeddings_response(&json, 2, 1).is_err());
    }

    #[test]
    fn parse_rejects_wrong_dims() {
        let json = serde_json::json!({"data": [{"embedding": [1.0, 2.0]}]});
        assert!(parse_embeddings_response(&json, 1, 3).is_err());
    }

    #[test]
    fn cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_empty_or_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
