//! Persistent remote vector index client.
//!
//! Speaks a Pinecone-style REST contract: vectors are upserted and queried
//! under a namespace that survives across requests, forming the standing
//! knowledge base served when a query arrives without documents. Chunk text
//! and citation fields ride along as vector metadata so query responses are
//! self-contained.
//!
//! The store's dimension comes from configuration; mismatched batches are
//! rejected locally before any bytes go on the wire.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::PipelineError;
use crate::models::{Chunk, ScoredChunk};
use crate::retry::{is_retryable_status, RetryPolicy};

pub struct RemoteStore {
    client: reqwest::Client,
    base_url: String,
    namespace: String,
    dims: usize,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl RemoteStore {
    /// `dims` must match the embedding model's dimensionality; the index is
    /// assumed to have been created with it.
    pub fn new(config: &StoreConfig, dims: usize) -> anyhow::Result<Option<Self>> {
        let Some(base_url) = config.url.clone() else {
            return Ok(None);
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Some(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            namespace: config.namespace.clone(),
            dims,
            api_key: std::env::var(&config.api_key_env).ok(),
            retry: RetryPolicy::new(config.max_retries),
        }))
    }

    fn endpoint(&self, op: &str) -> String {
        format!(
            "{}/v1/namespaces/{}/{}",
            self.base_url, self.namespace, op
        )
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, PipelineError> {
        let mut last_err = None;

        for attempt in self.retry.attempts() {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay(attempt)).await;
            }

            let mut request = self.client.post(url).json(body);
            if let Some(key) = &self.api_key {
                request = request.header("Authorization", format!("Bearer {}", key));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json().await.map_err(|e| {
                            PipelineError::FetchFailure(format!("{}: {}", url, e))
                        });
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = PipelineError::FetchFailure(format!(
                        "{}: HTTP {}: {}",
                        url, status, body_text
                    ));
                    if is_retryable_status(status) {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(PipelineError::FetchFailure(format!("{}: {}", url, e)));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| PipelineError::FetchFailure("vector index unreachable".into())))
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: MatchMetadata,
}

#[derive(Deserialize, Default)]
struct MatchMetadata {
    #[serde(default)]
    source_id: String,
    #[serde(default)]
    ordinal: usize,
    #[serde(default)]
    text: String,
    #[serde(default)]
    page: Option<u32>,
}

#[derive(Deserialize)]
struct StatsResponse {
    #[serde(default)]
    vector_count: usize,
}

#[async_trait]
impl super::VectorStore for RemoteStore {
    async fn insert(&self, entries: Vec<super::IndexEntry>) -> Result<(), PipelineError> {
        if entries.is_empty() {
            return Ok(());
        }

        for entry in &entries {
            if entry.vector.len() != self.dims {
                return Err(PipelineError::DimensionMismatch {
                    expected: self.dims,
                    got: entry.vector.len(),
                });
            }
        }

        let vectors: Vec<serde_json::Value> = entries
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "id": format!("{}#{}", entry.chunk.source_id, entry.chunk.ordinal),
                    "values": entry.vector,
                    "metadata": {
                        "source_id": entry.chunk.source_id,
                        "ordinal": entry.chunk.ordinal,
                        "text": entry.chunk.text,
                        "page": entry.chunk.page,
                    },
                })
            })
            .collect();

        debug!(
            namespace = %self.namespace,
            count = vectors.len(),
            "upserting vectors"
        );

        self.post_json(
            &self.endpoint("upsert"),
            &serde_json::json!({ "vectors": vectors }),
        )
        .await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, PipelineError> {
        let json = self
            .post_json(
                &self.endpoint("query"),
                &serde_json::json!({
                    "vector": vector,
                    "top_k": k,
                    "include_metadata": true,
                }),
            )
            .await?;

        let response: QueryResponse = serde_json::from_value(json)
            .map_err(|e| PipelineError::FetchFailure(format!("bad query response: {}", e)))?;

        Ok(response
            .matches
            .into_iter()
            .map(|m| ScoredChunk {
                chunk: Chunk {
                    source_id: m.metadata.source_id,
                    ordinal: m.metadata.ordinal,
                    text: m.metadata.text,
                    page: m.metadata.page,
                },
                score: m.score,
            })
            .collect())
    }

    async fn count(&self) -> Result<usize, PipelineError> {
        let json = self
            .post_json(&self.endpoint("stats"), &serde_json::json!({}))
            .await?;
        let response: StatsResponse = serde_json::from_value(json)
            .map_err(|e| PipelineError::FetchFailure(format!("bad stats response: {}", e)))?;
        Ok(response.vector_count)
    }
}
