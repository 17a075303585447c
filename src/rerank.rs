//! Second-pass relevance reranking.
//!
//! A cross-encoder scores (question, passage) pairs jointly, which is more
//! accurate than embedding similarity but costs another network round trip.
//! The [`RerankPolicy`] decides per question whether that cost is justified;
//! a failed rerank call degrades to the original retrieval ordering instead
//! of failing the request.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::RerankConfig;
use crate::models::ScoredChunk;
use crate::retry::{is_retryable_status, RetryPolicy};

/// Reorders retrieval candidates by a relevance model distinct from the
/// embedding metric. Returns a subsequence of at most the input length.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, question: &str, candidates: &[ScoredChunk]) -> Result<Vec<ScoredChunk>>;
}

/// When to invoke the reranker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerankPolicy {
    Always,
    Never,
    /// Rerank only complex questions (length or ambiguity markers).
    Auto { min_question_words: usize },
}

impl RerankPolicy {
    pub fn from_config(config: &RerankConfig) -> Self {
        match config.policy.as_str() {
            "always" => RerankPolicy::Always,
            "never" => RerankPolicy::Never,
            _ => RerankPolicy::Auto {
                min_question_words: config.min_question_words,
            },
        }
    }

    /// Markers suggesting a question needs cross-passage reasoning, where a
    /// second scoring pass pays for itself.
    const AMBIGUITY_MARKERS: [&'static str; 7] = [
        "compare", "difference", "versus", " vs ", "why", "how", "explain",
    ];

    pub fn should_rerank(&self, question: &str) -> bool {
        match self {
            RerankPolicy::Always => true,
            RerankPolicy::Never => false,
            RerankPolicy::Auto { min_question_words } => {
                let words = question.split_whitespace().count();
                if words >= *min_question_words {
                    return true;
                }
                let lower = question.to_lowercase();
                Self::AMBIGUITY_MARKERS
                    .iter()
                    .any(|marker| lower.contains(marker))
            }
        }
    }
}

/// HTTP cross-encoder client (NVIDIA-style `POST /v1/ranking` contract:
/// a query, a passage list, and ranked `{index, logit}` results).
pub struct HttpReranker {
    client: reqwest::Client,
    url: String,
    model: Option<String>,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl HttpReranker {
    /// Returns `None` when no rerank endpoint is configured.
    pub fn new(config: &RerankConfig) -> Result<Option<Self>> {
        let Some(url) = config.url.clone() else {
            return Ok(None);
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Some(Self {
            client,
            url,
            model: config.model.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
            // Latency-sensitive second pass: one retry, then degrade.
            retry: RetryPolicy::new(1),
        }))
    }
}

#[derive(Deserialize)]
struct RankingResponse {
    #[serde(default)]
    rankings: Vec<Ranking>,
}

#[derive(Deserialize)]
struct Ranking {
    index: usize,
    #[serde(default)]
    logit: f32,
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(&self, question: &str, candidates: &[ScoredChunk]) -> Result<Vec<ScoredChunk>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let passages: Vec<serde_json::Value> = candidates
            .iter()
            .map(|c| serde_json::json!({ "text": c.chunk.text }))
            .collect();

        let mut body = serde_json::json!({
            "query": { "text": question },
            "passages": passages,
        });
        if let Some(model) = &self.model {
            body["model"] = serde_json::Value::String(model.clone());
        }

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
                        let json: RankingResponse = response.json().await?;
                        return Ok(apply_rankings(candidates, &json.rankings));
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if is_retryable_status(status) {
                        last_err =
                            Some(anyhow::anyhow!("rerank API error {}: {}", status, body_text));
                        continue;
                    }
                    bail!("rerank API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("rerank failed after retries")))
    }
}

/// Reorder candidates by ranking entries, skipping out-of-range indices.
fn apply_rankings(candidates: &[ScoredChunk], rankings: &[Ranking]) -> Vec<ScoredChunk> {
    rankings
        .iter()
        .filter_map(|r| {
            candidates.get(r.index).map(|c| ScoredChunk {
                chunk: c.chunk.clone(),
                score: r.logit,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn candidate(ordinal: usize) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                source_id: "doc1".to_string(),
                ordinal,
                text: format!("passage {}", ordinal),
                page: None,
            },
            score: 1.0 - ordinal as f32 * 0.1,
        }
    }

    #[test]
    fn always_and_never_policies() {
        assert!(RerankPolicy::Always.should_rerank("short?"));
        assert!(!RerankPolicy::Never.should_rerank(
            "a very long and complicated question about many policy details indeed it is"
        ));
    }

    #[test]
    fn auto_triggers_on_length() {
        let policy = RerankPolicy::Auto {
            min_question_words: 5,
        };
        assert!(policy.should_rerank("what is the waiting period for cataract"));
        assert!(!policy.should_rerank("waiting period?"));
    }

    #[test]
    fn auto_triggers_on_ambiguity_markers() {
        let policy = RerankPolicy::Auto {
            min_question_words: 50,
        };
        assert!(policy.should_rerank("compare Plan A and Plan B"));
        assert!(policy.should_rerank("How does the policy define a hospital?"));
        assert!(!policy.should_rerank("grace period?"));
    }

    #[test]
    fn rankings_reorder_and_bound() {
        let candidates = vec![candidate(0), candidate(1), candidate(2)];
        let rankings = vec![
            Ranking {
                index: 2,
                logit: 9.0,
            },
            Ranking {
                index: 0,
                logit: 4.0,
            },
        ];
        let reordered = apply_rankings(&candidates, &rankings);
        assert_eq!(reordered.len(), 2);
        assert_eq!(reordered[0].chunk.ordinal, 2);
        assert_eq!(reordered[1].chunk.ordinal, 0);
    }

    #[test]
    fn out_of_range_rankings_skipped() {
        let candidates = vec![candidate(0)];
        let rankings = vec![Ranking {
            index: 7,
            logit: 1.0,
        }];
        assert!(apply_rankings(&candidates, &rankings).is_empty());
    }
}
