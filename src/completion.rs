//! Chat completion client and the closed set of model providers.
//!
//! Provider selection is a tagged enum, not string branching: adding a
//! provider means adding a [`ModelProvider`] variant and its hosted model id.
//! All variants are served through one OpenAI-compatible chat completions
//! endpoint, so the [`CompletionClient`] contract stays provider-agnostic.
//!
//! Rate limits (429) and server errors are retried with the shared backoff
//! schedule; exhausting the budget surfaces `RateLimited` or
//! `CompletionFailure` — never a fabricated answer.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::CompletionConfig;
use crate::error::PipelineError;
use crate::prompt::Prompt;
use crate::retry::{is_retryable_status, RetryPolicy};

/// Hosted chat models the service can generate with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelProvider {
    Qwen,
    Mistral,
    Llama,
    Nemotron,
    Gemma,
}

impl ModelProvider {
    /// The hosted model identifier sent on the wire.
    pub fn model_id(&self) -> &'static str {
        match self {
            ModelProvider::Qwen => "qwen/qwen2.5-7b-instruct",
            ModelProvider::Mistral => "mistralai/mistral-small-24b-instruct",
            ModelProvider::Llama => "meta/llama-3.3-70b-instruct",
            ModelProvider::Nemotron => "nvidia/llama-3.3-nemotron-super-49b-v1",
            ModelProvider::Gemma => "google/gemma-3n-e4b-it",
        }
    }

    /// Accepts either the short name (`"qwen"`) or a full model id.
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "qwen" => return Some(ModelProvider::Qwen),
            "mistral" => return Some(ModelProvider::Mistral),
            "llama" => return Some(ModelProvider::Llama),
            "nemotron" => return Some(ModelProvider::Nemotron),
            "gemma" => return Some(ModelProvider::Gemma),
            _ => {}
        }
        ModelProvider::all()
            .iter()
            .find(|p| p.model_id() == lower)
            .copied()
    }

    pub fn all() -> &'static [ModelProvider] {
        &[
            ModelProvider::Qwen,
            ModelProvider::Mistral,
            ModelProvider::Llama,
            ModelProvider::Nemotron,
            ModelProvider::Gemma,
        ]
    }
}

impl std::fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.model_id())
    }
}

/// The generation capability the orchestrator depends on.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        prompt: &Prompt,
        temperature: f32,
        model: ModelProvider,
    ) -> Result<String, PipelineError>;
}

/// HTTP client for OpenAI-compatible chat completions endpoints.
pub struct HttpCompletionClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl HttpCompletionClient {
    pub fn new(config: &CompletionConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
            retry: RetryPolicy::new(config.max_retries),
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(
        &self,
        prompt: &Prompt,
        temperature: f32,
        model: ModelProvider,
    ) -> Result<String, PipelineError> {
        let body = serde_json::json!({
            "model": model.model_id(),
            "messages": [
                { "role": "system", "content": &prompt.system },
                { "role": "user", "content": &prompt.user },
            ],
            "temperature": temperature,
        });

        let mut last_err = None;

        for attempt in self.retry.attempts() {
            if attempt > 0 {
                debug!(attempt, model = %model, "retrying completion");
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
                        let parsed: ChatResponse = response.json().await.map_err(|e| {
                            PipelineError::CompletionFailure(format!("bad response body: {}", e))
                        })?;
                        return parsed
                            .choices
                            .into_iter()
                            .next()
                            .map(|c| c.message.content)
                            .ok_or_else(|| {
                                PipelineError::CompletionFailure("empty choices".into())
                            });
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 {
                        last_err = Some(PipelineError::RateLimited(format!(
                            "HTTP 429: {}",
                            body_text
                        )));
                        continue;
                    }
                    if is_retryable_status(status) {
                        last_err = Some(PipelineError::CompletionFailure(format!(
                            "HTTP {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    // Client error — retrying cannot help.
                    return Err(PipelineError::CompletionFailure(format!(
                        "HTTP {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(PipelineError::CompletionFailure(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| PipelineError::CompletionFailure("retries exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_short_names() {
        assert_eq!(ModelProvider::parse("qwen"), Some(ModelProvider::Qwen));
        assert_eq!(ModelProvider::parse("Llama"), Some(ModelProvider::Llama));
        assert_eq!(
            ModelProvider::parse("nemotron"),
            Some(ModelProvider::Nemotron)
        );
        assert_eq!(ModelProvider::parse("claude"), None);
    }

    #[test]
    fn parse_full_model_ids() {
        assert_eq!(
            ModelProvider::parse("qwen/qwen2.5-7b-instruct"),
            Some(ModelProvider::Qwen)
        );
        assert_eq!(
            ModelProvider::parse("google/gemma-3n-e4b-it"),
            Some(ModelProvider::Gemma)
        );
    }

    #[test]
    fn every_provider_has_distinct_model_id() {
        let ids: std::collections::HashSet<_> =
            ModelProvider::all().iter().map(|p| p.model_id()).collect();
        assert_eq!(ids.len(), ModelProvider::all().len());
    }
}
