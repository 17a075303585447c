use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub completion: CompletionConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Environment variable holding the bearer token required on the API
    /// endpoint. An unset variable disables the check (local development).
    #[serde(default = "default_auth_token_env")]
    pub auth_token_env: String,
}

fn default_auth_token_env() -> String {
    "ASKDOC_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// SQLite file backing the request audit log.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk width in characters.
    pub window_chars: usize,
    /// Characters shared between adjacent chunks. Must be < window_chars.
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible embeddings endpoint (e.g. a NIM `/v1/embeddings`).
    pub url: String,
    pub model: String,
    /// Expected vector dimensionality; enforced on every batch.
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    /// OpenAI-compatible chat completions endpoint.
    pub url: String,
    /// Default model when the request does not select one.
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_model() -> String {
    "qwen".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    /// `always`, `never`, or `auto` (question complexity heuristic).
    #[serde(default = "default_rerank_policy")]
    pub policy: String,
    /// Cross-encoder reranking endpoint. Unset disables reranking even when
    /// the policy would request it.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// `auto` policy: rerank questions with at least this many words.
    #[serde(default = "default_min_question_words")]
    pub min_question_words: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            policy: default_rerank_policy(),
            url: None,
            model: None,
            min_question_words: default_min_question_words(),
            timeout_secs: default_timeout_secs(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_rerank_policy() -> String {
    "auto".to_string()
}
fn default_min_question_words() -> usize {
    12
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    /// Base URL of the persistent vector index. Unset means no standing
    /// knowledge base: document-free queries answer from empty context.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CacheConfig {
    /// Maximum cached answers. Unset means unbounded for the process
    /// lifetime.
    #[serde(default)]
    pub max_entries: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Upper bound on per-question pipelines running at once, to respect
    /// upstream rate limits.
    #[serde(default = "default_max_concurrent_questions")]
    pub max_concurrent_questions: usize,
    /// `auto` (documents present -> ephemeral, none -> persistent),
    /// `ephemeral`, or `persistent`.
    #[serde(default = "default_routing")]
    pub routing: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_questions: default_max_concurrent_questions(),
            routing: default_routing(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

fn default_max_concurrent_questions() -> usize {
    4
}
fn default_routing() -> String {
    "auto".to_string()
}
fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_completion_timeout_secs() -> u64 {
    120
}
fn default_api_key_env() -> String {
    "NVIDIA_API_KEY".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.window_chars == 0 {
        anyhow::bail!("chunking.window_chars must be > 0");
    }

    if config.chunking.overlap_chars >= config.chunking.window_chars {
        anyhow::bail!("chunking.overlap_chars must be < chunking.window_chars");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    match config.rerank.policy.as_str() {
        "always" | "never" | "auto" => {}
        other => anyhow::bail!(
            "Unknown rerank policy: '{}'. Must be always, never, or auto.",
            other
        ),
    }

    match config.pipeline.routing.as_str() {
        "auto" | "ephemeral" | "persistent" => {}
        other => anyhow::bail!(
            "Unknown store routing: '{}'. Must be auto, ephemeral, or persistent.",
            other
        ),
    }

    if config.pipeline.max_concurrent_questions == 0 {
        anyhow::bail!("pipeline.max_concurrent_questions must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("askdoc.toml");
        std::fs::write(&path, content).unwrap();
        (tmp, path)
    }

    const MINIMAL: &str = r#"
[server]
bind = "127.0.0.1:7431"

[db]
path = "data/askdoc.sqlite"

[chunking]
window_chars = 1000
overlap_chars = 200

[embedding]
url = "http://localhost:9000/v1/embeddings"
model = "nvidia/nv-embed-v1"
dims = 4096

[completion]
url = "http://localhost:9001/v1/chat/completions"
"#;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let (_tmp, path) = write_config(MINIMAL);
        let config = load_config(&path).unwrap();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.rerank.policy, "auto");
        assert_eq!(config.pipeline.routing, "auto");
        assert!(config.cache.max_entries.is_none());
        assert!(config.store.url.is_none());
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        let bad = MINIMAL.replace("overlap_chars = 200", "overlap_chars = 1000");
        let (_tmp, path) = write_config(&bad);
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn unknown_rerank_policy_rejected() {
        let bad = format!("{}\n[rerank]\npolicy = \"sometimes\"\n", MINIMAL);
        let (_tmp, path) = write_config(&bad);
        assert!(load_config(&path).is_err());
    }
}
