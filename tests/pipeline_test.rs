//! End-to-end pipeline tests with stub capabilities.
//!
//! The embedding, completion, and rerank collaborators are replaced with
//! in-process stubs so every property of the orchestration layer — index
//! alignment, caching, single-flight, partial ingestion, empty-context
//! behavior — is observable without network access.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use askdoc::cache::AnswerCache;
use askdoc::completion::{CompletionClient, ModelProvider};
use askdoc::config::Config;
use askdoc::embedding::EmbeddingClient;
use askdoc::error::PipelineError;
use askdoc::metrics::Metrics;
use askdoc::models::{DocumentSource, QueryRequest, QuestionResult, ScoredChunk};
use askdoc::pipeline::Pipeline;
use askdoc::prompt::{Prompt, NO_CONTEXT_MARKER};
use askdoc::rerank::Reranker;

const DIMS: usize = 8;

/// Deterministic embedder: projects character histograms into a small
/// vector, so similar texts land near each other and nothing is random.
struct StubEmbedder;

#[async_trait]
impl EmbeddingClient for StubEmbedder {
    fn model_name(&self) -> &str {
        "stub-embed"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; DIMS];
                for (i, b) in text.bytes().enumerate() {
                    v[(b as usize + i) % DIMS] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Canned completion client that counts invocations and remembers the last
/// prompt it saw.
struct StubCompleter {
    calls: AtomicU64,
    response: String,
    last_prompt: Mutex<Option<Prompt>>,
    /// Fail this many leading calls with a retryable-looking error.
    fail_first: AtomicU64,
}

impl StubCompleter {
    fn new(response: &str) -> Self {
        Self {
            calls: AtomicU64::new(0),
            response: response.to_string(),
            last_prompt: Mutex::new(None),
            fail_first: AtomicU64::new(0),
        }
    }

    fn failing(response: &str, failures: u64) -> Self {
        let stub = Self::new(response);
        stub.fail_first.store(failures, Ordering::SeqCst);
        stub
    }

    fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_prompt(&self) -> Option<Prompt> {
        self.last_prompt.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for StubCompleter {
    async fn complete(
        &self,
        prompt: &Prompt,
        _temperature: f32,
        _model: ModelProvider,
    ) -> Result<String, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(prompt.clone());

        let claimed_failure = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok();
        if claimed_failure {
            return Err(PipelineError::CompletionFailure("stub outage".into()));
        }

        // Slow enough that concurrent callers genuinely overlap.
        tokio::time::sleep(std::time::Duration::from_millis(15)).await;
        Ok(self.response.clone())
    }
}

/// Reranker stub that reverses the candidate order, making its invocation
/// observable, or fails on demand.
struct StubReranker {
    fail: bool,
    calls: AtomicU64,
}

#[async_trait]
impl Reranker for StubReranker {
    async fn rerank(&self, _question: &str, candidates: &[ScoredChunk]) -> Result<Vec<ScoredChunk>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("stub rerank outage");
        }
        Ok(candidates.iter().rev().cloned().collect())
    }
}

fn test_config() -> Config {
    let toml = r#"
[server]
bind = "127.0.0.1:0"

[db]
path = ":memory:"

[chunking]
window_chars = 120
overlap_chars = 30

[retrieval]
top_k = 3

[embedding]
url = "http://unused.invalid/v1/embeddings"
model = "stub-embed"
dims = 8

[completion]
url = "http://unused.invalid/v1/chat/completions"

[rerank]
policy = "never"

[pipeline]
max_concurrent_questions = 8
"#;
    toml::from_str(toml).unwrap()
}

struct Harness {
    pipeline: Arc<Pipeline>,
    completer: Arc<StubCompleter>,
}

fn build_harness(config: Config, completer: StubCompleter, reranker: Option<StubReranker>) -> Harness {
    let config = Arc::new(config);
    let completer = Arc::new(completer);
    let pipeline = Pipeline::new(
        config.clone(),
        Arc::new(StubEmbedder),
        completer.clone(),
        reranker.map(|r| Arc::new(r) as Arc<dyn Reranker>),
        None,
        Arc::new(AnswerCache::new(config.cache.max_entries)),
        Arc::new(Metrics::new()),
    )
    .unwrap();

    Harness {
        pipeline: Arc::new(pipeline),
        completer,
    }
}

fn policy_doc() -> DocumentSource {
    DocumentSource::Inline {
        name: "policy.txt".to_string(),
        bytes: b"The grace period for premium payment is thirty days. \
                 There is a waiting period of thirty-six months for Pre-Existing Diseases. \
                 Cataract surgery carries a specific waiting period of two years. \
                 The No Claim Discount offered is five percent on renewal."
            .to_vec(),
    }
}

fn request(documents: Vec<DocumentSource>, questions: &[&str]) -> QueryRequest {
    QueryRequest {
        documents,
        questions: questions.iter().map(|q| q.to_string()).collect(),
        model: ModelProvider::Qwen,
        temperature: 0.2,
    }
}

#[tokio::test]
async fn answers_align_with_questions() {
    let harness = build_harness(
        test_config(),
        StubCompleter::new("The waiting period is thirty-six months."),
        None,
    );

    let questions = [
        "What is the waiting period for Pre-Existing Diseases?",
        "What is the grace period?",
        "What is the No Claim Discount?",
    ];
    let outcome = harness
        .pipeline
        .clone()
        .run(request(vec![policy_doc()], &questions))
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), questions.len());
    for result in &outcome.results {
        let answer = result.as_answer().expect("every question answered");
        assert_eq!(answer.text, "The waiting period is thirty-six months.");
        assert!(!answer.citations.is_empty(), "grounded answers cite chunks");
    }
}

#[tokio::test]
async fn repeat_request_hits_cache() {
    let harness = build_harness(
        test_config(),
        StubCompleter::new("Thirty days of grace are provided."),
        None,
    );

    let questions = ["What is the grace period for premium payment?"];

    let first = harness
        .pipeline
        .clone()
        .run(request(vec![policy_doc()], &questions))
        .await
        .unwrap();
    let first_answer = first.results[0].as_answer().unwrap();
    assert!(!first_answer.cached);
    assert_eq!(harness.completer.call_count(), 1);

    let second = harness
        .pipeline
        .clone()
        .run(request(vec![policy_doc()], &questions))
        .await
        .unwrap();
    let second_answer = second.results[0].as_answer().unwrap();
    assert!(second_answer.cached, "identical repeat must be a cache hit");
    assert_eq!(second_answer.text, first_answer.text);
    assert_eq!(
        harness.completer.call_count(),
        1,
        "cache hit must not invoke the model again"
    );
}

#[tokio::test]
async fn cache_key_ignores_document_order_and_question_case() {
    let harness = build_harness(test_config(), StubCompleter::new("Yes."), None);

    let doc_a = DocumentSource::Inline {
        name: "a.txt".to_string(),
        bytes: b"Alpha document body with enough text to chunk.".to_vec(),
    };
    let doc_b = DocumentSource::Inline {
        name: "b.txt".to_string(),
        bytes: b"Beta document body with enough text to chunk.".to_vec(),
    };

    harness
        .pipeline
        .clone()
        .run(request(
            vec![doc_a.clone(), doc_b.clone()],
            &["Is maternity covered?"],
        ))
        .await
        .unwrap();
    assert_eq!(harness.completer.call_count(), 1);

    let outcome = harness
        .pipeline
        .clone()
        .run(request(vec![doc_b, doc_a], &["  is maternity COVERED? "]))
        .await
        .unwrap();
    assert!(outcome.results[0].as_answer().unwrap().cached);
    assert_eq!(harness.completer.call_count(), 1);
}

#[tokio::test]
async fn concurrent_identical_requests_generate_once() {
    let harness = build_harness(
        test_config(),
        StubCompleter::new("Exactly one generation."),
        None,
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pipeline = harness.pipeline.clone();
        handles.push(tokio::spawn(async move {
            pipeline
                .run(request(
                    vec![policy_doc()],
                    &["What is the cataract waiting period?"],
                ))
                .await
                .unwrap()
        }));
    }

    for handle in handles {
        let outcome = handle.await.unwrap();
        let answer = outcome.results[0].as_answer().unwrap();
        assert_eq!(answer.text, "Exactly one generation.");
    }

    assert_eq!(
        harness.completer.call_count(),
        1,
        "N concurrent requests sharing a fingerprint must trigger exactly one generation"
    );
}

#[tokio::test]
async fn no_documents_and_no_knowledge_base_signals_missing_context() {
    let harness = build_harness(
        test_config(),
        StubCompleter::new("The information is not available in the provided documents."),
        None,
    );

    let outcome = harness
        .pipeline
        .clone()
        .run(request(vec![], &["What is the waiting period?"]))
        .await
        .unwrap();

    let answer = outcome.results[0].as_answer().unwrap();
    assert!(answer.citations.is_empty());

    let prompt = harness.completer.last_prompt().unwrap();
    assert!(
        prompt.user.contains(NO_CONTEXT_MARKER),
        "empty retrieval must flag missing context to the model"
    );
}

#[tokio::test]
async fn partial_ingestion_continues_with_warnings() {
    let harness = build_harness(test_config(), StubCompleter::new("Answered."), None);

    let documents = vec![
        policy_doc(),
        DocumentSource::Inline {
            name: "second.txt".to_string(),
            bytes: b"Another perfectly readable document.".to_vec(),
        },
        DocumentSource::Path("/nonexistent/missing.pdf".into()),
    ];

    let outcome = harness
        .pipeline
        .clone()
        .run(request(documents, &["What is covered?"]))
        .await
        .unwrap();

    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("/nonexistent/missing.pdf"));

    let answer = outcome.results[0].as_answer().unwrap();
    assert_eq!(answer.text, "Answered.");
    assert_eq!(answer.warnings.len(), 1, "answers carry the ingest warning");
}

#[tokio::test]
async fn all_documents_failing_fails_the_run() {
    let harness = build_harness(test_config(), StubCompleter::new("unused"), None);

    let documents = vec![
        DocumentSource::Path("/nonexistent/one.pdf".into()),
        DocumentSource::Path("/nonexistent/two.pdf".into()),
    ];

    let err = harness
        .pipeline
        .clone()
        .run(request(documents, &["What is covered?"]))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::FetchFailure(_)));
    assert_eq!(harness.completer.call_count(), 0);
}

#[tokio::test]
async fn unsupported_format_for_sole_document_fails_the_run() {
    let harness = build_harness(test_config(), StubCompleter::new("unused"), None);

    let documents = vec![DocumentSource::Inline {
        name: "blob.bin".to_string(),
        bytes: vec![1, 2, 3],
    }];

    let err = harness
        .pipeline
        .clone()
        .run(request(documents, &["What is covered?"]))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::UnsupportedFormat(_)));
}

#[tokio::test]
async fn completion_failure_fails_only_that_question() {
    // fail_first=1: the first generation fails outright (the stub does not
    // model retryable transport errors, so the client-side budget is spent),
    // subsequent ones succeed.
    let harness = build_harness(
        test_config(),
        StubCompleter::failing("Recovered answer.", 1),
        None,
    );

    let questions = ["First question about the grace period?", "Second question about cataract?"];
    // max_concurrent_questions = 8, so both run; one of them absorbs the
    // stubbed failure.
    let outcome = harness
        .pipeline
        .clone()
        .run(request(vec![policy_doc()], &questions))
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 2);
    let failed = outcome
        .results
        .iter()
        .filter(|r| matches!(r, QuestionResult::Failed(_)))
        .count();
    let answered = outcome
        .results
        .iter()
        .filter(|r| r.as_answer().is_some())
        .count();
    assert_eq!(failed, 1);
    assert_eq!(answered, 1);
}

#[tokio::test]
async fn reranker_reorders_when_policy_always() {
    let mut config = test_config();
    config.rerank.policy = "always".to_string();

    let harness = build_harness(
        config,
        StubCompleter::new("Reranked answer."),
        Some(StubReranker {
            fail: false,
            calls: AtomicU64::new(0),
        }),
    );

    let outcome = harness
        .pipeline
        .clone()
        .run(request(
            vec![policy_doc()],
            &["Compare the waiting periods in this policy."],
        ))
        .await
        .unwrap();

    let answer = outcome.results[0].as_answer().unwrap();
    assert!(!answer.citations.is_empty());
}

#[tokio::test]
async fn reranker_failure_degrades_to_retrieval_order() {
    let mut config = test_config();
    config.rerank.policy = "always".to_string();

    let harness = build_harness(
        config,
        StubCompleter::new("Still answered."),
        Some(StubReranker {
            fail: true,
            calls: AtomicU64::new(0),
        }),
    );

    let outcome = harness
        .pipeline
        .clone()
        .run(request(vec![policy_doc()], &["What is the grace period?"]))
        .await
        .unwrap();

    let answer = outcome.results[0].as_answer().unwrap();
    assert_eq!(answer.text, "Still answered.");
    assert!(
        !answer.citations.is_empty(),
        "rerank failure must not lose the retrieved context"
    );
}

#[tokio::test]
async fn failed_generation_is_not_cached() {
    let harness = build_harness(
        test_config(),
        StubCompleter::failing("Recovered answer.", 1),
        None,
    );

    let questions = ["What is the grace period?"];

    let first = harness
        .pipeline
        .clone()
        .run(request(vec![policy_doc()], &questions))
        .await
        .unwrap();
    assert!(matches!(first.results[0], QuestionResult::Failed(_)));

    // The failure must not have populated the cache: the retry computes
    // fresh and succeeds.
    let second = harness
        .pipeline
        .clone()
        .run(request(vec![policy_doc()], &questions))
        .await
        .unwrap();
    let answer = second.results[0].as_answer().unwrap();
    assert_eq!(answer.text, "Recovered answer.");
    assert!(!answer.cached);
}

#[tokio::test]
async fn metrics_reflect_cache_outcomes() {
    let harness = build_harness(test_config(), StubCompleter::new("Answer."), None);
    let metrics = harness.pipeline.metrics();

    let questions = ["What is the grace period?"];
    harness
        .pipeline
        .clone()
        .run(request(vec![policy_doc()], &questions))
        .await
        .unwrap();
    harness
        .pipeline
        .clone()
        .run(request(vec![policy_doc()], &questions))
        .await
        .unwrap();

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.total_requests, 2);
    assert_eq!(snapshot.total_questions, 2);
    assert_eq!(snapshot.cache_hits, 1);
    assert_eq!(snapshot.generation_calls, 1);
    assert!((snapshot.cache_hit_rate - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn retrieval_finds_relevant_chunk() {
    let harness = build_harness(test_config(), StubCompleter::new("Grounded."), None);

    let outcome = harness
        .pipeline
        .clone()
        .run(request(
            vec![policy_doc()],
            &["waiting period Pre-Existing Diseases"],
        ))
        .await
        .unwrap();

    let prompt = harness.completer.last_prompt().unwrap();
    assert!(
        prompt.user.contains("Pre-Existing"),
        "retrieved context should mention the queried phrase"
    );
    let answer = outcome.results[0].as_answer().unwrap();
    assert!(answer.citations.len() <= 3, "top_k bounds citations");
}
