//! RAG pipeline orchestration.
//!
//! One [`Pipeline`] instance composes the collaborators — loader, chunker,
//! embedding client, vector stores, reranker, completion client, cache,
//! metrics — and drives each request through
//! ingest → index → retrieve → (rerank) → generate → cache.
//!
//! A multi-question request ingests and indexes its document set once, then
//! runs the per-question pipelines concurrently under a semaphore bound.
//! The cache is consulted first: a request whose every question is already
//! fingerprinted skips ingestion entirely.
//!
//! Failure policy: a document that cannot be fetched or parsed is skipped
//! and noted as a warning on every answer, but if every supplied document
//! fails the run fails. `DimensionMismatch` aborts the index build without
//! retry. Completion errors are retried inside the client; once the budget
//! is exhausted the affected question fails without touching its siblings.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::cache::{fingerprint, AnswerCache};
use crate::completion::CompletionClient;
use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::error::PipelineError;
use crate::loader;
use crate::metrics::Metrics;
use crate::models::{
    Answer, Chunk, Citation, DocumentSource, QueryRequest, QuestionResult, RunOutcome, ScoredChunk,
};
use crate::prompt;
use crate::rerank::{Reranker, RerankPolicy};
use crate::store::{ephemeral::EphemeralStore, IndexEntry, StoreRouting, VectorStore};

/// Characters of chunk text carried into a citation snippet.
const SNIPPET_CHARS: usize = 160;

pub struct Pipeline {
    config: Arc<Config>,
    embedder: Arc<dyn EmbeddingClient>,
    completer: Arc<dyn CompletionClient>,
    reranker: Option<Arc<dyn Reranker>>,
    persistent: Option<Arc<dyn VectorStore>>,
    cache: Arc<AnswerCache>,
    metrics: Arc<Metrics>,
    fetch_client: reqwest::Client,
    rerank_policy: RerankPolicy,
    routing: StoreRouting,
}

impl Pipeline {
    /// Wire a pipeline from explicit collaborators. This is the seam tests
    /// use to substitute stub capabilities.
    pub fn new(
        config: Arc<Config>,
        embedder: Arc<dyn EmbeddingClient>,
        completer: Arc<dyn CompletionClient>,
        reranker: Option<Arc<dyn Reranker>>,
        persistent: Option<Arc<dyn VectorStore>>,
        cache: Arc<AnswerCache>,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        let rerank_policy = RerankPolicy::from_config(&config.rerank);
        let routing = StoreRouting::parse(&config.pipeline.routing)
            .ok_or_else(|| anyhow::anyhow!("invalid routing: {}", config.pipeline.routing))?;

        Ok(Self {
            fetch_client: reqwest::Client::new(),
            config,
            embedder,
            completer,
            reranker,
            persistent,
            cache,
            metrics,
            rerank_policy,
            routing,
        })
    }

    /// Build the production pipeline: HTTP clients for every capability,
    /// remote persistent store when configured.
    pub fn from_config(config: Arc<Config>) -> anyhow::Result<Self> {
        let embedder: Arc<dyn EmbeddingClient> = Arc::new(
            crate::embedding::HttpEmbeddingClient::new(&config.embedding)?,
        );
        let completer: Arc<dyn CompletionClient> = Arc::new(
            crate::completion::HttpCompletionClient::new(&config.completion)?,
        );
        let reranker: Option<Arc<dyn Reranker>> =
            crate::rerank::HttpReranker::new(&config.rerank)?
                .map(|r| Arc::new(r) as Arc<dyn Reranker>);
        let persistent: Option<Arc<dyn VectorStore>> =
            crate::store::remote::RemoteStore::new(&config.store, config.embedding.dims)?
                .map(|s| Arc::new(s) as Arc<dyn VectorStore>);

        let cache = Arc::new(AnswerCache::new(config.cache.max_entries));
        let metrics = Arc::new(Metrics::new());

        Self::new(
            config, embedder, completer, reranker, persistent, cache, metrics,
        )
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn cache(&self) -> Arc<AnswerCache> {
        self.cache.clone()
    }

    /// Answer every question in the request. The returned results are
    /// index-aligned with `req.questions`.
    ///
    /// Takes the pipeline by `Arc` so per-question tasks can hold it across
    /// spawn boundaries; callers keep their own clone.
    pub async fn run(self: Arc<Self>, req: QueryRequest) -> Result<RunOutcome, PipelineError> {
        self.metrics.record_request();

        let temperature = req.temperature.clamp(0.0, 1.0);
        let model_id = req.model.model_id();

        let doc_ids: Vec<String> = req.documents.iter().map(|d| d.id()).collect();
        let fingerprints: Vec<String> = req
            .questions
            .iter()
            .map(|q| fingerprint(&doc_ids, q, model_id, temperature))
            .collect();

        // Ingestion and indexing are skipped when every question is already
        // cached, and amortized once otherwise.
        let mut all_cached = true;
        for fp in &fingerprints {
            if self.cache.peek(fp).await.is_none() {
                all_cached = false;
                break;
            }
        }

        let (store, warnings) = if all_cached {
            info!(questions = req.questions.len(), "all questions cached; skipping ingestion");
            (None, Vec::new())
        } else {
            self.build_context_store(&req.documents).await?
        };

        let semaphore = Arc::new(Semaphore::new(self.config.pipeline.max_concurrent_questions));
        let mut handles = Vec::with_capacity(req.questions.len());

        for (question, fp) in req.questions.iter().zip(fingerprints.iter()) {
            let pipeline = Arc::clone(&self);
            let semaphore = semaphore.clone();
            let store = store.clone();
            let warnings = warnings.clone();
            let question = question.clone();
            let fp = fp.clone();
            let model = req.model;

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return QuestionResult::Failed(PipelineError::CompletionFailure(
                            "pipeline shutting down".into(),
                        ))
                    }
                };

                let started = Instant::now();
                let computed = pipeline
                    .cache
                    .get_or_compute(&fp, || {
                        pipeline.answer_question(
                            question.clone(),
                            store.clone(),
                            model,
                            temperature,
                            warnings.clone(),
                        )
                    })
                    .await;

                match computed {
                    Ok((mut answer, cache_hit)) => {
                        if cache_hit {
                            answer.cached = true;
                            answer.latency_ms = started.elapsed().as_millis() as u64;
                        }
                        pipeline
                            .metrics
                            .record_question(answer.latency_ms, cache_hit);
                        QuestionResult::Answered(answer)
                    }
                    Err(e) => {
                        pipeline.metrics.record_failure();
                        warn!(error = %e, "question pipeline failed");
                        QuestionResult::Failed(e)
                    }
                }
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = handle.await.map_err(|e| {
                PipelineError::CompletionFailure(format!("question task panicked: {}", e))
            })?;
            results.push(result);
        }

        Ok(RunOutcome { results, warnings })
    }

    /// Ingest the request's documents and pick the store retrieval runs
    /// against. Returns the store (None when nothing is indexable and no
    /// persistent base is configured) plus per-document warnings.
    async fn build_context_store(
        &self,
        documents: &[DocumentSource],
    ) -> Result<(Option<Arc<dyn VectorStore>>, Vec<String>), PipelineError> {
        let routing = self.routing.resolve(!documents.is_empty());

        match routing {
            StoreRouting::Persistent => {
                if self.persistent.is_none() {
                    warn!("no persistent store configured; answering from empty context");
                }
                Ok((self.persistent.clone(), Vec::new()))
            }
            StoreRouting::Ephemeral | StoreRouting::Auto => {
                if documents.is_empty() {
                    return Ok((None, Vec::new()));
                }

                let (chunks, warnings) = self.ingest(documents).await?;
                if chunks.is_empty() {
                    // Documents ingested but held no text; retrieval will be
                    // empty and the answer says so.
                    return Ok((None, warnings));
                }

                let store = Arc::new(EphemeralStore::new());
                self.index_chunks(store.as_ref(), &chunks).await?;
                Ok((Some(store as Arc<dyn VectorStore>), warnings))
            }
        }
    }

    /// Load and chunk every document. Individual failures become warnings;
    /// if every supplied document fails, the first error is returned and the
    /// run fails.
    async fn ingest(
        &self,
        documents: &[DocumentSource],
    ) -> Result<(Vec<Chunk>, Vec<String>), PipelineError> {
        let fetch_timeout = Duration::from_secs(self.config.pipeline.fetch_timeout_secs);
        let mut chunks = Vec::new();
        let mut warnings = Vec::new();
        let mut first_error = None;
        let mut succeeded = 0usize;

        for source in documents {
            match loader::load(&self.fetch_client, source, fetch_timeout).await {
                Ok(blocks) => {
                    succeeded += 1;
                    let doc_chunks = crate::chunk::chunk_blocks(
                        &source.id(),
                        &blocks,
                        self.config.chunking.window_chars,
                        self.config.chunking.overlap_chars,
                    );
                    info!(
                        source = %source.id(),
                        blocks = blocks.len(),
                        chunks = doc_chunks.len(),
                        "ingested document"
                    );
                    chunks.extend(doc_chunks);
                }
                Err(e) => {
                    warn!(source = %source.id(), error = %e, "skipping document");
                    warnings.push(format!("document '{}' skipped: {}", source.id(), e));
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if succeeded == 0 {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        Ok((chunks, warnings))
    }

    /// Embed chunks in batches and insert them into the store.
    async fn index_chunks(
        &self,
        store: &dyn VectorStore,
        chunks: &[Chunk],
    ) -> Result<(), PipelineError> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| PipelineError::CompletionFailure(format!("embedding: {}", e)))?;

        if vectors.len() != chunks.len() {
            return Err(PipelineError::CompletionFailure(format!(
                "embedding returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let entries: Vec<IndexEntry> = chunks
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { chunk, vector })
            .collect();

        store.insert(entries).await
    }

    /// One question's pipeline instance: retrieve, optionally rerank,
    /// assemble the grounded prompt, generate, clean.
    async fn answer_question(
        &self,
        question: String,
        store: Option<Arc<dyn VectorStore>>,
        model: crate::completion::ModelProvider,
        temperature: f32,
        warnings: Vec<String>,
    ) -> Result<Answer, PipelineError> {
        let started = Instant::now();

        let retrieved = match &store {
            Some(store) => {
                let query_vec = self
                    .embedder
                    .embed(std::slice::from_ref(&question))
                    .await
                    .map_err(|e| {
                        PipelineError::CompletionFailure(format!("query embedding: {}", e))
                    })?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        PipelineError::CompletionFailure("empty query embedding".into())
                    })?;

                store.query(&query_vec, self.config.retrieval.top_k).await?
            }
            // No indexable content and no standing knowledge base: proceed
            // with the no-context marker rather than failing.
            None => Vec::new(),
        };

        let context = self.maybe_rerank(&question, retrieved).await;

        let prompt = prompt::build_prompt(&question, &context);

        self.metrics.record_generation_call();
        let raw = self.completer.complete(&prompt, temperature, model).await?;
        let text = prompt::clean_answer(&raw);

        if text.is_empty() {
            // An empty completion is a failure, not an answer.
            return Err(PipelineError::CompletionFailure(
                "model returned an empty answer".into(),
            ));
        }

        let citations = context
            .iter()
            .map(|scored| Citation {
                source_id: scored.chunk.source_id.clone(),
                page: scored.chunk.page,
                snippet: scored.chunk.text.chars().take(SNIPPET_CHARS).collect(),
                score: scored.score,
            })
            .collect();

        Ok(Answer {
            text,
            citations,
            latency_ms: started.elapsed().as_millis() as u64,
            cached: false,
            warnings,
        })
    }

    /// Apply the reranker when the policy asks for it; any failure degrades
    /// to the retrieval ordering.
    async fn maybe_rerank(&self, question: &str, retrieved: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
        if retrieved.is_empty() || !self.rerank_policy.should_rerank(question) {
            return retrieved;
        }
        let Some(reranker) = &self.reranker else {
            return retrieved;
        };

        match reranker.rerank(question, &retrieved).await {
            Ok(reordered) if !reordered.is_empty() => reordered,
            Ok(_) => retrieved,
            Err(e) => {
                warn!(error = %e, "rerank failed; keeping retrieval order");
                retrieved
            }
        }
    }

    /// Ingest documents into the persistent namespace (the `index` command).
    /// Returns (documents indexed, chunks written).
    pub async fn index_into_persistent(
        &self,
        documents: &[DocumentSource],
    ) -> Result<(usize, usize), PipelineError> {
        let store = self.persistent.as_ref().ok_or_else(|| {
            PipelineError::FetchFailure("no persistent vector store configured".into())
        })?;

        let (chunks, warnings) = self.ingest(documents).await?;
        for warning in &warnings {
            warn!("{}", warning);
        }

        let chunk_count = chunks.len();
        if chunk_count > 0 {
            self.index_chunks(store.as_ref(), &chunks).await?;
        }

        Ok((documents.len() - warnings.len(), chunk_count))
    }
}
