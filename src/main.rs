//! # askdoc CLI
//!
//! The `askdoc` binary drives the retrieval-augmented answering service:
//! database initialization, knowledge-base indexing, one-shot questions,
//! the HTTP server, and audit statistics.
//!
//! ## Usage
//!
//! ```bash
//! askdoc --config ./config/askdoc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askdoc init` | Create the SQLite audit database |
//! | `askdoc index <doc>...` | Ingest documents into the persistent knowledge base |
//! | `askdoc ask "<question>"` | Answer one question (optionally over `--doc` inputs) |
//! | `askdoc serve` | Start the JSON HTTP server |
//! | `askdoc stats` | Show audit aggregates (requests, cache hits, latency) |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the audit database
//! askdoc init --config ./config/askdoc.toml
//!
//! # Index standing documents into the persistent namespace
//! askdoc index ./pdfs/policy.pdf https://host/terms.pdf
//!
//! # One-shot question over an uploaded document
//! askdoc ask "What is the waiting period for cataract surgery?" --doc ./pdfs/policy.pdf
//!
//! # Question against the standing knowledge base
//! askdoc ask "How does the policy define a hospital?"
//!
//! # Start the API server
//! askdoc serve
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use askdoc::completion::ModelProvider;
use askdoc::models::{DocumentSource, QueryRequest, QuestionResult};
use askdoc::pipeline::Pipeline;
use askdoc::{audit, config, db, server};

/// askdoc — a retrieval-augmented question answering service for documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/askdoc.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "askdoc",
    about = "askdoc — retrieval-augmented question answering over documents",
    version,
    long_about = "askdoc ingests documents (PDF, DOCX, PPTX, XLSX, TXT) or URLs, chunks and \
    embeds them into a vector index, retrieves the most relevant passages per question, and \
    generates grounded answers with a hosted chat model. Repeated document+question \
    combinations are served from a fingerprint cache."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/askdoc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the audit database schema.
    ///
    /// Creates the SQLite file and the `requests` table. Idempotent —
    /// running it multiple times is safe.
    Init,

    /// Ingest documents into the persistent knowledge base.
    ///
    /// Loads each path or URL, chunks and embeds the text, and upserts the
    /// vectors under the configured namespace. Requires `[store].url`.
    Index {
        /// Document paths and/or URLs.
        inputs: Vec<String>,
    },

    /// Answer a single question.
    ///
    /// With `--doc` inputs, builds a request-scoped index over those
    /// documents; without, queries the persistent knowledge base.
    Ask {
        /// The question to answer.
        question: String,

        /// Document path or URL to ground the answer in (repeatable).
        #[arg(long = "doc")]
        documents: Vec<String>,

        /// Model: qwen, mistral, llama, nemotron, gemma, or a full model id.
        #[arg(long)]
        model: Option<String>,

        /// Sampling temperature in [0.0, 1.0].
        #[arg(long, default_value_t = 0.2)]
        temperature: f32,
    },

    /// Start the JSON HTTP server.
    ///
    /// Binds to `[server].bind` and serves `/api/v1/run`, `/health`, and
    /// `/metrics` until the process is terminated.
    Serve,

    /// Show audit statistics.
    ///
    /// Prints totals, cache hit rate, average latency, and a per-model
    /// breakdown from the audit database.
    Stats,
}

/// Classify a CLI input as a URL or a local path.
fn parse_input(input: &str) -> DocumentSource {
    if input.starts_with("http://") || input.starts_with("https://") {
        DocumentSource::Url(input.to_string())
    } else {
        DocumentSource::Path(PathBuf::from(input))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let cfg = Arc::new(config::load_config(&cli.config)?);

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            db::init_schema(&pool).await?;
            pool.close().await;
            println!("Audit database initialized successfully.");
        }

        Commands::Index { inputs } => {
            if inputs.is_empty() {
                anyhow::bail!("index requires at least one document path or URL");
            }
            let pipeline = Arc::new(Pipeline::from_config(cfg)?);
            let documents: Vec<DocumentSource> =
                inputs.iter().map(|i| parse_input(i)).collect();

            let (docs, chunks) = pipeline.index_into_persistent(&documents).await?;
            println!("index");
            println!("  documents indexed: {}", docs);
            println!("  chunks written: {}", chunks);
            println!("ok");
        }

        Commands::Ask {
            question,
            documents,
            model,
            temperature,
        } => {
            if !(0.0..=1.0).contains(&temperature) {
                anyhow::bail!("temperature must be in [0.0, 1.0]");
            }
            let model_name = model.as_deref().unwrap_or(&cfg.completion.model);
            let model = ModelProvider::parse(model_name)
                .ok_or_else(|| anyhow::anyhow!("unknown model: {}", model_name))?;

            let pool = db::connect(&cfg).await?;
            db::init_schema(&pool).await?;

            let pipeline = Arc::new(Pipeline::from_config(cfg)?);
            let request = QueryRequest {
                documents: documents.iter().map(|i| parse_input(i)).collect(),
                questions: vec![question.clone()],
                model,
                temperature,
            };

            let outcome = pipeline.run(request).await?;
            for warning in &outcome.warnings {
                eprintln!("warning: {}", warning);
            }

            let result = outcome
                .results
                .into_iter()
                .next()
                .ok_or_else(|| anyhow::anyhow!("pipeline returned no result"))?;

            audit::log_question(&pool, &question, &result, model.model_id()).await?;
            pool.close().await;

            match result {
                QuestionResult::Answered(answer) => {
                    println!("{}", answer.text);
                    if !answer.citations.is_empty() {
                        println!();
                        println!("Sources:");
                        for citation in &answer.citations {
                            match citation.page {
                                Some(page) => {
                                    println!("  {} (p.{})", citation.source_id, page)
                                }
                                None => println!("  {}", citation.source_id),
                            }
                        }
                    }
                    println!();
                    println!(
                        "({} ms{})",
                        answer.latency_ms,
                        if answer.cached { ", cached" } else { "" }
                    );
                }
                QuestionResult::Failed(e) => {
                    anyhow::bail!("question failed: {}", e);
                }
            }
        }

        Commands::Serve => {
            let pool = db::connect(&cfg).await?;
            db::init_schema(&pool).await?;
            let pipeline = Arc::new(Pipeline::from_config(cfg.clone())?);
            server::run_server(cfg, pipeline, pool).await?;
        }

        Commands::Stats => {
            let pool = db::connect(&cfg).await?;
            db::init_schema(&pool).await?;
            let stats = audit::read_stats(&pool).await?;
            pool.close().await;

            println!("askdoc — Request Stats");
            println!("======================");
            println!();
            println!("  Questions:   {}", stats.total_questions);
            println!(
                "  Cache hits:  {} ({}%)",
                stats.cache_hits,
                if stats.total_questions > 0 {
                    stats.cache_hits * 100 / stats.total_questions
                } else {
                    0
                }
            );
            println!("  Failures:    {}", stats.failures);
            println!("  Avg latency: {:.0} ms", stats.avg_latency_ms);

            if !stats.by_model.is_empty() {
                println!();
                println!("  By model:");
                println!(
                    "  {:<44} {:>9} {:>6} {:>12}",
                    "MODEL", "QUESTIONS", "HITS", "AVG LATENCY"
                );
                println!("  {}", "-".repeat(76));
                for m in &stats.by_model {
                    println!(
                        "  {:<44} {:>9} {:>6} {:>9.0} ms",
                        m.model, m.question_count, m.cache_hits, m.avg_latency_ms
                    );
                }
            }
            println!();
        }
    }

    Ok(())
}
