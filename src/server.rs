//! JSON HTTP API for the answering pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/v1/run` | Answer questions over a document set (bearer auth) |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/metrics` | Aggregate counters from the metrics sink |
//!
//! # Request
//!
//! ```json
//! {
//!   "documents": ["https://host/policy.pdf", {"name": "notes.txt", "content_base64": "..."}],
//!   "questions": ["What is the waiting period for Pre-Existing Diseases?"],
//!   "model": "qwen",
//!   "temperature": 0.2
//! }
//! ```
//!
//! `documents` also accepts a single URL string, may be omitted entirely
//! (retrieval then runs against the persistent knowledge base), and the
//! `answers` array in the response is index-aligned with `questions`.
//!
//! # Error Contract
//!
//! All error responses carry one JSON shape:
//!
//! ```json
//! { "error": { "code": "auth_failure", "message": "invalid or missing API key" } }
//! ```
//!
//! The bearer token is checked before any pipeline work; an invalid token
//! never triggers ingestion.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::completion::ModelProvider;
use crate::config::Config;
use crate::error::PipelineError;
use crate::models::{Answer, DocumentSource, QueryRequest, QuestionResult};
use crate::pipeline::Pipeline;

/// Shared application state passed to route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
    pool: SqlitePool,
    /// Expected bearer token; `None` disables the check (local development).
    auth_token: Option<String>,
}

/// Starts the HTTP server and runs until the process terminates.
pub async fn run_server(
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
    pool: SqlitePool,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let auth_token = std::env::var(&config.server.auth_token_env).ok();
    if auth_token.is_none() {
        tracing::warn!(
            env = %config.server.auth_token_env,
            "auth token not set; API is unauthenticated"
        );
    }

    let state = AppState {
        config,
        pipeline,
        pool,
        auth_token,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/v1/run", post(handle_run))
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .layer(cors)
        .with_state(state);

    info!(bind = %bind_addr, "askdoc server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error envelope.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn auth_failure() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: PipelineError::AuthFailure.code().to_string(),
        message: PipelineError::AuthFailure.to_string(),
    }
}

/// Map a pipeline failure onto an HTTP status. Configuration errors are the
/// caller's to fix (400-class); upstream failures surface as 502.
fn pipeline_error(err: PipelineError) -> AppError {
    let status = match &err {
        PipelineError::UnsupportedFormat(_) | PipelineError::FetchFailure(_) => {
            StatusCode::BAD_REQUEST
        }
        PipelineError::DimensionMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        PipelineError::CompletionFailure(_) => StatusCode::BAD_GATEWAY,
        PipelineError::AuthFailure => StatusCode::UNAUTHORIZED,
    };
    AppError {
        status,
        code: err.code().to_string(),
        message: err.to_string(),
    }
}

/// Verify the bearer token before any pipeline work.
fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = &state.auth_token else {
        return Ok(());
    };

    let supplied = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match supplied {
        Some(token) if token == expected => Ok(()),
        _ => Err(auth_failure()),
    }
}

// ============ POST /api/v1/run ============

/// `documents` accepts a single URL string or a list of URLs / inline files.
#[derive(Deserialize)]
#[serde(untagged)]
enum DocumentsField {
    One(String),
    Many(Vec<DocumentInput>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DocumentInput {
    Url(String),
    Inline { name: String, content_base64: String },
}

#[derive(Deserialize)]
struct RunRequest {
    #[serde(default)]
    documents: Option<DocumentsField>,
    questions: Vec<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
}

/// Per-question detail accompanying the plain `answers` array.
#[derive(Serialize)]
struct QuestionDetail {
    question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<Answer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorDetail>,
}

#[derive(Serialize)]
struct RunResponse {
    /// Index-aligned with the submitted questions. A failed question carries
    /// an explicit error marker, never a fabricated answer.
    answers: Vec<String>,
    results: Vec<QuestionDetail>,
    warnings: Vec<String>,
}

async fn handle_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RunRequest>,
) -> Result<Json<RunResponse>, AppError> {
    check_auth(&state, &headers)?;

    if request.questions.is_empty() {
        return Err(bad_request("questions must not be empty"));
    }
    if request.questions.iter().any(|q| q.trim().is_empty()) {
        return Err(bad_request("questions must not contain blank entries"));
    }

    let temperature = request.temperature.unwrap_or(0.2);
    if !(0.0..=1.0).contains(&temperature) {
        return Err(bad_request("temperature must be in [0.0, 1.0]"));
    }

    let model_name = request
        .model
        .as_deref()
        .unwrap_or(&state.config.completion.model);
    let model = ModelProvider::parse(model_name)
        .ok_or_else(|| bad_request(format!("unknown model: {}", model_name)))?;

    let documents = parse_documents(request.documents)?;

    let query = QueryRequest {
        documents,
        questions: request.questions.clone(),
        model,
        temperature,
    };

    let outcome = state
        .pipeline
        .clone()
        .run(query)
        .await
        .map_err(pipeline_error)?;

    let mut answers = Vec::with_capacity(outcome.results.len());
    let mut results = Vec::with_capacity(outcome.results.len());

    for (question, result) in request.questions.iter().zip(outcome.results.into_iter()) {
        crate::audit::log_question_detached(
            state.pool.clone(),
            question.clone(),
            result.clone(),
            model.model_id().to_string(),
        );

        match result {
            QuestionResult::Answered(answer) => {
                answers.push(answer.text.clone());
                results.push(QuestionDetail {
                    question: question.clone(),
                    answer: Some(answer),
                    error: None,
                });
            }
            QuestionResult::Failed(e) => {
                answers.push(format!("Error: {}", e));
                results.push(QuestionDetail {
                    question: question.clone(),
                    answer: None,
                    error: Some(ErrorDetail {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    }),
                });
            }
        }
    }

    Ok(Json(RunResponse {
        answers,
        results,
        warnings: outcome.warnings,
    }))
}

fn parse_documents(field: Option<DocumentsField>) -> Result<Vec<DocumentSource>, AppError> {
    let inputs = match field {
        None => return Ok(Vec::new()),
        Some(DocumentsField::One(url)) => vec![DocumentInput::Url(url)],
        Some(DocumentsField::Many(list)) => list,
    };

    let mut sources = Vec::with_capacity(inputs.len());
    for input in inputs {
        match input {
            DocumentInput::Url(url) => {
                if url.trim().is_empty() {
                    return Err(bad_request("document URL must not be empty"));
                }
                sources.push(DocumentSource::Url(url));
            }
            DocumentInput::Inline {
                name,
                content_base64,
            } => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(content_base64.as_bytes())
                    .map_err(|e| bad_request(format!("invalid base64 for '{}': {}", name, e)))?;
                sources.push(DocumentSource::Inline { name, bytes });
            }
        }
    }
    Ok(sources)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /metrics ============

async fn handle_metrics(State(state): State<AppState>) -> Json<crate::metrics::MetricsSnapshot> {
    Json(state.pipeline.metrics().snapshot())
}
