//! Pipeline error taxonomy.
//!
//! One variant per failure class the orchestrator distinguishes. Document-level
//! failures (`UnsupportedFormat`, `FetchFailure`) are recovered per document;
//! `DimensionMismatch` is a configuration error and aborts the affected index
//! build; completion errors are retried before surfacing.

/// Errors produced by the answering pipeline and its collaborators.
#[derive(Debug, Clone)]
pub enum PipelineError {
    /// Document format could not be determined or is not supported.
    UnsupportedFormat(String),
    /// Document could not be fetched or read (unreachable URL, missing file,
    /// corrupted content).
    FetchFailure(String),
    /// Vector dimensionality disagrees with the store's established dimension.
    DimensionMismatch { expected: usize, got: usize },
    /// The completion capability failed after exhausting retries.
    CompletionFailure(String),
    /// The upstream provider throttled the request and retries ran out.
    RateLimited(String),
    /// Bearer token missing or invalid. Raised before any pipeline work.
    AuthFailure,
}

impl PipelineError {
    /// Machine-readable code used in HTTP error bodies and audit rows.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::UnsupportedFormat(_) => "unsupported_format",
            PipelineError::FetchFailure(_) => "fetch_failure",
            PipelineError::DimensionMismatch { .. } => "dimension_mismatch",
            PipelineError::CompletionFailure(_) => "completion_failure",
            PipelineError::RateLimited(_) => "rate_limited",
            PipelineError::AuthFailure => "auth_failure",
        }
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::UnsupportedFormat(detail) => {
                write!(f, "unsupported document format: {}", detail)
            }
            PipelineError::FetchFailure(detail) => {
                write!(f, "failed to fetch document: {}", detail)
            }
            PipelineError::DimensionMismatch { expected, got } => {
                write!(
                    f,
                    "embedding dimension mismatch: store holds {}-dim vectors, got {}",
                    expected, got
                )
            }
            PipelineError::CompletionFailure(detail) => {
                write!(f, "completion failed: {}", detail)
            }
            PipelineError::RateLimited(detail) => write!(f, "rate limited: {}", detail),
            PipelineError::AuthFailure => write!(f, "invalid or missing API key"),
        }
    }
}

impl std::error::Error for PipelineError {}
