//! Document loading: fetch bytes, detect the format, extract text blocks.
//!
//! URLs are fetched with a bounded timeout; inline uploads and local paths
//! are read directly. Unknown formats fail with `UnsupportedFormat`, network
//! and parse problems with `FetchFailure` — both recovered per document by
//! the orchestrator.

use std::time::Duration;

use tracing::debug;

use crate::error::PipelineError;
use crate::extract;
use crate::models::{DocumentFormat, DocumentSource, TextBlock};

/// Fetches and extracts one document into ordered text blocks.
pub async fn load(
    client: &reqwest::Client,
    source: &DocumentSource,
    fetch_timeout: Duration,
) -> Result<Vec<TextBlock>, PipelineError> {
    let (bytes, content_type) = fetch_bytes(client, source, fetch_timeout).await?;

    let format = detect_format(source, content_type.as_deref())?;

    debug!(source = %source.id(), ?format, bytes = bytes.len(), "extracting document");

    let blocks = extract::extract_blocks(&bytes, format)
        .map_err(|e| PipelineError::FetchFailure(format!("{}: {}", source.id(), e)))?;

    Ok(blocks)
}

async fn fetch_bytes(
    client: &reqwest::Client,
    source: &DocumentSource,
    fetch_timeout: Duration,
) -> Result<(Vec<u8>, Option<String>), PipelineError> {
    match source {
        DocumentSource::Url(url) => {
            let response = client
                .get(url)
                .timeout(fetch_timeout)
                .send()
                .await
                .map_err(|e| PipelineError::FetchFailure(format!("{}: {}", url, e)))?;

            let status = response.status();
            if !status.is_success() {
                return Err(PipelineError::FetchFailure(format!(
                    "{}: HTTP {}",
                    url, status
                )));
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());

            let bytes = response
                .bytes()
                .await
                .map_err(|e| PipelineError::FetchFailure(format!("{}: {}", url, e)))?;

            Ok((bytes.to_vec(), content_type))
        }
        DocumentSource::Inline { bytes, .. } => Ok((bytes.clone(), None)),
        DocumentSource::Path(path) => {
            let bytes = tokio::fs::read(path).await.map_err(|e| {
                PipelineError::FetchFailure(format!("{}: {}", path.display(), e))
            })?;
            Ok((bytes, None))
        }
    }
}

/// Format detection: file extension first, Content-Type as fallback.
fn detect_format(
    source: &DocumentSource,
    content_type: Option<&str>,
) -> Result<DocumentFormat, PipelineError> {
    let name = source.file_name();
    if let Some(format) = DocumentFormat::from_file_name(&name) {
        return Ok(format);
    }
    if let Some(ct) = content_type {
        if let Some(format) = DocumentFormat::from_content_type(ct) {
            return Ok(format);
        }
    }
    Err(PipelineError::UnsupportedFormat(source.id()))
}
