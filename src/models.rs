//! Core data models for the answering pipeline.
//!
//! These types flow from document input through chunking, retrieval, and
//! generation to the final [`Answer`] returned to the caller.

use std::path::PathBuf;

use serde::Serialize;

use crate::completion::ModelProvider;

/// A document supplied with a query: a URL to fetch, inline bytes from an
/// upload, or a local path. Immutable once ingested.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    Url(String),
    Inline { name: String, bytes: Vec<u8> },
    Path(PathBuf),
}

impl DocumentSource {
    /// Stable identifier used in fingerprints and citations.
    pub fn id(&self) -> String {
        match self {
            DocumentSource::Url(url) => url.clone(),
            DocumentSource::Inline { name, .. } => name.clone(),
            DocumentSource::Path(path) => path.display().to_string(),
        }
    }

    /// File name portion of the identifier, for format detection.
    pub fn file_name(&self) -> String {
        match self {
            DocumentSource::Url(url) => {
                let trimmed = url.split(['?', '#']).next().unwrap_or(url);
                trimmed.rsplit('/').next().unwrap_or(trimmed).to_string()
            }
            DocumentSource::Inline { name, .. } => name.clone(),
            DocumentSource::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

/// Supported document formats, dispatched on by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    Txt,
}

impl DocumentFormat {
    /// Detect a format from a file name extension.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = name.rsplit('.').next()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "docx" | "doc" => Some(DocumentFormat::Docx),
            "pptx" | "ppt" => Some(DocumentFormat::Pptx),
            "xlsx" | "xls" => Some(DocumentFormat::Xlsx),
            "txt" | "md" | "text" => Some(DocumentFormat::Txt),
            _ => None,
        }
    }

    /// Detect a format from an HTTP Content-Type header value.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let ct = content_type.split(';').next().unwrap_or("").trim();
        match ct {
            "application/pdf" => Some(DocumentFormat::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(DocumentFormat::Docx)
            }
            "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
                Some(DocumentFormat::Pptx)
            }
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
                Some(DocumentFormat::Xlsx)
            }
            "text/plain" | "text/markdown" => Some(DocumentFormat::Txt),
            _ => None,
        }
    }
}

/// One extracted page, slide, or sheet of a document.
#[derive(Debug, Clone)]
pub struct TextBlock {
    pub text: String,
    /// 1-based page/slide/sheet number, where the format has one.
    pub page: Option<u32>,
}

/// A bounded text window, the atomic unit of retrieval.
///
/// Adjacent chunks of one document share a configured number of trailing
/// characters so context spanning a boundary is not lost.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub source_id: String,
    pub ordinal: usize,
    pub text: String,
    /// Page the chunk starts on, carried through for citations.
    pub page: Option<u32>,
}

/// A retrieved chunk paired with its relevance score, descending order.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// A source reference attached to an [`Answer`] for display.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub snippet: String,
    pub score: f32,
}

/// One inbound query: a document set, ordered questions, and generation
/// parameters. `documents` may be empty, in which case retrieval runs against
/// the standing persistent index.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub documents: Vec<DocumentSource>,
    pub questions: Vec<String>,
    pub model: ModelProvider,
    /// Sampling temperature, bounded to `[0.0, 1.0]` at the boundary.
    pub temperature: f32,
}

/// The generated answer for a single question.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub latency_ms: u64,
    /// True when this answer was served from the cache.
    pub cached: bool,
    /// Per-document ingestion problems surfaced instead of failing the run.
    pub warnings: Vec<String>,
}

/// Outcome of one question's pipeline instance. Questions are independent:
/// one exhausting its retry budget does not fail its siblings.
#[derive(Debug, Clone)]
pub enum QuestionResult {
    Answered(Answer),
    Failed(crate::error::PipelineError),
}

impl QuestionResult {
    pub fn as_answer(&self) -> Option<&Answer> {
        match self {
            QuestionResult::Answered(a) => Some(a),
            QuestionResult::Failed(_) => None,
        }
    }
}

/// Result of a full multi-question run; `results` is index-aligned with the
/// submitted questions.
#[derive(Debug)]
pub struct RunOutcome {
    pub results: Vec<QuestionResult>,
    /// Ingestion warnings that applied to the whole request.
    pub warnings: Vec<String>,
}
