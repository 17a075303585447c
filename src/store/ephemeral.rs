//! Request-scoped in-memory vector store.
//!
//! Built fresh from a request's just-ingested chunks, queried only within
//! that request, dropped with it. Brute-force cosine scan — fine at
//! per-request scale. The first insert establishes the store's dimension.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::PipelineError;
use crate::models::ScoredChunk;

use super::{IndexEntry, VectorStore};

pub struct EphemeralStore {
    inner: RwLock<Inner>,
}

struct Inner {
    dims: Option<usize>,
    entries: Vec<IndexEntry>,
}

impl EphemeralStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                dims: None,
                entries: Vec::new(),
            }),
        }
    }
}

impl Default for EphemeralStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for EphemeralStore {
    async fn insert(&self, entries: Vec<IndexEntry>) -> Result<(), PipelineError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner.write().unwrap();

        // Validate the whole batch before touching the index: a mismatch
        // must leave the store unchanged.
        let expected = inner.dims.unwrap_or(entries[0].vector.len());
        for entry in &entries {
            if entry.vector.len() != expected {
                return Err(PipelineError::DimensionMismatch {
                    expected,
                    got: entry.vector.len(),
                });
            }
        }

        inner.dims = Some(expected);
        inner.entries.extend(entries);
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, PipelineError> {
        let inner = self.inner.read().unwrap();

        let mut scored: Vec<ScoredChunk> = inner
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(vector, &entry.vector),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self) -> Result<usize, PipelineError> {
        Ok(self.inner.read().unwrap().entries.len())
    }
}
