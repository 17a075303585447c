//! Vector store abstraction.
//!
//! The [`VectorStore`] trait covers the two operations the pipeline needs —
//! append entries, query nearest — over two explicitly constructed variants:
//!
//! - [`ephemeral::EphemeralStore`] — request-scoped, in-memory, discarded
//!   with the request;
//! - [`remote::RemoteStore`] — durable, namespace-keyed HTTP index acting as
//!   a standing knowledge base across requests.
//!
//! Both rank by cosine similarity. Inserting a vector whose dimensionality
//! disagrees with the store's established dimension fails with
//! `DimensionMismatch` and leaves the store unchanged.

pub mod ephemeral;
pub mod remote;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::models::{Chunk, ScoredChunk};

/// An embedded chunk ready for indexing.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Polymorphic vector index: append-only inserts, k-nearest queries.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Append entries. Fails with `DimensionMismatch` (and mutates nothing)
    /// if any vector disagrees with the store's established dimension.
    async fn insert(&self, entries: Vec<IndexEntry>) -> Result<(), PipelineError>;

    /// Up to `k` nearest entries by descending similarity. An empty store
    /// returns an empty result, never an error.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, PipelineError>;

    /// Number of indexed entries.
    async fn count(&self) -> Result<usize, PipelineError>;
}

/// Which store variant serves a request. Decided once per query set, not per
/// chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRouting {
    /// Documents supplied -> ephemeral; none -> persistent.
    Auto,
    Ephemeral,
    Persistent,
}

impl StoreRouting {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(StoreRouting::Auto),
            "ephemeral" => Some(StoreRouting::Ephemeral),
            "persistent" => Some(StoreRouting::Persistent),
            _ => None,
        }
    }

    /// Resolve the variant for a request with `has_documents` inputs.
    pub fn resolve(&self, has_documents: bool) -> StoreRouting {
        match self {
            StoreRouting::Auto => {
                if has_documents {
                    StoreRouting::Ephemeral
                } else {
                    StoreRouting::Persistent
                }
            }
            fixed => *fixed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_routes_on_document_presence() {
        assert_eq!(
            StoreRouting::Auto.resolve(true),
            StoreRouting::Ephemeral
        );
        assert_eq!(
            StoreRouting::Auto.resolve(false),
            StoreRouting::Persistent
        );
    }

    #[test]
    fn fixed_routing_ignores_documents() {
        assert_eq!(
            StoreRouting::Persistent.resolve(true),
            StoreRouting::Persistent
        );
        assert_eq!(
            StoreRouting::Ephemeral.resolve(false),
            StoreRouting::Ephemeral
        );
    }

    #[test]
    fn parse_rejects_unknown() {
        assert_eq!(StoreRouting::parse("auto"), Some(StoreRouting::Auto));
        assert_eq!(StoreRouting::parse("sticky"), None);
    }
}
