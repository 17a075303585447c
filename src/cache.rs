//! Answer memoization with per-fingerprint single-flight.
//!
//! The cache maps a content fingerprint — sorted document identifiers,
//! normalized question, model id, rounded temperature — to a computed
//! [`Answer`]. Concurrent callers of one fingerprint share a single
//! computation: the first to arrive runs it, the rest await its result on the
//! same cell. Unrelated fingerprints never contend beyond the brief map lock.
//!
//! A computation that fails or is cancelled leaves its cell unpopulated, so
//! the cache never serves partial results; the next caller simply computes
//! again.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OnceCell};

use crate::error::PipelineError;
use crate::models::Answer;

/// Derive the deterministic cache key for one (documents, question, model,
/// temperature) combination.
///
/// Document identifiers are sorted before hashing so submission order is
/// irrelevant; the question is trimmed and case-folded so trivially repeated
/// questions hit; the temperature is rounded to two decimals so float noise
/// does not split entries.
pub fn fingerprint(doc_ids: &[String], question: &str, model_id: &str, temperature: f32) -> String {
    let mut sorted = doc_ids.to_vec();
    sorted.sort();

    let mut hasher = Sha256::new();
    for id in &sorted {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(question.trim().to_lowercase().as_bytes());
    hasher.update([0u8]);
    hasher.update(model_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(format!("{:.2}", temperature).as_bytes());
    format!("{:x}", hasher.finalize())
}

type Cell = Arc<OnceCell<Answer>>;

/// Fingerprint-keyed answer cache with single-flight computation.
pub struct AnswerCache {
    inner: Mutex<Inner>,
    max_entries: Option<usize>,
}

struct Inner {
    cells: HashMap<String, Cell>,
    /// Insertion order, for oldest-first eviction.
    order: VecDeque<String>,
}

impl AnswerCache {
    /// `max_entries = None` means unbounded for the process lifetime.
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                cells: HashMap::new(),
                order: VecDeque::new(),
            }),
            max_entries,
        }
    }

    /// Non-blocking peek: a populated answer for this fingerprint, if any.
    pub async fn peek(&self, fp: &str) -> Option<Answer> {
        let inner = self.inner.lock().await;
        inner.cells.get(fp).and_then(|cell| cell.get().cloned())
    }

    /// Return the cached answer for `fp`, or run `compute` to produce it.
    ///
    /// The boolean is true when the answer came from the cache without
    /// invoking `compute` (either populated before this call or produced by
    /// a concurrent caller we awaited).
    pub async fn get_or_compute<F, Fut>(
        &self,
        fp: &str,
        compute: F,
    ) -> Result<(Answer, bool), PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Answer, PipelineError>>,
    {
        let cell = {
            let mut inner = self.inner.lock().await;
            match inner.cells.get(fp) {
                Some(cell) => cell.clone(),
                None => {
                    let cell: Cell = Arc::new(OnceCell::new());
                    inner.cells.insert(fp.to_string(), cell.clone());
                    inner.order.push_back(fp.to_string());
                    cell
                }
            }
        };

        let mut ran_compute = false;
        let answer = cell
            .get_or_try_init(|| {
                ran_compute = true;
                compute()
            })
            .await?
            .clone();

        if ran_compute {
            self.evict_overflow().await;
        }

        Ok((answer, !ran_compute))
    }

    /// Drop oldest populated entries until within the configured bound.
    /// In-flight (unpopulated) cells are left alone.
    async fn evict_overflow(&self) {
        let Some(max) = self.max_entries else {
            return;
        };

        let mut inner = self.inner.lock().await;
        while inner.cells.len() > max {
            let Some(pos) = inner
                .order
                .iter()
                .position(|fp| inner.cells.get(fp).is_some_and(|c| c.get().is_some()))
            else {
                break;
            };
            if let Some(fp) = inner.order.remove(pos) {
                inner.cells.remove(&fp);
            }
        }
    }

    /// Number of entries, populated or in flight.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.cells.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
