//! In-process metrics sink.
//!
//! Lock-free counters recorded by the orchestrator and read by the
//! `/metrics` surface and the `stats` command. Snapshots are consistent
//! enough for observability; no cross-counter atomicity is promised.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Metrics {
    requests: AtomicU64,
    questions: AtomicU64,
    cache_hits: AtomicU64,
    generation_calls: AtomicU64,
    failures: AtomicU64,
    latency_ms_total: AtomicU64,
}

/// Point-in-time view of the counters, with derived rates.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub total_questions: u64,
    pub cache_hits: u64,
    pub cache_hit_rate: f64,
    pub generation_calls: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// One answered question: its end-to-end latency and cache outcome.
    pub fn record_question(&self, latency_ms: u64, cache_hit: bool) {
        self.questions.fetch_add(1, Ordering::Relaxed);
        self.latency_ms_total.fetch_add(latency_ms, Ordering::Relaxed);
        if cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_generation_call(&self) {
        self.generation_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let questions = self.questions.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let latency_total = self.latency_ms_total.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests: self.requests.load(Ordering::Relaxed),
            total_questions: questions,
            cache_hits,
            cache_hit_rate: if questions > 0 {
                cache_hits as f64 / questions as f64
            } else {
                0.0
            },
            generation_calls: self.generation_calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            avg_latency_ms: if questions > 0 {
                latency_total as f64 / questions as f64
            } else {
                0.0
            },
        }
    }
}
