//! In-process pipeline counters
//!
//! Plain atomics shared across the scheduler and processors. There is no
//! exporter surface; `snapshot()` is the read path.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Concurrency-safe counters for one engine instance.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub ticks: AtomicU64,
    pub alerts_found: AtomicU64,
    pub alerts_enriched: AtomicU64,
    pub alerts_partial: AtomicU64,
    pub alerts_unprocessable: AtomicU64,
    pub alerts_failed: AtomicU64,
    pub retrieval_task_failures: AtomicU64,
    pub graph_edges_skipped: AtomicU64,
    pub embed_tokens_in: AtomicU64,
    pub llm_tokens_in: AtomicU64,
    pub llm_tokens_out: AtomicU64,
    pub processing_ms_total: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub alerts_found: u64,
    pub alerts_enriched: u64,
    pub alerts_partial: u64,
    pub alerts_unprocessable: u64,
    pub alerts_failed: u64,
    pub retrieval_task_failures: u64,
    pub graph_edges_skipped: u64,
    pub embed_tokens_in: u64,
    pub llm_tokens_in: u64,
    pub llm_tokens_out: u64,
    pub processing_ms_total: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn incr(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            alerts_found: self.alerts_found.load(Ordering::Relaxed),
            alerts_enriched: self.alerts_enriched.load(Ordering::Relaxed),
            alerts_partial: self.alerts_partial.load(Ordering::Relaxed),
            alerts_unprocessable: self.alerts_unprocessable.load(Ordering::Relaxed),
            alerts_failed: self.alerts_failed.load(Ordering::Relaxed),
            retrieval_task_failures: self.retrieval_task_failures.load(Ordering::Relaxed),
            graph_edges_skipped: self.graph_edges_skipped.load(Ordering::Relaxed),
            embed_tokens_in: self.embed_tokens_in.load(Ordering::Relaxed),
            llm_tokens_in: self.llm_tokens_in.load(Ordering::Relaxed),
            llm_tokens_out: self.llm_tokens_out.load(Ordering::Relaxed),
            processing_ms_total: self.processing_ms_total.load(Ordering::Relaxed),
        }
    }
}
