//! Retrieval metrics
//!
//! Process-wide recorder for retrieval operations: counters by method,
//! query type and error kind, cache hit rates, a bounded latency sample
//! window, and per-stage timing aggregates. Counters are atomic; the
//! sample window takes a short internal lock. Observations are mirrored to
//! the `metrics` facade so an exporter installed by the host process sees
//! the same numbers.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bounded rolling window of latency samples.
const MAX_SAMPLES: usize = 1000;

#[derive(Default)]
struct StageAggregate {
    count: u64,
    total_ms: u64,
    max_ms: u64,
}

/// Process-wide metrics recorder
pub struct RetrievalMetrics {
    retrievals_total: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    rerank_failures: AtomicU64,
    analyzer_fallbacks: AtomicU64,
    deadline_exceeded: AtomicU64,
    adapter_timeouts: AtomicU64,
    bm25_rebuilds: AtomicU64,
    bm25_indexed_documents: AtomicU64,

    method_counts: Mutex<HashMap<String, u64>>,
    query_type_counts: Mutex<HashMap<String, u64>>,
    error_counts: Mutex<HashMap<String, u64>>,
    latency_samples_ms: Mutex<Vec<u64>>,
    result_counts: Mutex<Vec<usize>>,
    stage_timings: Mutex<HashMap<String, StageAggregate>>,

    started_at: chrono::DateTime<chrono::Utc>,
}

impl Default for RetrievalMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RetrievalMetrics {
    /// Create a fresh recorder
    pub fn new() -> Self {
        Self {
            retrievals_total: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            rerank_failures: AtomicU64::new(0),
            analyzer_fallbacks: AtomicU64::new(0),
            deadline_exceeded: AtomicU64::new(0),
            adapter_timeouts: AtomicU64::new(0),
            bm25_rebuilds: AtomicU64::new(0),
            bm25_indexed_documents: AtomicU64::new(0),
            method_counts: Mutex::new(HashMap::new()),
            query_type_counts: Mutex::new(HashMap::new()),
            error_counts: Mutex::new(HashMap::new()),
            latency_samples_ms: Mutex::new(Vec::new()),
            result_counts: Mutex::new(Vec::new()),
            stage_timings: Mutex::new(HashMap::new()),
            started_at: chrono::Utc::now(),
        }
    }

    /// Record a completed retrieval
    pub fn record_retrieval(&self, method: &str, latency_ms: u64, result_count: usize) {
        self.retrievals_total.fetch_add(1, Ordering::Relaxed);

        {
            let mut counts = self.method_counts.lock();
            *counts.entry(method.to_string()).or_insert(0) += 1;
        }
        {
            let mut samples = self.latency_samples_ms.lock();
            if samples.len() >= MAX_SAMPLES {
                samples.remove(0);
            }
            samples.push(latency_ms);
        }
        {
            let mut counts = self.result_counts.lock();
            if counts.len() >= MAX_SAMPLES {
                counts.remove(0);
            }
            counts.push(result_count);
        }

        metrics::counter!("retrieval_total", "method" => method.to_string()).increment(1);
        metrics::histogram!("retrieval_latency_ms", "method" => method.to_string())
            .record(latency_ms as f64);
        metrics::histogram!("retrieval_result_count", "method" => method.to_string())
            .record(result_count as f64);
    }

    /// Record one pipeline stage's elapsed time
    pub fn record_stage(&self, stage: &str, elapsed_ms: u64) {
        let mut timings = self.stage_timings.lock();
        let agg = timings.entry(stage.to_string()).or_default();
        agg.count += 1;
        agg.total_ms += elapsed_ms;
        agg.max_ms = agg.max_ms.max(elapsed_ms);
        drop(timings);

        metrics::histogram!("retrieval_stage_ms", "stage" => stage.to_string())
            .record(elapsed_ms as f64);
    }

    /// Record the analyzer's classification
    pub fn record_query_type(&self, query_type: &str) {
        let mut counts = self.query_type_counts.lock();
        *counts.entry(query_type.to_string()).or_insert(0) += 1;
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("retrieval_cache_hits").increment(1);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("retrieval_cache_misses").increment(1);
    }

    pub fn record_rerank_failure(&self) {
        self.rerank_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("retrieval_rerank_failures").increment(1);
    }

    pub fn record_analyzer_fallback(&self) {
        self.analyzer_fallbacks.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("retrieval_analyzer_fallbacks").increment(1);
    }

    pub fn record_deadline_exceeded(&self) {
        self.deadline_exceeded.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("retrieval_deadline_exceeded").increment(1);
    }

    pub fn record_adapter_timeout(&self, adapter: &str) {
        self.adapter_timeouts.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("retrieval_adapter_timeouts", "adapter" => adapter.to_string())
            .increment(1);
    }

    /// Record an error by kind name
    pub fn record_error(&self, kind: &str) {
        let mut counts = self.error_counts.lock();
        *counts.entry(kind.to_string()).or_insert(0) += 1;
        drop(counts);
        metrics::counter!("retrieval_errors", "kind" => kind.to_string()).increment(1);
    }

    /// Record a completed BM25 rebuild
    pub fn record_bm25_rebuild(&self, indexed_documents: usize) {
        self.bm25_rebuilds.fetch_add(1, Ordering::Relaxed);
        self.bm25_indexed_documents
            .store(indexed_documents as u64, Ordering::Relaxed);
        metrics::counter!("bm25_rebuilds").increment(1);
        metrics::gauge!("bm25_indexed_documents").set(indexed_documents as f64);
    }

    pub fn rerank_failures(&self) -> u64 {
        self.rerank_failures.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn deadline_exceeded(&self) -> u64 {
        self.deadline_exceeded.load(Ordering::Relaxed)
    }

    /// Produce a point-in-time snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let samples = self.latency_samples_ms.lock().clone();
        let (avg_ms, p50_ms, p95_ms, max_ms) = latency_stats(&samples);

        let result_counts = self.result_counts.lock();
        let avg_results = if result_counts.is_empty() {
            0.0
        } else {
            result_counts.iter().sum::<usize>() as f64 / result_counts.len() as f64
        };
        drop(result_counts);

        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let cache_hit_ratio = if hits + misses > 0 {
            hits as f64 / (hits + misses) as f64
        } else {
            0.0
        };

        let stages = self
            .stage_timings
            .lock()
            .iter()
            .map(|(stage, agg)| {
                (
                    stage.clone(),
                    StageSnapshot {
                        count: agg.count,
                        avg_ms: if agg.count > 0 {
                            agg.total_ms as f64 / agg.count as f64
                        } else {
                            0.0
                        },
                        max_ms: agg.max_ms,
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            started_at: self.started_at,
            captured_at: chrono::Utc::now(),
            retrievals_total: self.retrievals_total.load(Ordering::Relaxed),
            method_counts: self.method_counts.lock().clone(),
            query_type_counts: self.query_type_counts.lock().clone(),
            error_counts: self.error_counts.lock().clone(),
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_ratio,
            rerank_failures: self.rerank_failures.load(Ordering::Relaxed),
            analyzer_fallbacks: self.analyzer_fallbacks.load(Ordering::Relaxed),
            deadline_exceeded: self.deadline_exceeded.load(Ordering::Relaxed),
            adapter_timeouts: self.adapter_timeouts.load(Ordering::Relaxed),
            bm25_rebuilds: self.bm25_rebuilds.load(Ordering::Relaxed),
            bm25_indexed_documents: self.bm25_indexed_documents.load(Ordering::Relaxed),
            latency_avg_ms: avg_ms,
            latency_p50_ms: p50_ms,
            latency_p95_ms: p95_ms,
            latency_max_ms: max_ms,
            avg_result_count: avg_results,
            stages,
        }
    }
}

fn latency_stats(samples: &[u64]) -> (f64, u64, u64, u64) {
    if samples.is_empty() {
        return (0.0, 0, 0, 0);
    }

    let mut sorted = samples.to_vec();
    sorted.sort_unstable();

    let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
    let p50 = sorted[sorted.len() / 2];
    let p95_idx = ((sorted.len() as f64) * 0.95) as usize;
    let p95 = sorted[p95_idx.min(sorted.len() - 1)];
    let max = *sorted.last().unwrap_or(&0);

    (avg, p50, p95, max)
}

/// Per-stage timing aggregate in a snapshot
#[derive(Debug, Clone, Serialize)]
pub struct StageSnapshot {
    pub count: u64,
    pub avg_ms: f64,
    pub max_ms: u64,
}

/// Point-in-time view of the metrics recorder
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub captured_at: chrono::DateTime<chrono::Utc>,
    pub retrievals_total: u64,
    pub method_counts: HashMap<String, u64>,
    pub query_type_counts: HashMap<String, u64>,
    pub error_counts: HashMap<String, u64>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_ratio: f64,
    pub rerank_failures: u64,
    pub analyzer_fallbacks: u64,
    pub deadline_exceeded: u64,
    pub adapter_timeouts: u64,
    pub bm25_rebuilds: u64,
    pub bm25_indexed_documents: u64,
    pub latency_avg_ms: f64,
    pub latency_p50_ms: u64,
    pub latency_p95_ms: u64,
    pub latency_max_ms: u64,
    pub avg_result_count: f64,
    pub stages: HashMap<String, StageSnapshot>,
}
