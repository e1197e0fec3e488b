//! Runtime counters and latency histogram.
//!
//! Lock-free atomics; one `RuntimeMetrics` is shared by the bus and the
//! orchestrator through an `Arc`.

use crate::bus::{DispatchResult, DispatchStatus};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A counter metric (monotonically increasing).
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by amount.
    pub fn add(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    /// Get current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A histogram of durations in seconds.
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<f64>,
    bucket_counts: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with default latency buckets.
    pub fn new() -> Self {
        Self::with_buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0])
    }

    /// Create with custom buckets (upper bounds, seconds).
    pub fn with_buckets(buckets: Vec<f64>) -> Self {
        let bucket_counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            bucket_counts,
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Observe a duration.
    pub fn observe(&self, value: Duration) {
        let secs = value.as_secs_f64();
        for (i, bucket) in self.buckets.iter().enumerate() {
            if secs <= *bucket {
                self.bucket_counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.sum_micros
            .fetch_add(value.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get observation count.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Mean observation in seconds.
    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0 / count as f64
        }
    }

    /// Cumulative `(upper_bound, count)` pairs.
    pub fn buckets(&self) -> Vec<(f64, u64)> {
        self.buckets
            .iter()
            .zip(&self.bucket_counts)
            .map(|(b, c)| (*b, c.load(Ordering::Relaxed)))
            .collect()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for the bus and orchestrator.
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    pub events_published: Counter,
    pub deliveries: Counter,
    pub handler_ok: Counter,
    pub handler_errors: Counter,
    pub handler_timeouts: Counter,
    pub saturated: Counter,
    pub requests: Counter,
    pub requests_partial: Counter,
    pub requests_failed: Counter,
    pub handler_latency: Histogram,
}

impl RuntimeMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one handler outcome.
    pub fn record_dispatch(&self, result: &DispatchResult) {
        self.deliveries.inc();
        match result.status {
            DispatchStatus::Ok => self.handler_ok.inc(),
            DispatchStatus::Error => self.handler_errors.inc(),
            DispatchStatus::Timeout => self.handler_timeouts.inc(),
        }
        self.handler_latency.observe(result.duration);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_published: self.events_published.get(),
            deliveries: self.deliveries.get(),
            handler_ok: self.handler_ok.get(),
            handler_errors: self.handler_errors.get(),
            handler_timeouts: self.handler_timeouts.get(),
            saturated: self.saturated.get(),
            requests: self.requests.get(),
            requests_partial: self.requests_partial.get(),
            requests_failed: self.requests_failed.get(),
            mean_handler_latency_secs: self.handler_latency.mean(),
        }
    }
}

/// Serializable metrics snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub events_published: u64,
    pub deliveries: u64,
    pub handler_ok: u64,
    pub handler_errors: u64,
    pub handler_timeouts: u64,
    pub saturated: u64,
    pub requests: u64,
    pub requests_partial: u64,
    pub requests_failed: u64,
    pub mean_handler_latency_secs: f64,
}
