//! Metrics collection using metrics-rs.
//!
//! The crate records counters and gauges through the [`metrics`] facade;
//! without an installed recorder every call is a no-op, so the hot path
//! costs nothing in embedded setups.

use metrics::{Counter, Histogram, Unit, counter, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const SAMPLES_READ: &str = "millrace_samples_read";
const SAMPLES_WRITTEN: &str = "millrace_samples_written";
const SAMPLES_DROPPED: &str = "millrace_samples_dropped";
const POOL_BLOCKS_AVAILABLE: &str = "millrace_pool_blocks_available";
const POOL_EXHAUSTED: &str = "millrace_pool_exhausted_total";
const BATCH_LEN: &str = "millrace_batch_len";

/// Initialize metrics descriptions.
///
/// Call this once at application startup before using any metrics.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    metrics::describe_counter!(
        SAMPLES_READ,
        Unit::Count,
        "Total number of samples read from source nodes"
    );
    metrics::describe_counter!(
        SAMPLES_WRITTEN,
        Unit::Count,
        "Total number of samples written to destination nodes"
    );
    metrics::describe_counter!(
        SAMPLES_DROPPED,
        Unit::Count,
        "Total number of samples discarded by hooks"
    );
    metrics::describe_gauge!(
        POOL_BLOCKS_AVAILABLE,
        Unit::Count,
        "Free blocks remaining in a sample pool"
    );
    metrics::describe_counter!(
        POOL_EXHAUSTED,
        Unit::Count,
        "Allocation attempts that found the pool empty"
    );
    metrics::describe_histogram!(
        BATCH_LEN,
        Unit::Count,
        "Samples per batch after hook processing"
    );
}

/// Record samples read from a source node.
#[inline]
pub fn record_samples_read(path: &str, node: &str, count: u64) {
    counter!(SAMPLES_READ, "path" => path.to_string(), "node" => node.to_string())
        .increment(count);
}

/// Record samples written to a destination node.
#[inline]
pub fn record_samples_written(path: &str, node: &str, count: u64) {
    counter!(SAMPLES_WRITTEN, "path" => path.to_string(), "node" => node.to_string())
        .increment(count);
}

/// Record samples a hook removed from a batch.
#[inline]
pub fn record_samples_dropped(path: &str, hook: &str, count: u64) {
    counter!(SAMPLES_DROPPED, "path" => path.to_string(), "hook" => hook.to_string())
        .increment(count);
}

/// Record the free-block level of a pool.
#[inline]
pub fn record_pool_available(owner: &str, available: usize) {
    gauge!(POOL_BLOCKS_AVAILABLE, "owner" => owner.to_string()).set(available as f64);
}

/// Record an allocation attempt that found the pool empty.
#[inline]
pub fn record_pool_exhausted() {
    counter!(POOL_EXHAUSTED).increment(1);
}

/// Record the size of a batch after hook processing.
#[inline]
pub fn record_batch_len(path: &str, len: usize) {
    histogram!(BATCH_LEN, "path" => path.to_string()).record(len as f64);
}

/// Metrics collector for a single path.
///
/// Pre-registers the per-path counters so the hot loop increments handles
/// instead of re-resolving labels on every batch.
#[derive(Clone)]
pub struct PathMetrics {
    path: String,
    samples_read: Counter,
    samples_written: Counter,
    samples_dropped: Counter,
    batch_len: Histogram,
}

impl PathMetrics {
    /// Create a collector labelled with the path name.
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            samples_read: counter!(SAMPLES_READ, "path" => path.to_string()),
            samples_written: counter!(SAMPLES_WRITTEN, "path" => path.to_string()),
            samples_dropped: counter!(SAMPLES_DROPPED, "path" => path.to_string()),
            batch_len: histogram!(BATCH_LEN, "path" => path.to_string()),
        }
    }

    /// Record samples received from any of the path's sources.
    #[inline]
    pub fn record_read(&self, count: u64) {
        self.samples_read.increment(count);
    }

    /// Record samples delivered to the path's destinations.
    #[inline]
    pub fn record_written(&self, count: u64) {
        self.samples_written.increment(count);
    }

    /// Record samples removed by the hook pipeline.
    #[inline]
    pub fn record_dropped(&self, count: u64) {
        self.samples_dropped.increment(count);
    }

    /// Record a processed batch size.
    #[inline]
    pub fn record_batch(&self, len: usize) {
        self.batch_len.record(len as f64);
    }

    /// Get the path name.
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        // Should not panic
        init_metrics();
        // Should be idempotent
        init_metrics();
    }

    #[test]
    fn test_path_metrics() {
        let metrics = PathMetrics::new("test-path");

        metrics.record_read(10);
        metrics.record_written(8);
        metrics.record_dropped(2);
        metrics.record_batch(8);

        assert_eq!(metrics.path(), "test-path");
    }

    #[test]
    fn test_global_recording_functions() {
        // These should not panic even without a recorder installed
        record_samples_read("p", "src", 4);
        record_samples_written("p", "dst", 4);
        record_samples_dropped("p", "drop", 1);
        record_pool_available("p", 16);
        record_pool_exhausted();
        record_batch_len("p", 4);
    }
}
