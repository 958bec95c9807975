//! Pipeline metrics
//!
//! Lock-free counters and running averages covering the whole pipeline:
//! - Stream lifecycle totals (created, active, per-terminal-state counts)
//! - Chunk throughput
//! - Average chunks per completed stream
//! - Average stream duration
//!
//! Updated only from lifecycle transition points and chunk acceptance; read
//! through [`MetricsSnapshot`], a detached copy that callers cannot use to
//! corrupt the live counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

// ============================================================================
// Primitives
// ============================================================================

/// Monotonically increasing counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

#[allow(missing_docs)]
impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Value that can go up and down
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

#[allow(missing_docs)]
impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Pipeline Metrics
// ============================================================================

/// Live metrics for the streaming pipeline
///
/// All fields are atomics; recording never blocks a driver task.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Streams ever created
    pub streams_created: Counter,
    /// Streams currently in a non-terminal state
    pub active_streams: Gauge,
    /// Streams that reached `completed`
    pub completed_streams: Counter,
    /// Streams that reached `cancelled`
    pub cancelled_streams: Counter,
    /// Streams that reached `error`
    pub failed_streams: Counter,
    /// Chunks accepted across all streams
    pub chunks_produced: Counter,
    /// Sum of chunk counts over completed streams (average input)
    completed_chunk_sum: Counter,
    /// Sum of terminal stream durations in milliseconds (average input)
    duration_ms_sum: Counter,
    /// Number of terminal streams measured
    duration_count: Counter,
}

impl PipelineMetrics {
    /// Create metrics with every counter at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful stream registration
    pub fn record_created(&self) {
        self.streams_created.inc();
        self.active_streams.inc();
    }

    /// Record one accepted chunk
    pub fn record_chunk(&self) {
        self.chunks_produced.inc();
    }

    /// Record a stream reaching `completed`
    pub fn record_completed(&self, chunk_count: u64, duration: Duration) {
        self.active_streams.dec();
        self.completed_streams.inc();
        self.completed_chunk_sum.add(chunk_count);
        self.record_duration(duration);
    }

    /// Record a stream reaching `cancelled`
    pub fn record_cancelled(&self, duration: Duration) {
        self.active_streams.dec();
        self.cancelled_streams.inc();
        self.record_duration(duration);
    }

    /// Record a stream reaching `error`
    pub fn record_failed(&self, duration: Duration) {
        self.active_streams.dec();
        self.failed_streams.inc();
        self.record_duration(duration);
    }

    fn record_duration(&self, duration: Duration) {
        self.duration_ms_sum.add(duration.as_millis() as u64);
        self.duration_count.inc();
    }

    /// Take a detached copy of every metric
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let completed = self.completed_streams.get();
        let avg_chunks_per_completed_stream = if completed == 0 {
            0.0
        } else {
            self.completed_chunk_sum.get() as f64 / completed as f64
        };

        let measured = self.duration_count.get();
        let avg_stream_duration_ms = if measured == 0 {
            0.0
        } else {
            self.duration_ms_sum.get() as f64 / measured as f64
        };

        MetricsSnapshot {
            total_streams: self.streams_created.get(),
            active_streams: self.active_streams.get(),
            completed_streams: completed,
            cancelled_streams: self.cancelled_streams.get(),
            failed_streams: self.failed_streams.get(),
            total_chunks: self.chunks_produced.get(),
            avg_chunks_per_completed_stream,
            avg_stream_duration_ms,
        }
    }
}

/// Point-in-time copy of all pipeline metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Streams ever created
    pub total_streams: u64,
    /// Streams currently in a non-terminal state
    pub active_streams: u64,
    /// Streams that completed normally
    pub completed_streams: u64,
    /// Streams cancelled by the caller
    pub cancelled_streams: u64,
    /// Streams that ended in error
    pub failed_streams: u64,
    /// Chunks accepted across all streams
    pub total_chunks: u64,
    /// Mean chunks per completed stream
    pub avg_chunks_per_completed_stream: f64,
    /// Mean duration of terminal streams in milliseconds
    pub avg_stream_duration_ms: f64,
}

impl MetricsSnapshot {
    /// Sum of all terminal-state counters
    #[must_use]
    pub fn terminal_streams(&self) -> u64 {
        self.completed_streams + self.cancelled_streams + self.failed_streams
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates() {
        let counter = Counter::new();
        counter.inc();
        counter.add(4);
        assert_eq!(counter.get(), 5);
    }

    #[test]
    fn gauge_moves_both_ways() {
        let gauge = Gauge::new();
        gauge.inc();
        gauge.inc();
        gauge.dec();
        assert_eq!(gauge.get(), 1);
    }

    #[test]
    fn empty_snapshot_has_zero_averages() {
        let metrics = PipelineMetrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_streams, 0);
        assert_eq!(snapshot.avg_chunks_per_completed_stream, 0.0);
        assert_eq!(snapshot.avg_stream_duration_ms, 0.0);
    }

    #[test]
    fn three_streams_one_of_each_terminal_state() {
        let metrics = PipelineMetrics::new();
        for _ in 0..3 {
            metrics.record_created();
        }
        metrics.record_completed(4, Duration::from_millis(100));
        metrics.record_cancelled(Duration::from_millis(50));
        metrics.record_failed(Duration::from_millis(150));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_streams, 3);
        assert_eq!(snapshot.active_streams, 0);
        assert_eq!(snapshot.terminal_streams(), 3);
        assert_eq!(snapshot.completed_streams, 1);
        assert_eq!(snapshot.cancelled_streams, 1);
        assert_eq!(snapshot.failed_streams, 1);
    }

    #[test]
    fn average_chunks_counts_only_completed_streams() {
        let metrics = PipelineMetrics::new();
        metrics.record_created();
        metrics.record_created();
        metrics.record_created();

        for _ in 0..10 {
            metrics.record_chunk();
        }
        metrics.record_completed(6, Duration::from_millis(10));
        metrics.record_completed(2, Duration::from_millis(10));
        // Cancelled stream's chunks do not dilute the completed average.
        metrics.record_cancelled(Duration::from_millis(10));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_chunks, 10);
        assert_eq!(snapshot.avg_chunks_per_completed_stream, 4.0);
    }

    #[test]
    fn average_duration_spans_all_terminal_states() {
        let metrics = PipelineMetrics::new();
        metrics.record_created();
        metrics.record_created();
        metrics.record_completed(1, Duration::from_millis(100));
        metrics.record_failed(Duration::from_millis(300));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.avg_stream_duration_ms, 200.0);
    }

    #[test]
    fn snapshot_is_detached_from_live_counters() {
        let metrics = PipelineMetrics::new();
        metrics.record_created();
        let snapshot = metrics.snapshot();

        metrics.record_created();
        assert_eq!(snapshot.total_streams, 1, "snapshot must not track later updates");
        assert_eq!(metrics.snapshot().total_streams, 2);
    }
}
