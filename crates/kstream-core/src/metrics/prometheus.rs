//! Prometheus text export for consumer and producer counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Why a consumer stopped returning records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// Shard was closed
    Closed,
    /// Iteration deadline passed
    TimedOut,
    /// Empty-fetch retries ran out, or a fetch failed
    Exhausted,
}

impl StopReason {
    /// Get the label value for Prometheus export.
    pub fn as_label(&self) -> &'static str {
        match self {
            StopReason::Closed => "closed",
            StopReason::TimedOut => "timed_out",
            StopReason::Exhausted => "exhausted",
        }
    }
}

/// Counters shared by consumers and producers of one process.
#[derive(Debug, Default)]
pub struct StreamMetrics {
    // === CONSUMER ===
    /// Records handed to callers
    records_read_total: AtomicU64,

    /// GetRecords calls issued
    fetches_total: AtomicU64,

    /// GetRecords calls that returned no records
    empty_fetches_total: AtomicU64,

    /// GetRecords calls rejected for throughput
    throttled_fetches_total: AtomicU64,

    /// Successful checkpoint writes
    checkpoints_total: AtomicU64,

    /// Consumers stopped, by reason
    stopped_closed: AtomicU64,
    stopped_timed_out: AtomicU64,
    stopped_exhausted: AtomicU64,

    // === PRODUCER ===
    /// Records accepted by the stream
    records_written_total: AtomicU64,

    /// Write attempts rejected for throughput
    throttled_writes_total: AtomicU64,
}

impl StreamMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self::default()
    }

    // === COUNTER RECORDING ===

    pub fn record_read(&self) {
        self.records_read_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fetch and whether it came back empty.
    pub fn record_fetch(&self, record_count: usize) {
        self.fetches_total.fetch_add(1, Ordering::Relaxed);
        if record_count == 0 {
            self.empty_fetches_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_throttled_fetch(&self) {
        self.throttled_fetches_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkpoint(&self) {
        self.checkpoints_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stop(&self, reason: StopReason) {
        match reason {
            StopReason::Closed => self.stopped_closed.fetch_add(1, Ordering::Relaxed),
            StopReason::TimedOut => self.stopped_timed_out.fetch_add(1, Ordering::Relaxed),
            StopReason::Exhausted => self.stopped_exhausted.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_write(&self) {
        self.records_written_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttled_write(&self) {
        self.throttled_writes_total.fetch_add(1, Ordering::Relaxed);
    }

    // === GETTERS ===

    pub fn records_read_total(&self) -> u64 {
        self.records_read_total.load(Ordering::Relaxed)
    }

    pub fn fetches_total(&self) -> u64 {
        self.fetches_total.load(Ordering::Relaxed)
    }

    pub fn empty_fetches_total(&self) -> u64 {
        self.empty_fetches_total.load(Ordering::Relaxed)
    }

    pub fn throttled_fetches_total(&self) -> u64 {
        self.throttled_fetches_total.load(Ordering::Relaxed)
    }

    pub fn checkpoints_total(&self) -> u64 {
        self.checkpoints_total.load(Ordering::Relaxed)
    }

    pub fn stops_by_reason(&self, reason: StopReason) -> u64 {
        match reason {
            StopReason::Closed => self.stopped_closed.load(Ordering::Relaxed),
            StopReason::TimedOut => self.stopped_timed_out.load(Ordering::Relaxed),
            StopReason::Exhausted => self.stopped_exhausted.load(Ordering::Relaxed),
        }
    }

    pub fn records_written_total(&self) -> u64 {
        self.records_written_total.load(Ordering::Relaxed)
    }

    pub fn throttled_writes_total(&self) -> u64 {
        self.throttled_writes_total.load(Ordering::Relaxed)
    }

    /// Export all metrics in Prometheus text exposition format.
    ///
    /// ```
    /// use kstream_core::metrics::StreamMetrics;
    ///
    /// let metrics = StreamMetrics::new();
    /// metrics.record_read();
    /// let text = metrics.export_prometheus_text();
    /// assert!(text.contains("kstream_records_read_total 1"));
    /// ```
    pub fn export_prometheus_text(&self) -> String {
        let mut output = String::with_capacity(2048);

        let counters = [
            (
                "kstream_records_read_total",
                "Records returned by shard consumers",
                self.records_read_total(),
            ),
            (
                "kstream_fetches_total",
                "GetRecords calls issued",
                self.fetches_total(),
            ),
            (
                "kstream_empty_fetches_total",
                "GetRecords calls that returned no records",
                self.empty_fetches_total(),
            ),
            (
                "kstream_throttled_fetches_total",
                "GetRecords calls rejected for throughput",
                self.throttled_fetches_total(),
            ),
            (
                "kstream_checkpoints_total",
                "Successful checkpoint writes",
                self.checkpoints_total(),
            ),
            (
                "kstream_records_written_total",
                "Records accepted by the stream",
                self.records_written_total(),
            ),
            (
                "kstream_throttled_writes_total",
                "Write attempts rejected for throughput",
                self.throttled_writes_total(),
            ),
        ];

        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, value));
            output.push('\n');
        }

        output.push_str("# HELP kstream_consumers_stopped_total Consumers stopped, by reason\n");
        output.push_str("# TYPE kstream_consumers_stopped_total counter\n");
        for reason in [StopReason::Closed, StopReason::TimedOut, StopReason::Exhausted] {
            output.push_str(&format!(
                "kstream_consumers_stopped_total{{reason=\"{}\"}} {}\n",
                reason.as_label(),
                self.stops_by_reason(reason)
            ));
        }

        output
    }
}
