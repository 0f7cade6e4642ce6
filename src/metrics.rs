//! Telemetry counters for the reassembler.
//!
//! Lightweight counters for observability

use std::sync::atomic::{ AtomicU64, Ordering };

use serde::Serialize;

/// Per-reassembler telemetry counters
pub struct Metrics {
    pub buffers_accepted: AtomicU64,
    pub buffers_rejected: AtomicU64,
    pub spans_emitted: AtomicU64,
    pub buffers_dropped: AtomicU64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            buffers_accepted: AtomicU64::new(0),
            buffers_rejected: AtomicU64::new(0),
            spans_emitted: AtomicU64::new(0),
            buffers_dropped: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_accept(&self) {
        self.buffers_accepted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rejection(&self) {
        self.buffers_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_span(&self) {
        self.spans_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a staged buffer released because its slot was recycled before
    /// the span it belonged to completed.
    #[inline]
    pub fn record_drop(&self) {
        self.buffers_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            buffers_accepted: self.buffers_accepted.load(Ordering::Relaxed),
            buffers_rejected: self.buffers_rejected.load(Ordering::Relaxed),
            spans_emitted: self.spans_emitted.load(Ordering::Relaxed),
            buffers_dropped: self.buffers_dropped.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.buffers_accepted.store(0, Ordering::Relaxed);
        self.buffers_rejected.store(0, Ordering::Relaxed);
        self.spans_emitted.store(0, Ordering::Relaxed);
        self.buffers_dropped.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub buffers_accepted: u64,
    pub buffers_rejected: u64,
    pub spans_emitted: u64,
    pub buffers_dropped: u64,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "accepted={} rejected={} spans={} dropped={}",
            self.buffers_accepted,
            self.buffers_rejected,
            self.spans_emitted,
            self.buffers_dropped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let m = Metrics::new();
        m.record_accept();
        m.record_accept();
        m.record_rejection();
        m.record_span();

        let s = m.snapshot();
        assert_eq!(s.buffers_accepted, 2);
        assert_eq!(s.buffers_rejected, 1);
        assert_eq!(s.spans_emitted, 1);
        assert_eq!(s.buffers_dropped, 0);

        m.reset();
        assert_eq!(m.snapshot().buffers_accepted, 0);
    }

    #[test]
    fn test_snapshot_display() {
        let m = Metrics::new();
        m.record_drop();
        assert_eq!(
            m.snapshot().to_string(),
            "accepted=0 rejected=0 spans=0 dropped=1"
        );
    }
}
