//! Process-wide counters, embedded directly in `AppState` rather than
//! reaching for an external metrics exporter.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    pub segments_finalized: AtomicU64,
    pub viewers_attached: AtomicU64,
    pub viewers_dropped: AtomicU64,
    pub horizon_extensions_attempted: AtomicU64,
    pub horizon_extensions_succeeded: AtomicU64,
    pub boundary_swaps: AtomicU64,
    pub channel_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_segment_finalized(&self) {
        self.segments_finalized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_viewer_attached(&self) {
        self.viewers_attached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_viewer_dropped(&self) {
        self.viewers_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_horizon_extension(&self, success: bool) {
        self.horizon_extensions_attempted.fetch_add(1, Ordering::Relaxed);
        if success {
            self.horizon_extensions_succeeded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_boundary_swap(&self) {
        self.boundary_swaps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_channel_failure(&self) {
        self.channel_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            segments_finalized: self.segments_finalized.load(Ordering::Relaxed),
            viewers_attached: self.viewers_attached.load(Ordering::Relaxed),
            viewers_dropped: self.viewers_dropped.load(Ordering::Relaxed),
            horizon_extensions_attempted: self.horizon_extensions_attempted.load(Ordering::Relaxed),
            horizon_extensions_succeeded: self.horizon_extensions_succeeded.load(Ordering::Relaxed),
            boundary_swaps: self.boundary_swaps.load(Ordering::Relaxed),
            channel_failures: self.channel_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    pub segments_finalized: u64,
    pub viewers_attached: u64,
    pub viewers_dropped: u64,
    pub horizon_extensions_attempted: u64,
    pub horizon_extensions_succeeded: u64,
    pub boundary_swaps: u64,
    pub channel_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_accumulate() {
        let m = Metrics::new();
        m.record_segment_finalized();
        m.record_horizon_extension(true);
        m.record_horizon_extension(false);
        let snap = m.snapshot();
        assert_eq!(snap.segments_finalized, 1);
        assert_eq!(snap.horizon_extensions_attempted, 2);
        assert_eq!(snap.horizon_extensions_succeeded, 1);
    }
}
