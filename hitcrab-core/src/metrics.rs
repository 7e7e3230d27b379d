//! Pipeline counters shared between the driver and the workers.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    events_ingested: AtomicU64,
    late_dropped: AtomicU64,
    decode_errors: AtomicU64,
    windows_emitted: AtomicU64,
    emit_failures: AtomicU64,
    checkpoints_completed: AtomicU64,
    checkpoints_aborted: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_ingested: u64,
    pub late_dropped: u64,
    pub decode_errors: u64,
    pub windows_emitted: u64,
    pub emit_failures: u64,
    pub checkpoints_completed: u64,
    pub checkpoints_aborted: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ingested(&self) {
        self.events_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late_dropped(&self) {
        self.late_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emitted(&self) {
        self.windows_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emit_failure(&self) {
        self.emit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkpoint_completed(&self) {
        self.checkpoints_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkpoint_aborted(&self) {
        self.checkpoints_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_ingested: self.events_ingested.load(Ordering::Relaxed),
            late_dropped: self.late_dropped.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            windows_emitted: self.windows_emitted.load(Ordering::Relaxed),
            emit_failures: self.emit_failures.load(Ordering::Relaxed),
            checkpoints_completed: self.checkpoints_completed.load(Ordering::Relaxed),
            checkpoints_aborted: self.checkpoints_aborted.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ingested={} late_dropped={} decode_errors={} emitted={} emit_failures={} \
             checkpoints_completed={} checkpoints_aborted={}",
            self.events_ingested,
            self.late_dropped,
            self.decode_errors,
            self.windows_emitted,
            self.emit_failures,
            self.checkpoints_completed,
            self.checkpoints_aborted
        )
    }
}
