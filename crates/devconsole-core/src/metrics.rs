//! Global atomic counters for devconsole observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a CLI command).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters.
pub struct Metrics {
    runs_executed: AtomicU64,
    runs_failed: AtomicU64,
    logs_routed: AtomicU64,
    traces_upserted: AtomicU64,
    breakpoints_hit: AtomicU64,
    evaluations_executed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_executed: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            logs_routed: AtomicU64::new(0),
            traces_upserted: AtomicU64::new(0),
            breakpoints_hit: AtomicU64::new(0),
            evaluations_executed: AtomicU64::new(0),
        }
    }

    pub fn inc_runs_executed(&self) {
        self.runs_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_executed", "counter incremented");
    }

    pub fn inc_runs_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_failed", "counter incremented");
    }

    pub fn inc_logs_routed(&self) {
        self.logs_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_traces_upserted(&self) {
        self.traces_upserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_breakpoints_hit(&self) {
        self.breakpoints_hit.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "breakpoints_hit", "counter incremented");
    }

    /// Add the number of evaluation cases an eval run produced.
    pub fn add_evaluations(&self, count: u64) {
        self.evaluations_executed.fetch_add(count, Ordering::Relaxed);
        tracing::trace!(metric = "evaluations_executed", count, "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            runs_executed = self.runs_executed(),
            runs_failed = self.runs_failed(),
            logs_routed = self.logs_routed(),
            traces_upserted = self.traces_upserted(),
            breakpoints_hit = self.breakpoints_hit(),
            evaluations_executed = self.evaluations_executed(),
        );
    }

    pub fn runs_executed(&self) -> u64 {
        self.runs_executed.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn logs_routed(&self) -> u64 {
        self.logs_routed.load(Ordering::Relaxed)
    }

    pub fn traces_upserted(&self) -> u64 {
        self.traces_upserted.load(Ordering::Relaxed)
    }

    pub fn breakpoints_hit(&self) -> u64 {
        self.breakpoints_hit.load(Ordering::Relaxed)
    }

    pub fn evaluations_executed(&self) -> u64 {
        self.evaluations_executed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.runs_executed.store(0, Ordering::Relaxed);
        self.runs_failed.store(0, Ordering::Relaxed);
        self.logs_routed.store(0, Ordering::Relaxed);
        self.traces_upserted.store(0, Ordering::Relaxed);
        self.breakpoints_hit.store(0, Ordering::Relaxed);
        self.evaluations_executed.store(0, Ordering::Relaxed);
    }
}
