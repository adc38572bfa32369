//! Structured observability hooks for run and eval lifecycle events.
//!
//! Events are emitted at `info!` level with an `event` field so they can be
//! filtered and aggregated; JSON output is enabled through
//! [`crate::telemetry::init_tracing`].

use std::future::Future;

use tracing::instrument::Instrumented;
use tracing::{info, warn, Instrument};

/// Span carrying `run_id` for every event emitted while a run executes.
///
/// ```ignore
/// RunSpan::new("run", &run_id).instrument(async { /* ... */ }).await;
/// ```
pub struct RunSpan {
    span: tracing::Span,
}

impl RunSpan {
    /// `kind` is `run` for execution runs and `eval` for eval runs.
    pub fn new(kind: &'static str, run_id: &str) -> Self {
        Self {
            span: tracing::info_span!("devconsole.run", kind, run_id = %run_id),
        }
    }

    /// Run `future` inside the span.
    pub fn instrument<F: Future>(self, future: F) -> Instrumented<F> {
        future.instrument(self.span)
    }

    /// Enter the span for synchronous work.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        self.span.in_scope(f)
    }
}

pub fn emit_run_started(run_id: &str, entrypoint: &str, mode: &str, resume: bool) {
    info!(event = "run.started", run_id = %run_id, entrypoint = %entrypoint, mode = %mode, resume);
}

pub fn emit_run_finished(run_id: &str, status: &str, duration_ms: i64) {
    info!(event = "run.finished", run_id = %run_id, status = %status, duration_ms);
}

pub fn emit_run_suspended(run_id: &str) {
    info!(event = "run.suspended", run_id = %run_id);
}

pub fn emit_breakpoint_hit(run_id: &str, node: &str) {
    info!(event = "debug.breakpoint_hit", run_id = %run_id, node = %node);
}

pub fn emit_eval_started(run_id: &str, eval_set: &str, entrypoint: &str, workers: usize) {
    info!(
        event = "eval.started",
        run_id = %run_id,
        eval_set = %eval_set,
        entrypoint = %entrypoint,
        workers,
    );
}

pub fn emit_eval_finished(run_id: &str, overall_score: f64, evaluations: usize, success: bool) {
    info!(
        event = "eval.finished",
        run_id = %run_id,
        overall_score,
        evaluations,
        success,
    );
}

/// Runtime disposal failed (warn level; never fails the run).
pub fn emit_dispose_error(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.dispose_error", run_id = %run_id, error = %error);
}
