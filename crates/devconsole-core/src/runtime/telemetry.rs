//! Per-run telemetry hook.
//!
//! A [`RunTelemetry`] is handed to every runtime through its
//! [`RuntimeContext`](super::RuntimeContext). Log lines and spans emitted
//! through it are attributed to the owning run and delivered to a
//! [`TelemetrySink`] (normally the run service), and log lines are mirrored
//! as `tracing` events tagged with `run_id`.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::{LogContent, LogLevel, LogMessage, SpanStatus, TraceMessage};

/// Receiver of run-scoped log lines and trace observations.
pub trait TelemetrySink: Send + Sync {
    fn log(&self, log: LogMessage);
    fn trace(&self, trace: TraceMessage);
}

struct DiscardSink;

impl TelemetrySink for DiscardSink {
    fn log(&self, _log: LogMessage) {}
    fn trace(&self, _trace: TraceMessage) {}
}

/// Cloneable handle scoped to one run ID and one trace ID.
#[derive(Clone)]
pub struct RunTelemetry {
    run_id: String,
    trace_id: String,
    sink: Arc<dyn TelemetrySink>,
}

impl std::fmt::Debug for RunTelemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunTelemetry")
            .field("run_id", &self.run_id)
            .field("trace_id", &self.trace_id)
            .finish_non_exhaustive()
    }
}

impl RunTelemetry {
    pub fn new(run_id: impl Into<String>, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            run_id: run_id.into(),
            trace_id: Uuid::new_v4().simple().to_string(),
            sink,
        }
    }

    /// Telemetry that only mirrors to `tracing`.
    pub fn detached(run_id: impl Into<String>) -> Self {
        Self::new(run_id, Arc::new(DiscardSink))
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn log(&self, level: LogLevel, message: impl Into<LogContent>) {
        let log = LogMessage::new(self.run_id.clone(), level, message);
        match level {
            LogLevel::Debug => tracing::debug!(run_id = %self.run_id, "{}", log.message),
            LogLevel::Info => tracing::info!(run_id = %self.run_id, "{}", log.message),
            LogLevel::Warn => tracing::warn!(run_id = %self.run_id, "{}", log.message),
            LogLevel::Error | LogLevel::Critical => {
                tracing::error!(run_id = %self.run_id, "{}", log.message)
            }
        }
        self.sink.log(log);
    }

    pub fn debug(&self, message: impl Into<LogContent>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<LogContent>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<LogContent>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<LogContent>) {
        self.log(LogLevel::Error, message);
    }

    /// Open a root span.
    pub fn span(&self, name: impl Into<String>) -> SpanHandle {
        SpanHandle::start(self.clone(), name.into(), None)
    }
}

/// An open span. Emits a `started` observation on creation and a finished
/// one (with `duration_ms`) when ended. Dropping an open span completes it.
pub struct SpanHandle {
    telemetry: RunTelemetry,
    span_id: String,
    parent_span_id: Option<String>,
    name: String,
    started_at: DateTime<Utc>,
    started: Instant,
    attributes: Map<String, Value>,
    ended: bool,
}

impl SpanHandle {
    fn start(telemetry: RunTelemetry, name: String, parent_span_id: Option<String>) -> Self {
        let span = Self {
            telemetry,
            span_id: Uuid::new_v4().simple().to_string()[..16].to_string(),
            parent_span_id,
            name,
            started_at: Utc::now(),
            started: Instant::now(),
            attributes: Map::new(),
            ended: false,
        };
        span.emit(SpanStatus::Started, None);
        span
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn child(&self, name: impl Into<String>) -> SpanHandle {
        SpanHandle::start(
            self.telemetry.clone(),
            name.into(),
            Some(self.span_id.clone()),
        )
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn finish(mut self) {
        self.end(SpanStatus::Completed);
    }

    pub fn fail(mut self, error: impl Into<String>) {
        self.attributes
            .insert("error".to_string(), Value::String(error.into()));
        self.end(SpanStatus::Failed);
    }

    fn end(&mut self, status: SpanStatus) {
        if self.ended {
            return;
        }
        self.ended = true;
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        self.emit(status, Some(elapsed_ms));
    }

    fn emit(&self, status: SpanStatus, duration_ms: Option<f64>) {
        self.telemetry.sink.trace(TraceMessage {
            run_id: self.telemetry.run_id.clone(),
            trace_id: self.telemetry.trace_id.clone(),
            span_id: self.span_id.clone(),
            parent_span_id: self.parent_span_id.clone(),
            span_name: self.name.clone(),
            status,
            timestamp: self.started_at,
            duration_ms,
            attributes: self.attributes.clone(),
        });
    }
}

impl Drop for SpanHandle {
    fn drop(&mut self) {
        self.end(SpanStatus::Completed);
    }
}
