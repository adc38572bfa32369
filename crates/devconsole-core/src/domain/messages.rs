//! Value records streamed out of a run: log lines, trace spans and chat
//! message snapshots.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::chat::{ConversationEvent, ConversationMessage};

/// Severity of a log line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a log line: plain text or a pre-rendered traceback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum LogContent {
    Text(String),
    Traceback { title: String, detail: String },
}

impl fmt::Display for LogContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogContent::Text(text) => f.write_str(text),
            LogContent::Traceback { title, detail } if detail.is_empty() => f.write_str(title),
            LogContent::Traceback { title, detail } => write!(f, "{title}\n{detail}"),
        }
    }
}

impl From<String> for LogContent {
    fn from(value: String) -> Self {
        LogContent::Text(value)
    }
}

impl From<&str> for LogContent {
    fn from(value: &str) -> Self {
        LogContent::Text(value.to_string())
    }
}

/// A single log line attributed to a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogMessage {
    pub run_id: String,
    pub level: LogLevel,
    pub message: LogContent,
    pub timestamp: DateTime<Utc>,
}

impl LogMessage {
    pub fn new(run_id: impl Into<String>, level: LogLevel, message: impl Into<LogContent>) -> Self {
        Self {
            run_id: run_id.into(),
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Error-level line carrying a rendered traceback.
    pub fn traceback(
        run_id: impl Into<String>,
        title: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(
            run_id,
            LogLevel::Error,
            LogContent::Traceback {
                title: title.into(),
                detail: detail.into(),
            },
        )
    }
}

/// Lifecycle status of a span.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Started,
    Running,
    Completed,
    Failed,
    Error,
}

impl SpanStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            SpanStatus::Completed | SpanStatus::Failed | SpanStatus::Error
        )
    }
}

/// One observation of a span. Later observations with the same `span_id`
/// replace earlier ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceMessage {
    pub run_id: String,
    pub trace_id: String,
    pub span_id: String,
    /// `None` marks a root span.
    pub parent_span_id: Option<String>,
    pub span_name: String,
    pub status: SpanStatus,
    pub timestamp: DateTime<Utc>,
    /// Set once the span has ended.
    pub duration_ms: Option<f64>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl TraceMessage {
    pub fn new(
        run_id: impl Into<String>,
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        span_name: impl Into<String>,
        status: SpanStatus,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_span_id: None,
            span_name: span_name.into(),
            status,
            timestamp: Utc::now(),
            duration_ms: None,
            attributes: Map::new(),
        }
    }

    pub fn with_parent(mut self, parent_span_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(parent_span_id.into());
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }
}

/// Chat notification: the wire event that triggered it (if any) and the
/// aggregated message after applying it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub event: Option<ConversationEvent>,
    pub message: ConversationMessage,
    pub run_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_serializes_uppercase() {
        assert_eq!(serde_json::to_value(LogLevel::Warn).unwrap(), "WARN");
        assert!(LogLevel::Critical > LogLevel::Error);
    }

    #[test]
    fn traceback_content_renders_title_and_detail() {
        let log = LogMessage::traceback("r1", "ValueError: bad", "at line 3");
        assert_eq!(log.level, LogLevel::Error);
        assert_eq!(log.message.to_string(), "ValueError: bad\nat line 3");
    }

    #[test]
    fn text_content_serializes_as_plain_string() {
        let log = LogMessage::new("r1", LogLevel::Info, "hello");
        let raw = serde_json::to_value(&log).unwrap();
        assert_eq!(raw["message"], "hello");
        assert_eq!(raw["level"], "INFO");
    }

    #[test]
    fn trace_parent_marks_root() {
        let root = TraceMessage::new("r", "t", "s1", "root", SpanStatus::Started);
        let child = TraceMessage::new("r", "t", "s2", "child", SpanStatus::Started).with_parent("s1");
        assert!(root.is_root());
        assert!(!child.is_root());
        assert_eq!(serde_json::to_value(SpanStatus::Completed).unwrap(), "completed");
    }
}
