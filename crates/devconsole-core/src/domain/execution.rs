//! Execution runs: one submission of input to an entrypoint, tracked from
//! pending to a terminal state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::chat::{ChatEvents, ConversationEvent, ConversationMessage};
use super::error::ErrorContract;
use super::messages::{LogMessage, TraceMessage};
use crate::runtime::BreakpointResult;

/// How a run drives its runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionMode {
    #[default]
    Run,
    Debug,
    Chat,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Run => "run",
            ExecutionMode::Debug => "debug",
            ExecutionMode::Chat => "chat",
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "run" => Ok(ExecutionMode::Run),
            "debug" => Ok(ExecutionMode::Debug),
            "chat" => Ok(ExecutionMode::Chat),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

/// Status of an execution run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Suspended => "suspended",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled runs only change on an explicit
    /// re-execute.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Mutable record of one execution lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRun {
    pub id: String,
    pub entrypoint: String,
    pub input_data: Value,
    pub mode: ExecutionMode,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub output_data: Option<Value>,
    pub error: Option<ErrorContract>,
    /// Input for the next resume of a suspended run. Passed through as-is.
    pub resume_data: Option<Value>,
    pub logs: Vec<LogMessage>,
    pub traces: Vec<TraceMessage>,
    /// Aggregated chat messages in arrival order.
    pub messages: Vec<ConversationMessage>,
    /// Where a debug session is currently paused.
    pub breakpoint: Option<BreakpointResult>,
    pub conversation_id: String,
    #[serde(skip)]
    chat: ChatEvents,
}

impl ExecutionRun {
    pub fn new(entrypoint: impl Into<String>, input_data: Value, mode: ExecutionMode) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            entrypoint: entrypoint.into(),
            input_data,
            mode,
            status: RunStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            output_data: None,
            error: None,
            resume_data: None,
            logs: Vec::new(),
            traces: Vec::new(),
            messages: Vec::new(),
            breakpoint: None,
            conversation_id: Uuid::new_v4().to_string(),
            chat: ChatEvents::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Insert or replace the trace with the same `span_id`. Returns `true`
    /// when an existing entry was replaced.
    pub fn upsert_trace(&mut self, trace: TraceMessage) -> bool {
        match self.traces.iter_mut().find(|t| t.span_id == trace.span_id) {
            Some(existing) => {
                *existing = trace;
                true
            }
            None => {
                self.traces.push(trace);
                false
            }
        }
    }

    /// Fold a conversation event into `messages`; returns the updated
    /// message when the event carried one.
    pub fn add_event(&mut self, event: &ConversationEvent) -> Option<ConversationMessage> {
        let message = self.chat.add(event)?;
        match self
            .messages
            .iter_mut()
            .find(|m| m.message_id == message.message_id)
        {
            Some(existing) => *existing = message.clone(),
            None => self.messages.push(message.clone()),
        }
        Some(message)
    }

    /// Elapsed time; measured against now while the run has no end time.
    pub fn duration(&self) -> Duration {
        self.end_time.unwrap_or_else(Utc::now) - self.start_time
    }
}
