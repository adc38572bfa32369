//! Domain models for devconsole.
//!
//! - `ExecutionRun`: one execution of an entrypoint
//! - `EvalRun`: one execution of an eval set
//! - `LogMessage` / `TraceMessage` / `ChatMessage`: records streamed out of a run
//! - `ChatEvents`: folds conversation wire events into messages

pub mod chat;
pub mod error;
pub mod eval_run;
pub mod execution;
pub mod messages;
pub mod trace_tree;

pub use chat::{
    user_message, user_message_event, ChatEvents, ContentPart, ConversationEvent,
    ConversationMessage, MessageEvent, ToolCall,
};
pub use error::{error_chain, ErrorContract, EvalRunError, RunServiceError};
pub use eval_run::{EvalRun, EvalRunStatus, EvaluationResult, EvaluatorResult};
pub use execution::{ExecutionMode, ExecutionRun, RunStatus};
pub use messages::{ChatMessage, LogContent, LogLevel, LogMessage, SpanStatus, TraceMessage};
pub use trace_tree::{SpanNode, SpanTree};
