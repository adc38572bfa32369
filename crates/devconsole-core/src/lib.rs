//! devconsole core library
//!
//! Run and eval orchestration for driving externally defined runtimes:
//! the run/eval state machines, the runtime protocol, the debug-resume
//! protocol, and the observer surface used by front ends.

pub mod debug;
pub mod domain;
pub mod metrics;
pub mod obs;
pub mod reporting;
pub mod runtime;
pub mod services;
mod sync;
pub mod telemetry;

pub use domain::{
    ChatMessage, ConversationEvent, ConversationMessage, ErrorContract, EvalRun, EvalRunError,
    EvalRunStatus, EvaluationResult, EvaluatorResult, ExecutionMode, ExecutionRun, LogLevel,
    LogMessage, RunServiceError, RunStatus, SpanStatus, SpanTree, TraceMessage,
};

pub use runtime::{
    BreakpointResult, Breakpoints, ExecuteOptions, RunTelemetry, Runtime, RuntimeContext,
    RuntimeError, RuntimeEvent, RuntimeFactory, RuntimeResult, RuntimeSchema, RuntimeStatus,
    StateEvent,
};

pub use debug::{DebugBridge, DebugError, DebugEvent, DebugObserver, DebugRuntime};

pub use services::{
    ChannelObserver, EvalContext, EvalEntrypoint, EvalEventBus, EvalOutcome, EvalProgress,
    EvalRunService, NoopObserver, ProgressReporter, ReportingConfig, RunObserver, RunService,
    ServiceEvent,
};

pub use metrics::METRICS;
pub use obs::RunSpan;
pub use reporting::{render_eval_summary_md, write_eval_run_json};
pub use telemetry::init_tracing;
