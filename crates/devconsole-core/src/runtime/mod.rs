//! Runtime protocol: the fixed surface through which devconsole drives
//! externally defined agents and scripts.
//!
//! - [`Runtime`]: `get_schema`, `execute`, `stream`, `dispose`
//! - [`RuntimeFactory`]: maps entrypoint strings to fresh runtime instances
//! - [`RunTelemetry`]: per-run hook for log lines and trace spans

pub mod error;
pub mod protocol;
pub mod telemetry;

pub use error::{panic_message, RuntimeError};
pub use protocol::{
    BreakpointKind, BreakpointResult, Breakpoints, ExecuteOptions, GraphEdge, GraphNode,
    Runtime, RuntimeContext, RuntimeEvent, RuntimeFactory, RuntimeGraph, RuntimeResult,
    RuntimeSchema, RuntimeStatus, StateEvent,
};
pub use telemetry::{RunTelemetry, SpanHandle, TelemetrySink};
