//! Runtime protocol types and traits.

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::RuntimeError;
use super::telemetry::RunTelemetry;
use crate::domain::{ConversationEvent, ErrorContract};

/// Node of a runtime's execution graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl RuntimeGraph {
    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }
}

/// Self-description of an entrypoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSchema {
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(rename = "uniqueId")]
    pub unique_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// JSON schema of the accepted input.
    #[serde(default)]
    pub input: Value,
    /// JSON schema of the produced output.
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<RuntimeGraph>,
}

/// Which nodes pause a debug session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Breakpoints {
    /// Pause before every node (`*`).
    #[default]
    All,
    /// Pause only before the named nodes. Empty means run to completion.
    Nodes(Vec<String>),
}

impl Breakpoints {
    /// No breakpoints at all.
    pub fn none() -> Self {
        Breakpoints::Nodes(Vec::new())
    }

    /// Parse `*` or a comma separated list of node names.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if spec == "*" {
            return Breakpoints::All;
        }
        Breakpoints::Nodes(
            spec.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn matches(&self, node: &str) -> bool {
        match self {
            Breakpoints::All => true,
            Breakpoints::Nodes(nodes) => nodes.iter().any(|n| n == node),
        }
    }
}

/// Options for a single `execute` or `stream` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteOptions {
    /// Continue a previously suspended execution; the input is resume data.
    pub resume: bool,
    /// Set only when a debugger is attached.
    pub breakpoints: Option<Breakpoints>,
}

impl ExecuteOptions {
    pub fn resume() -> Self {
        Self {
            resume: true,
            breakpoints: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    Successful,
    Suspended,
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakpointKind {
    Before,
    After,
}

/// Where a debug session paused and what it can resume from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointResult {
    pub node: String,
    pub kind: BreakpointKind,
    /// Resumable state at the pause point.
    #[serde(default)]
    pub state: Value,
    #[serde(default)]
    pub next_nodes: Vec<String>,
}

/// Terminal outcome of one `execute` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeResult {
    #[serde(default)]
    pub output: Option<Value>,
    pub status: RuntimeStatus,
    /// With `Suspended`, the runtime can be resumed with new input.
    #[serde(default)]
    pub resume: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakpoint: Option<BreakpointResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorContract>,
}

impl RuntimeResult {
    pub fn successful(output: Value) -> Self {
        Self {
            output: Some(output),
            status: RuntimeStatus::Successful,
            resume: false,
            breakpoint: None,
            error: None,
        }
    }

    /// Suspended waiting for resume data (human input, an external event).
    pub fn suspended(output: Option<Value>) -> Self {
        Self {
            output,
            status: RuntimeStatus::Suspended,
            resume: true,
            breakpoint: None,
            error: None,
        }
    }

    /// Paused at a debugger breakpoint.
    pub fn at_breakpoint(breakpoint: BreakpointResult) -> Self {
        Self {
            output: None,
            status: RuntimeStatus::Suspended,
            resume: false,
            breakpoint: Some(breakpoint),
            error: None,
        }
    }

    pub fn faulted(error: ErrorContract) -> Self {
        Self {
            output: None,
            status: RuntimeStatus::Faulted,
            resume: false,
            breakpoint: None,
            error: Some(error),
        }
    }

    pub fn is_breakpoint(&self) -> bool {
        self.status == RuntimeStatus::Suspended && self.breakpoint.is_some()
    }
}

/// Named checkpoint reported while a runtime streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEvent {
    pub node_name: String,
    #[serde(default)]
    pub payload: Value,
}

/// Item of a runtime stream. A well-formed stream ends with `Result`.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    Message(ConversationEvent),
    State(StateEvent),
    Result(RuntimeResult),
}

/// An executable entrypoint instance.
///
/// `dispose` is called exactly once per instance by its owner.
#[async_trait]
pub trait Runtime: Send + Sync {
    async fn get_schema(&self) -> Result<RuntimeSchema, RuntimeError>;

    async fn execute(
        &self,
        input: Option<Value>,
        options: ExecuteOptions,
    ) -> Result<RuntimeResult, RuntimeError>;

    /// Lazy, finite event stream ending with the result. Runtimes without
    /// incremental output get a single-item stream around `execute`.
    fn stream<'a>(
        &'a self,
        input: Option<Value>,
        options: ExecuteOptions,
    ) -> BoxStream<'a, Result<RuntimeEvent, RuntimeError>> {
        Box::pin(stream::once(async move {
            self.execute(input, options).await.map(RuntimeEvent::Result)
        }))
    }

    async fn dispose(&self) -> Result<(), RuntimeError> {
        Ok(())
    }
}

/// Per-instance context handed to the factory.
#[derive(Clone)]
pub struct RuntimeContext {
    pub runtime_id: String,
    pub telemetry: RunTelemetry,
}

impl RuntimeContext {
    pub fn new(runtime_id: impl Into<String>, telemetry: RunTelemetry) -> Self {
        Self {
            runtime_id: runtime_id.into(),
            telemetry,
        }
    }
}

/// Creates runtime instances for entrypoints.
#[async_trait]
pub trait RuntimeFactory: Send + Sync {
    fn discover_entrypoints(&self) -> Vec<String>;

    async fn new_runtime(
        &self,
        entrypoint: &str,
        context: RuntimeContext,
    ) -> Result<Box<dyn Runtime>, RuntimeError>;

    /// Release factory-wide resources. Called once an eval run finishes,
    /// whatever its outcome.
    async fn dispose(&self) -> Result<(), RuntimeError> {
        Ok(())
    }
}
