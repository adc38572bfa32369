//! Four-node fulfilment graph used to exercise debug sessions.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use devconsole_core::runtime::{BreakpointKind, GraphEdge, GraphNode, RuntimeGraph};
use devconsole_core::{
    BreakpointResult, ExecuteOptions, RunTelemetry, Runtime, RuntimeError, RuntimeEvent,
    RuntimeResult, RuntimeSchema, StateEvent,
};

use super::{last_result, schema, STEPPER};

pub const NODES: [&str; 4] = ["fetch", "plan", "act", "report"];

#[derive(Default)]
struct Progress {
    position: usize,
    state: Value,
}

pub struct StepperRuntime {
    telemetry: RunTelemetry,
    progress: Mutex<Progress>,
}

impl StepperRuntime {
    pub fn new(telemetry: RunTelemetry) -> Self {
        Self {
            telemetry,
            progress: Mutex::new(Progress::default()),
        }
    }

    fn graph() -> RuntimeGraph {
        RuntimeGraph {
            nodes: NODES
                .iter()
                .map(|n| GraphNode {
                    id: n.to_string(),
                    name: n.to_string(),
                    kind: "node".into(),
                })
                .collect(),
            edges: NODES
                .windows(2)
                .map(|w| GraphEdge {
                    source: w[0].to_string(),
                    target: w[1].to_string(),
                    label: None,
                })
                .collect(),
        }
    }

    /// Run nodes from the current position until a breakpoint or the end.
    async fn pass(
        &self,
        input: Option<Value>,
        options: ExecuteOptions,
    ) -> Vec<Result<RuntimeEvent, RuntimeError>> {
        let mut progress = self.progress.lock().await;
        if !options.resume {
            let order = input
                .as_ref()
                .and_then(|v| v.get("order"))
                .cloned()
                .unwrap_or_else(|| json!("demo-order"));
            *progress = Progress {
                position: 0,
                state: json!({"order": order}),
            };
        }

        let mut events = Vec::new();
        let mut skip_pause = options.resume;
        while let Some(&node) = NODES.get(progress.position) {
            let pause = options
                .breakpoints
                .as_ref()
                .is_some_and(|bps| bps.matches(node));
            if pause && !skip_pause {
                events.push(Ok(RuntimeEvent::Result(RuntimeResult::at_breakpoint(
                    BreakpointResult {
                        node: node.to_string(),
                        kind: BreakpointKind::Before,
                        state: progress.state.clone(),
                        next_nodes: NODES[progress.position + 1..]
                            .iter()
                            .map(|n| n.to_string())
                            .collect(),
                    },
                ))));
                return events;
            }
            skip_pause = false;

            let span = self.telemetry.span(node);
            apply(node, &mut progress.state);
            span.finish();
            self.telemetry.debug(format!("Node '{node}' finished"));
            events.push(Ok(RuntimeEvent::State(StateEvent {
                node_name: node.to_string(),
                payload: progress.state.clone(),
            })));
            progress.position += 1;
        }

        events.push(Ok(RuntimeEvent::Result(RuntimeResult::successful(
            progress.state.clone(),
        ))));
        events
    }
}

fn apply(node: &str, state: &mut Value) {
    match node {
        "fetch" => state["items"] = json!(["mug", "lamp", "rug"]),
        "plan" => state["steps"] = json!(["pack", "ship"]),
        "act" => state["completed"] = state["steps"].clone(),
        "report" => {
            let items = state["items"].as_array().map_or(0, Vec::len);
            let steps = state["completed"].as_array().map_or(0, Vec::len);
            state["summary"] = json!(format!("Processed {items} items in {steps} steps"));
        }
        _ => {}
    }
}

#[async_trait]
impl Runtime for StepperRuntime {
    async fn get_schema(&self) -> Result<RuntimeSchema, RuntimeError> {
        let mut schema = schema(
            STEPPER,
            "graph",
            json!({"order": {"type": "string"}}),
            json!({"summary": {"type": "string"}}),
        );
        schema.graph = Some(Self::graph());
        Ok(schema)
    }

    async fn execute(
        &self,
        input: Option<Value>,
        options: ExecuteOptions,
    ) -> Result<RuntimeResult, RuntimeError> {
        last_result(self.stream(input, options)).await
    }

    fn stream<'a>(
        &'a self,
        input: Option<Value>,
        options: ExecuteOptions,
    ) -> BoxStream<'a, Result<RuntimeEvent, RuntimeError>> {
        stream::once(self.pass(input, options))
            .flat_map(stream::iter)
            .boxed()
    }
}
