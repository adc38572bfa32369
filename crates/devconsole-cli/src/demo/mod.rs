//! Built-in runtimes served by the `devconsole` binary.

mod evaluation;
mod greeting;
mod numbers;
mod stepper;
mod support;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde_json::{json, Value};

use devconsole_core::{
    Runtime, RuntimeContext, RuntimeError, RuntimeEvent, RuntimeFactory, RuntimeResult,
    RuntimeSchema,
};

pub use evaluation::DemoEvaluator;
pub use greeting::GreetingRuntime;
pub use numbers::NumbersRuntime;
pub use stepper::StepperRuntime;
pub use support::SupportChatRuntime;

pub const GREETING: &str = "greeting";
pub const NUMBERS: &str = "numbers";
pub const SUPPORT: &str = "support";
pub const STEPPER: &str = "stepper";

/// Factory for the demo entrypoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct DemoFactory;

#[async_trait]
impl RuntimeFactory for DemoFactory {
    fn discover_entrypoints(&self) -> Vec<String> {
        [GREETING, NUMBERS, SUPPORT, STEPPER]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    async fn new_runtime(
        &self,
        entrypoint: &str,
        context: RuntimeContext,
    ) -> Result<Box<dyn Runtime>, RuntimeError> {
        let telemetry = context.telemetry;
        match entrypoint {
            GREETING => Ok(Box::new(GreetingRuntime::new(telemetry))),
            NUMBERS => Ok(Box::new(NumbersRuntime::new(telemetry))),
            SUPPORT => Ok(Box::new(SupportChatRuntime::new(telemetry))),
            STEPPER => Ok(Box::new(StepperRuntime::new(telemetry))),
            other => Err(RuntimeError::EntrypointNotFound(other.to_string())),
        }
    }
}

fn object_schema(properties: Value) -> Value {
    json!({"type": "object", "properties": properties})
}

fn schema(entrypoint: &str, kind: &str, input: Value, output: Value) -> RuntimeSchema {
    RuntimeSchema {
        file_path: format!("demo/{entrypoint}"),
        unique_id: format!("demo-{entrypoint}"),
        kind: kind.to_string(),
        input: object_schema(input),
        output: object_schema(output),
        graph: None,
    }
}

/// Drain a runtime stream down to its terminal result.
async fn last_result(
    mut events: BoxStream<'_, Result<RuntimeEvent, RuntimeError>>,
) -> Result<RuntimeResult, RuntimeError> {
    while let Some(event) = events.next().await {
        if let RuntimeEvent::Result(result) = event? {
            return Ok(result);
        }
    }
    Err(anyhow!("runtime stream ended without a result").into())
}
