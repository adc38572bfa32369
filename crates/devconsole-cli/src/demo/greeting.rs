use async_trait::async_trait;
use serde_json::{json, Value};

use devconsole_core::{ExecuteOptions, RunTelemetry, Runtime, RuntimeError, RuntimeResult, RuntimeSchema};

use super::{schema, GREETING};

/// Greets `input.name`.
pub struct GreetingRuntime {
    telemetry: RunTelemetry,
}

impl GreetingRuntime {
    pub fn new(telemetry: RunTelemetry) -> Self {
        Self { telemetry }
    }
}

#[async_trait]
impl Runtime for GreetingRuntime {
    async fn get_schema(&self) -> Result<RuntimeSchema, RuntimeError> {
        Ok(schema(
            GREETING,
            "function",
            json!({"name": {"type": "string"}}),
            json!({"greeting": {"type": "string"}}),
        ))
    }

    async fn execute(
        &self,
        input: Option<Value>,
        _options: ExecuteOptions,
    ) -> Result<RuntimeResult, RuntimeError> {
        let mut span = self.telemetry.span("greet");
        let name = input
            .as_ref()
            .and_then(|v| v.get("name"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("world");
        span.set_attribute("name", name);
        self.telemetry.info(format!("Greeting {name}"));
        span.finish();
        Ok(RuntimeResult::successful(
            json!({"greeting": format!("Hello, {name}!")}),
        ))
    }
}
