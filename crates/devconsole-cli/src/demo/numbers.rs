use async_trait::async_trait;
use serde_json::{json, Value};

use devconsole_core::{
    ErrorContract, ExecuteOptions, RunTelemetry, Runtime, RuntimeError, RuntimeResult,
    RuntimeSchema,
};

use super::{schema, NUMBERS};

/// Summary statistics over `input.numbers`.
pub struct NumbersRuntime {
    telemetry: RunTelemetry,
}

impl NumbersRuntime {
    pub fn new(telemetry: RunTelemetry) -> Self {
        Self { telemetry }
    }
}

fn numbers(input: Option<&Value>) -> Option<Vec<f64>> {
    input?
        .get("numbers")?
        .as_array()?
        .iter()
        .map(Value::as_f64)
        .collect()
}

#[async_trait]
impl Runtime for NumbersRuntime {
    async fn get_schema(&self) -> Result<RuntimeSchema, RuntimeError> {
        Ok(schema(
            NUMBERS,
            "function",
            json!({"numbers": {"type": "array", "items": {"type": "number"}}}),
            json!({
                "count": {"type": "integer"},
                "sum": {"type": "number"},
                "mean": {"type": "number"},
                "min": {"type": "number"},
                "max": {"type": "number"}
            }),
        ))
    }

    async fn execute(
        &self,
        input: Option<Value>,
        _options: ExecuteOptions,
    ) -> Result<RuntimeResult, RuntimeError> {
        let Some(values) = numbers(input.as_ref()).filter(|v| !v.is_empty()) else {
            return Ok(RuntimeResult::faulted(ErrorContract::new(
                "InvalidInput",
                "expected a non-empty numeric array in 'numbers'",
                format!("input: {}", input.unwrap_or(Value::Null)),
            )));
        };

        let span = self.telemetry.span("analyze");
        let sum: f64 = values.iter().sum();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = sum / values.len() as f64;
        self.telemetry
            .debug(format!("Analyzed {} numbers", values.len()));
        span.finish();

        Ok(RuntimeResult::successful(json!({
            "count": values.len(),
            "sum": sum,
            "mean": mean,
            "min": min,
            "max": max,
        })))
    }
}
