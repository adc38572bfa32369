use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::debug;

use super::bridge::DebugBridge;
use crate::runtime::{
    ExecuteOptions, Runtime, RuntimeError, RuntimeEvent, RuntimeResult, RuntimeSchema,
};

/// Runtime decorator that drives its delegate through a debug session.
///
/// Each pass streams the delegate with the bridge's current breakpoints.
/// A breakpoint result is announced, the bridge is awaited, and the
/// delegate is re-driven with `resume = true`. Any other result ends the
/// session.
pub struct DebugRuntime {
    delegate: Box<dyn Runtime>,
    bridge: Arc<DebugBridge>,
}

impl DebugRuntime {
    pub fn new(delegate: Box<dyn Runtime>, bridge: Arc<DebugBridge>) -> Self {
        Self { delegate, bridge }
    }

    async fn drive(
        &self,
        mut input: Option<Value>,
        options: ExecuteOptions,
    ) -> Result<RuntimeResult, RuntimeError> {
        let mut resume = options.resume;
        loop {
            let pass = ExecuteOptions {
                resume,
                breakpoints: Some(self.bridge.get_breakpoints()),
            };
            let result = self.stream_pass(input.take(), pass).await?;

            let Some(breakpoint) = result.breakpoint.as_ref().filter(|_| result.is_breakpoint())
            else {
                return Ok(result);
            };

            self.bridge.emit_breakpoint_hit(breakpoint);
            self.bridge.wait_for_resume().await?;
            debug!(run_id = %self.bridge.run_id(), node = %breakpoint.node, "resuming from breakpoint");
            resume = true;
        }
    }

    async fn stream_pass(
        &self,
        input: Option<Value>,
        options: ExecuteOptions,
    ) -> Result<RuntimeResult, RuntimeError> {
        let mut events = self.delegate.stream(input, options);
        while let Some(event) = events.next().await {
            match event? {
                RuntimeEvent::State(state) => self.bridge.emit_state_update(&state),
                RuntimeEvent::Message(event) => self.bridge.emit_message(&event),
                RuntimeEvent::Result(result) => return Ok(result),
            }
        }
        Err(anyhow!("runtime stream ended without a result").into())
    }
}

#[async_trait]
impl Runtime for DebugRuntime {
    async fn get_schema(&self) -> Result<RuntimeSchema, RuntimeError> {
        self.delegate.get_schema().await
    }

    async fn execute(
        &self,
        input: Option<Value>,
        options: ExecuteOptions,
    ) -> Result<RuntimeResult, RuntimeError> {
        self.bridge.emit_execution_started();
        match self.drive(input, options).await {
            Ok(result) => {
                self.bridge.emit_execution_completed(&result);
                Ok(result)
            }
            Err(RuntimeError::DebugQuit) => Err(RuntimeError::DebugQuit),
            Err(err) => {
                self.bridge.emit_execution_error(&err.to_string());
                Err(err)
            }
        }
    }

    async fn dispose(&self) -> Result<(), RuntimeError> {
        self.delegate.dispose().await
    }
}
