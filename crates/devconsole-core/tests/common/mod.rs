//! Fake runtimes and a factory shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use serde_json::{json, Value};
use uuid::Uuid;

use devconsole_core::domain::chat::{
    ContentChunk, ContentPartEnd, ContentPartEvent, ContentPartStart, MessageEnd, MessageEvent,
    MessageStart,
};
use devconsole_core::runtime::BreakpointKind;
use devconsole_core::{
    BreakpointResult, ExecuteOptions, ExecutionRun, RunService, RunTelemetry, Runtime,
    RuntimeContext, RuntimeError, RuntimeEvent, RuntimeFactory, RuntimeResult, RuntimeSchema,
};

pub type Script =
    Arc<dyn Fn(Option<Value>, &ExecuteOptions) -> Result<RuntimeResult, RuntimeError> + Send + Sync>;

fn schema(name: &str) -> RuntimeSchema {
    RuntimeSchema {
        file_path: name.to_string(),
        unique_id: format!("{name}-id"),
        kind: "agent".to_string(),
        input: json!({"type": "object"}),
        output: json!({"type": "object"}),
        graph: None,
    }
}

/// Runs a closure per `execute` and logs through its telemetry.
pub struct ScriptedRuntime {
    script: Script,
    telemetry: RunTelemetry,
    disposed: Arc<AtomicUsize>,
}

#[async_trait]
impl Runtime for ScriptedRuntime {
    async fn get_schema(&self) -> Result<RuntimeSchema, RuntimeError> {
        Ok(schema("scripted"))
    }

    async fn execute(
        &self,
        input: Option<Value>,
        options: ExecuteOptions,
    ) -> Result<RuntimeResult, RuntimeError> {
        self.telemetry.info("script running");
        let span = self.telemetry.span("script");
        let result = (self.script)(input, &options);
        span.finish();
        result
    }

    async fn dispose(&self) -> Result<(), RuntimeError> {
        self.disposed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Interleaves log lines and spans with scheduler yields.
pub struct ChattyRuntime {
    telemetry: RunTelemetry,
}

impl ChattyRuntime {
    pub const STEPS: usize = 20;
}

#[async_trait]
impl Runtime for ChattyRuntime {
    async fn get_schema(&self) -> Result<RuntimeSchema, RuntimeError> {
        Ok(schema("chatty"))
    }

    async fn execute(
        &self,
        _input: Option<Value>,
        _options: ExecuteOptions,
    ) -> Result<RuntimeResult, RuntimeError> {
        for step in 0..Self::STEPS {
            let span = self.telemetry.span(format!("step {step}"));
            self.telemetry.info(format!("step {step}"));
            tokio::task::yield_now().await;
            span.finish();
        }
        Ok(RuntimeResult::successful(json!({"steps": Self::STEPS})))
    }
}

/// Walks `a -> b -> c`, pausing before any node the breakpoints match.
pub struct StepperRuntime {
    nodes: Vec<&'static str>,
    position: Mutex<usize>,
    visited: Mutex<Vec<String>>,
    disposed: Arc<AtomicUsize>,
}

impl StepperRuntime {
    pub const NODES: [&'static str; 3] = ["a", "b", "c"];
}

#[async_trait]
impl Runtime for StepperRuntime {
    async fn get_schema(&self) -> Result<RuntimeSchema, RuntimeError> {
        Ok(schema("stepper"))
    }

    async fn execute(
        &self,
        _input: Option<Value>,
        options: ExecuteOptions,
    ) -> Result<RuntimeResult, RuntimeError> {
        let mut position = self.position.lock().unwrap();
        if !options.resume {
            *position = 0;
            self.visited.lock().unwrap().clear();
        }
        let mut skip_pause = options.resume;
        while *position < self.nodes.len() {
            let node = self.nodes[*position];
            let pause = options
                .breakpoints
                .as_ref()
                .is_some_and(|bps| bps.matches(node));
            if pause && !skip_pause {
                return Ok(RuntimeResult::at_breakpoint(BreakpointResult {
                    node: node.to_string(),
                    kind: BreakpointKind::Before,
                    state: json!({"position": *position}),
                    next_nodes: self.nodes[*position + 1..]
                        .iter()
                        .map(|n| n.to_string())
                        .collect(),
                }));
            }
            skip_pause = false;
            self.visited.lock().unwrap().push(node.to_string());
            *position += 1;
        }
        Ok(RuntimeResult::successful(
            json!({"visited": *self.visited.lock().unwrap()}),
        ))
    }

    async fn dispose(&self) -> Result<(), RuntimeError> {
        self.disposed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Streams one assistant message per reply, each in two chunks.
pub struct ChatRuntime {
    conversation_id: String,
    message_prefix: String,
    replies: Vec<String>,
}

fn chat_events(conversation_id: &str, message_id: &str, reply: &str) -> Vec<RuntimeEvent> {
    let part = |start, chunk: Option<&str>, end| ContentPartEvent {
        content_part_id: format!("{message_id}-p"),
        start,
        chunk: chunk.map(|data| ContentChunk {
            data: data.to_string(),
        }),
        end,
    };
    let (head, tail) = reply.split_at(reply.len() / 2);
    let mut events = Vec::new();

    let mut start = MessageEvent::new(message_id);
    start.start = Some(MessageStart {
        role: Some("assistant".into()),
        timestamp: None,
    });
    start.content_part = Some(part(
        Some(ContentPartStart {
            mime_type: "text/plain".into(),
        }),
        Some(head),
        None,
    ));
    events.push(start);

    let mut chunk = MessageEvent::new(message_id);
    chunk.content_part = Some(part(None, Some(tail), Some(ContentPartEnd::default())));
    events.push(chunk);

    let mut end = MessageEvent::new(message_id);
    end.end = Some(MessageEnd {});
    events.push(end);

    events
        .into_iter()
        .map(|e| RuntimeEvent::Message(e.into_conversation_event(conversation_id)))
        .collect()
}

#[async_trait]
impl Runtime for ChatRuntime {
    async fn get_schema(&self) -> Result<RuntimeSchema, RuntimeError> {
        Ok(schema("chat"))
    }

    async fn execute(
        &self,
        _input: Option<Value>,
        _options: ExecuteOptions,
    ) -> Result<RuntimeResult, RuntimeError> {
        Ok(RuntimeResult::successful(json!({"replies": self.replies.len()})))
    }

    fn stream<'a>(
        &'a self,
        _input: Option<Value>,
        _options: ExecuteOptions,
    ) -> BoxStream<'a, Result<RuntimeEvent, RuntimeError>> {
        let mut events: Vec<Result<RuntimeEvent, RuntimeError>> = self
            .replies
            .iter()
            .enumerate()
            .flat_map(|(i, reply)| {
                chat_events(
                    &self.conversation_id,
                    &format!("{}-m{i}", self.message_prefix),
                    reply,
                )
            })
            .map(Ok)
            .collect();
        events.push(Ok(RuntimeEvent::Result(RuntimeResult::successful(
            json!({"replies": self.replies.len()}),
        ))));
        Box::pin(stream::iter(events))
    }
}

/// Factory serving `stepper`, `chat`, `chatty` and any registered scripts.
///
/// `broken-factory` panics inside `new_runtime`.
#[derive(Default)]
pub struct FakeFactory {
    scripts: Mutex<HashMap<String, Script>>,
    pub disposed: Arc<AtomicUsize>,
    pub created: AtomicUsize,
    pub factory_disposals: AtomicUsize,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(
        self,
        entrypoint: &str,
        script: impl Fn(Option<Value>, &ExecuteOptions) -> Result<RuntimeResult, RuntimeError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(entrypoint.to_string(), Arc::new(script));
        self
    }

    pub fn disposals(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RuntimeFactory for FakeFactory {
    fn discover_entrypoints(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scripts.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    async fn new_runtime(
        &self,
        entrypoint: &str,
        context: RuntimeContext,
    ) -> Result<Box<dyn Runtime>, RuntimeError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        match entrypoint {
            "stepper" => Ok(Box::new(StepperRuntime {
                nodes: StepperRuntime::NODES.to_vec(),
                position: Mutex::new(0),
                visited: Mutex::new(Vec::new()),
                disposed: self.disposed.clone(),
            })),
            "chatty" => Ok(Box::new(ChattyRuntime {
                telemetry: context.telemetry,
            })),
            "broken-factory" => panic!("factory exploded"),
            "chat" => Ok(Box::new(ChatRuntime {
                conversation_id: "conv-1".into(),
                message_prefix: Uuid::new_v4().simple().to_string(),
                replies: vec!["Hello there".into(), "Anything else?".into()],
            })),
            other => {
                let script = self
                    .scripts
                    .lock()
                    .unwrap()
                    .get(other)
                    .cloned()
                    .ok_or_else(|| RuntimeError::EntrypointNotFound(other.to_string()))?;
                Ok(Box::new(ScriptedRuntime {
                    script,
                    telemetry: context.telemetry,
                    disposed: self.disposed.clone(),
                }))
            }
        }
    }

    async fn dispose(&self) -> Result<(), RuntimeError> {
        self.factory_disposals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Poll until the run satisfies `done`.
pub async fn wait_for_run(
    service: &RunService,
    run_id: &str,
    done: impl Fn(&ExecutionRun) -> bool,
) -> ExecutionRun {
    for _ in 0..400 {
        if let Some(run) = service.get_run(run_id) {
            if done(&run) {
                return run;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("run {run_id} never reached the expected state");
}
