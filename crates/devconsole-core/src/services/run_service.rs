//! Orchestrates single-execution runs.
//!
//! `RunService` owns the run table, instantiates a fresh runtime per
//! `execute`, drives it according to the run's mode, and keeps the run's
//! status, output, error, logs, traces and chat messages in sync. Every
//! mutation is followed by an `on_run_updated` notification carrying a
//! snapshot taken after the mutation.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::Utc;
use futures::{FutureExt, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::observer::{NoopObserver, RunObserver};
use crate::debug::{DebugBridge, DebugEvent, DebugObserver, DebugRuntime};
use crate::domain::{
    error_chain, user_message, user_message_event, ChatMessage, ConversationEvent, ErrorContract, ExecutionMode,
    ExecutionRun, LogContent, LogLevel, LogMessage, RunServiceError, RunStatus, TraceMessage,
};
use crate::metrics::METRICS;
use crate::obs::{self, RunSpan};
use crate::runtime::{
    Breakpoints, ExecuteOptions, RunTelemetry, Runtime, RuntimeContext, RuntimeError,
    RuntimeEvent, RuntimeFactory, RuntimeResult, RuntimeStatus, TelemetrySink,
};
use crate::sync::lock;

/// Cloneable handle to a run table and the factory that backs it.
#[derive(Clone)]
pub struct RunService {
    inner: Arc<Inner>,
}

struct Inner {
    factory: Arc<dyn RuntimeFactory>,
    runs: Mutex<HashMap<String, ExecutionRun>>,
    bridges: Mutex<HashMap<String, Arc<DebugBridge>>>,
    observer: Arc<dyn RunObserver<ExecutionRun>>,
}

/// What `execute` captured from the run before driving the runtime.
struct ExecutionPlan {
    entrypoint: String,
    mode: ExecutionMode,
    input: Option<Value>,
    resume: bool,
}

impl Inner {
    fn runs(&self) -> MutexGuard<'_, HashMap<String, ExecutionRun>> {
        lock(&self.runs)
    }

    /// Mutate a run under the lock, then notify with a snapshot.
    fn update<T>(&self, run_id: &str, f: impl FnOnce(&mut ExecutionRun) -> T) -> Option<T> {
        let (out, snapshot) = {
            let mut runs = self.runs();
            let run = runs.get_mut(run_id)?;
            let out = f(run);
            (out, run.clone())
        };
        self.observer.on_run_updated(&snapshot);
        Some(out)
    }

    fn handle_log(&self, log: LogMessage) {
        METRICS.inc_logs_routed();
        self.update(&log.run_id, |run| run.logs.push(log.clone()));
        self.observer.on_log(&log);
    }

    fn handle_trace(&self, trace: TraceMessage) {
        METRICS.inc_traces_upserted();
        self.update(&trace.run_id, |run| run.upsert_trace(trace.clone()));
        self.observer.on_trace(&trace);
    }

    fn add_log(&self, run_id: &str, level: LogLevel, message: impl Into<LogContent>) {
        self.handle_log(LogMessage::new(run_id, level, message));
    }

    /// Fold a conversation event into the run and announce the message.
    fn handle_chat_event(&self, run_id: &str, event: ConversationEvent) {
        let message = self.update(run_id, |run| run.add_event(&event)).flatten();
        if let Some(message) = message {
            self.observer.on_chat(&ChatMessage {
                event: Some(event),
                message,
                run_id: run_id.to_string(),
            });
        }
    }
}

impl TelemetrySink for Inner {
    fn log(&self, log: LogMessage) {
        self.handle_log(log);
    }

    fn trace(&self, trace: TraceMessage) {
        self.handle_trace(trace);
    }
}

/// Mirrors debug session notifications onto the run.
struct BridgeObserver {
    inner: Weak<Inner>,
    run_id: String,
}

impl DebugObserver for BridgeObserver {
    fn on_event(&self, event: &DebugEvent) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        match event {
            DebugEvent::BreakpointHit(breakpoint) => {
                METRICS.inc_breakpoints_hit();
                obs::emit_breakpoint_hit(&self.run_id, &breakpoint.node);
                inner.update(&self.run_id, |run| run.breakpoint = Some(breakpoint.clone()));
                let next = if breakpoint.next_nodes.is_empty() {
                    String::new()
                } else {
                    format!(" (next: {})", breakpoint.next_nodes.join(", "))
                };
                inner.add_log(
                    &self.run_id,
                    LogLevel::Info,
                    format!("Breakpoint hit at '{}'{next}", breakpoint.node),
                );
            }
            DebugEvent::StateUpdate(state) => {
                inner.add_log(
                    &self.run_id,
                    LogLevel::Debug,
                    format!("State update: {}", state.node_name),
                );
            }
            DebugEvent::Message(event) => inner.handle_chat_event(&self.run_id, event.clone()),
            DebugEvent::ExecutionStarted
            | DebugEvent::ExecutionCompleted(_)
            | DebugEvent::ExecutionError(_) => {}
        }
    }
}

impl RunService {
    pub fn new(factory: Arc<dyn RuntimeFactory>) -> Self {
        Self::with_observer(factory, Arc::new(NoopObserver))
    }

    pub fn with_observer(
        factory: Arc<dyn RuntimeFactory>,
        observer: Arc<dyn RunObserver<ExecutionRun>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                runs: Mutex::new(HashMap::new()),
                bridges: Mutex::new(HashMap::new()),
                observer,
            }),
        }
    }

    pub fn factory(&self) -> Arc<dyn RuntimeFactory> {
        self.inner.factory.clone()
    }

    /// Insert or overwrite a run by ID.
    pub fn register_run(&self, run: ExecutionRun) {
        let snapshot = run.clone();
        self.inner.runs().insert(run.id.clone(), run);
        self.inner.observer.on_run_updated(&snapshot);
    }

    pub fn get_run(&self, run_id: &str) -> Option<ExecutionRun> {
        self.inner.runs().get(run_id).cloned()
    }

    /// Every run, newest first by start time.
    pub fn runs(&self) -> Vec<ExecutionRun> {
        let mut runs: Vec<ExecutionRun> = self.inner.runs().values().cloned().collect();
        runs.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        runs
    }

    /// Drop run history. Runs that are still executing are kept.
    pub fn clear_runs(&self) {
        let removed: Vec<String> = {
            let mut runs = self.inner.runs();
            let removed = runs
                .iter()
                .filter(|(_, run)| run.status != RunStatus::Running)
                .map(|(id, _)| id.clone())
                .collect::<Vec<_>>();
            for id in &removed {
                runs.remove(id);
            }
            removed
        };
        let mut bridges = lock(&self.inner.bridges);
        for id in &removed {
            bridges.remove(id);
        }
        debug!(cleared = removed.len(), "run history cleared");
    }

    /// Route a log line to its run (if registered) and to the observer.
    pub fn handle_log(&self, log: LogMessage) {
        self.inner.handle_log(log);
    }

    /// Upsert a trace into its run (if registered) and forward it.
    pub fn handle_trace(&self, trace: TraceMessage) {
        self.inner.handle_trace(trace);
    }

    /// Execute or resume a run. Never fails: every outcome, including a
    /// runtime panic, is written back to the run and a final update is
    /// always emitted.
    pub async fn execute(&self, run_id: &str) {
        let Some(plan) = self.inner.update(run_id, |run| {
            let resume = run.status == RunStatus::Suspended;
            let input = if resume {
                run.resume_data.clone()
            } else {
                run.output_data = None;
                Some(run.input_data.clone())
            };
            run.status = RunStatus::Running;
            run.start_time = Utc::now();
            run.end_time = None;
            run.error = None;
            run.breakpoint = None;
            ExecutionPlan {
                entrypoint: run.entrypoint.clone(),
                mode: run.mode,
                input,
                resume,
            }
        }) else {
            warn!(run_id, "execute requested for unknown run");
            return;
        };

        let verb = if plan.resume { "Resuming" } else { "Starting" };
        self.inner.add_log(
            run_id,
            LogLevel::Info,
            format!("{verb} execution: {}", plan.entrypoint),
        );
        obs::emit_run_started(run_id, &plan.entrypoint, plan.mode.as_str(), plan.resume);
        METRICS.inc_runs_executed();

        let outcome = RunSpan::new("run", run_id)
            .instrument(AssertUnwindSafe(self.drive(run_id, &plan)).catch_unwind())
            .await
            .unwrap_or_else(|panic| Err(RuntimeError::from_panic(panic)));
        self.finish(run_id, outcome);
    }

    async fn drive(
        &self,
        run_id: &str,
        plan: &ExecutionPlan,
    ) -> Result<RuntimeResult, RuntimeError> {
        let sink: Arc<dyn TelemetrySink> = self.inner.clone();
        let context = RuntimeContext::new(run_id, RunTelemetry::new(run_id, sink));
        let runtime = self
            .inner
            .factory
            .new_runtime(&plan.entrypoint, context)
            .await?;

        let options = if plan.resume {
            ExecuteOptions::resume()
        } else {
            ExecuteOptions::default()
        };

        let (runtime, bridge): (Box<dyn Runtime>, Option<Arc<DebugBridge>>) = match plan.mode {
            ExecutionMode::Debug => {
                let bridge = self.bridge_for(run_id);
                bridge.connect();
                let debug: Box<dyn Runtime> = Box::new(DebugRuntime::new(runtime, bridge.clone()));
                (debug, Some(bridge))
            }
            ExecutionMode::Run | ExecutionMode::Chat => (runtime, None),
        };

        let input = plan.input.clone();
        let target: &dyn Runtime = runtime.as_ref();
        let result = AssertUnwindSafe(async move {
            match plan.mode {
                ExecutionMode::Chat => self.drive_chat(run_id, target, input, options).await,
                ExecutionMode::Run | ExecutionMode::Debug => target.execute(input, options).await,
            }
        })
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(RuntimeError::from_panic(panic)));

        if let Some(bridge) = bridge {
            bridge.disconnect();
        }
        if let Err(err) = runtime.dispose().await {
            obs::emit_dispose_error(run_id, &err);
        }
        result
    }

    /// Consume the runtime stream, folding conversation events into the run.
    async fn drive_chat(
        &self,
        run_id: &str,
        runtime: &dyn Runtime,
        input: Option<Value>,
        options: ExecuteOptions,
    ) -> Result<RuntimeResult, RuntimeError> {
        let mut events = runtime.stream(input, options);
        while let Some(event) = events.next().await {
            match event? {
                RuntimeEvent::Message(event) => self.inner.handle_chat_event(run_id, event),
                RuntimeEvent::State(state) => {
                    debug!(run_id, node = %state.node_name, "state update");
                }
                RuntimeEvent::Result(result) => return Ok(result),
            }
        }
        Err(anyhow::anyhow!("runtime stream ended without a result").into())
    }

    /// Write the outcome back to the run and emit the final update.
    fn finish(&self, run_id: &str, outcome: Result<RuntimeResult, RuntimeError>) {
        match outcome {
            Ok(result) if result.status == RuntimeStatus::Suspended && result.resume => {
                self.inner.update(run_id, |run| {
                    run.status = RunStatus::Suspended;
                    run.output_data = result.output;
                    run.end_time = Some(Utc::now());
                });
                self.inner.add_log(
                    run_id,
                    LogLevel::Info,
                    "Execution suspended; waiting for resume input",
                );
                obs::emit_run_suspended(run_id);
            }
            Ok(result) if result.status == RuntimeStatus::Faulted => {
                let error = result.error.unwrap_or_else(|| {
                    ErrorContract::unknown("Runtime reported a faulted result", "")
                });
                self.fail(run_id, error);
            }
            Ok(result) => {
                let output = result
                    .output
                    .filter(|v| !v.is_null())
                    .unwrap_or_else(|| json!({}));
                if !is_empty_json(&output) {
                    self.inner.add_log(
                        run_id,
                        LogLevel::Info,
                        format!("Execution result: {output}"),
                    );
                }
                self.inner.update(run_id, |run| {
                    run.status = RunStatus::Completed;
                    run.output_data = Some(output);
                    run.end_time = Some(Utc::now());
                    run.breakpoint = None;
                });
                self.inner.add_log(
                    run_id,
                    LogLevel::Info,
                    "Execution completed successfully",
                );
            }
            Err(RuntimeError::DebugQuit) => {
                self.inner.update(run_id, |run| {
                    run.status = RunStatus::Cancelled;
                    run.end_time = Some(Utc::now());
                    run.breakpoint = None;
                });
                self.inner.add_log(
                    run_id,
                    LogLevel::Info,
                    "Debug session stopped; execution cancelled",
                );
            }
            Err(RuntimeError::Structured(contract)) => self.fail(run_id, contract),
            Err(err) => {
                let contract = ErrorContract::unknown(err.to_string(), error_chain(&err));
                self.fail(run_id, contract);
            }
        }

        let Some(run) = self.get_run(run_id) else {
            return;
        };
        obs::emit_run_finished(
            run_id,
            run.status.as_str(),
            run.duration().num_milliseconds(),
        );
        self.inner.observer.on_run_updated(&run);
    }

    fn fail(&self, run_id: &str, error: ErrorContract) {
        METRICS.inc_runs_failed();
        self.inner.handle_log(LogMessage::traceback(
            run_id,
            error.to_string(),
            error.detail.clone(),
        ));
        self.inner.update(run_id, |run| {
            run.status = RunStatus::Failed;
            run.error = Some(error);
            run.end_time = Some(Utc::now());
            run.breakpoint = None;
        });
    }

    // ── Debug controls ──

    /// The run's debug bridge, created on first use.
    pub fn bridge_for(&self, run_id: &str) -> Arc<DebugBridge> {
        let mut bridges = lock(&self.inner.bridges);
        bridges
            .entry(run_id.to_string())
            .or_insert_with(|| {
                let bridge = Arc::new(DebugBridge::new(run_id));
                bridge.add_observer(Arc::new(BridgeObserver {
                    inner: Arc::downgrade(&self.inner),
                    run_id: run_id.to_string(),
                }));
                bridge
            })
            .clone()
    }

    fn active_bridge(&self, run_id: &str) -> Result<Arc<DebugBridge>, RunServiceError> {
        lock(&self.inner.bridges)
            .get(run_id)
            .filter(|bridge| bridge.is_connected())
            .cloned()
            .ok_or_else(|| RunServiceError::NoDebugSession(run_id.to_string()))
    }

    /// Resume and pause again at the next node.
    pub fn step_debug(&self, run_id: &str) -> Result<(), RunServiceError> {
        self.release(run_id, Breakpoints::All)
    }

    /// Resume and run to completion.
    pub fn continue_debug(&self, run_id: &str) -> Result<(), RunServiceError> {
        self.release(run_id, Breakpoints::none())
    }

    /// Quit the debug session; the run ends as cancelled.
    pub fn stop_debug(&self, run_id: &str) -> Result<(), RunServiceError> {
        self.active_bridge(run_id)?.quit();
        Ok(())
    }

    fn release(&self, run_id: &str, breakpoints: Breakpoints) -> Result<(), RunServiceError> {
        let bridge = self.active_bridge(run_id)?;
        bridge.set_breakpoints(breakpoints);
        self.inner.update(run_id, |run| run.breakpoint = None);
        bridge.resume();
        Ok(())
    }

    /// Set the breakpoints used by the run's next debug pass.
    pub fn set_breakpoints(
        &self,
        run_id: &str,
        breakpoints: Breakpoints,
    ) -> Result<(), RunServiceError> {
        if !self.inner.runs().contains_key(run_id) {
            return Err(RunServiceError::RunNotFound(run_id.to_string()));
        }
        self.bridge_for(run_id).set_breakpoints(breakpoints);
        Ok(())
    }

    /// Store resume data and execute the run again.
    pub async fn resume_debug(&self, run_id: &str, data: Value) -> Result<(), RunServiceError> {
        self.inner
            .update(run_id, |run| run.resume_data = Some(data))
            .ok_or_else(|| RunServiceError::RunNotFound(run_id.to_string()))?;
        self.execute(run_id).await;
        Ok(())
    }

    // ── Chat input ──

    /// Feed operator text into a run.
    ///
    /// A suspended run is resumed with the text (parsed as JSON when
    /// possible). Any other idle run receives it as a new user message and
    /// is executed again. Running runs reject input.
    pub async fn submit_chat_input(&self, run_id: &str, text: &str) -> Result<(), RunServiceError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let (status, conversation_id) = self
            .inner
            .runs()
            .get(run_id)
            .map(|run| (run.status, run.conversation_id.clone()))
            .ok_or_else(|| RunServiceError::RunNotFound(run_id.to_string()))?;

        match status {
            RunStatus::Running => return Err(RunServiceError::RunBusy(run_id.to_string())),
            RunStatus::Suspended => {
                let data = serde_json::from_str(text)
                    .unwrap_or_else(|_| Value::String(text.to_string()));
                self.inner.update(run_id, |run| run.resume_data = Some(data));
            }
            _ => {
                let message = user_message(text);
                let event = user_message_event(text, &conversation_id);
                self.inner.update(run_id, |run| {
                    run.add_event(&event);
                    run.input_data = json!({ "messages": [message.clone()] });
                });
                self.inner.observer.on_chat(&ChatMessage {
                    event: Some(event),
                    message,
                    run_id: run_id.to_string(),
                });
            }
        }

        self.execute(run_id).await;
        Ok(())
    }
}

fn is_empty_json(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
