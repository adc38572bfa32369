//! Per-run debug session: breakpoints, resume/quit controls and session
//! notifications.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, error};

use super::gate::{GateOutcome, ResumeGate};
use super::DebugError;
use crate::domain::ConversationEvent;
use crate::runtime::{BreakpointResult, Breakpoints, RuntimeResult, StateEvent};
use crate::sync::lock;

/// Notification published by a debug session.
#[derive(Debug, Clone, PartialEq)]
pub enum DebugEvent {
    ExecutionStarted,
    StateUpdate(StateEvent),
    /// Conversation output streamed by the debugged runtime.
    Message(ConversationEvent),
    BreakpointHit(BreakpointResult),
    ExecutionCompleted(RuntimeResult),
    ExecutionError(String),
}

/// Receives debug session notifications. Called synchronously on the
/// executing task; implementations must not block.
pub trait DebugObserver: Send + Sync {
    fn on_event(&self, event: &DebugEvent);
}

struct ChannelObserver {
    tx: mpsc::UnboundedSender<DebugEvent>,
}

impl DebugObserver for ChannelObserver {
    fn on_event(&self, event: &DebugEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(event.clone());
    }
}

/// Resumption gate between a paused execution and the operator.
pub struct DebugBridge {
    run_id: String,
    connected: AtomicBool,
    gate: ResumeGate,
    breakpoints: Mutex<Breakpoints>,
    observers: Mutex<Vec<Arc<dyn DebugObserver>>>,
}

impl DebugBridge {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            connected: AtomicBool::new(false),
            gate: ResumeGate::new(),
            breakpoints: Mutex::new(Breakpoints::default()),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Start (or restart) a session. Clears an earlier quit.
    pub fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.gate.reset();
        debug!(run_id = %self.run_id, "debug bridge connected");
    }

    /// End the session, releasing any pending wait.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.gate.signal(GateOutcome::Released);
        debug!(run_id = %self.run_id, "debug bridge disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn get_breakpoints(&self) -> Breakpoints {
        lock(&self.breakpoints).clone()
    }

    pub fn set_breakpoints(&self, breakpoints: Breakpoints) {
        *lock(&self.breakpoints) = breakpoints;
    }

    /// Suspend until `resume` or `quit`.
    pub async fn wait_for_resume(&self) -> Result<(), DebugError> {
        self.gate.wait().await
    }

    pub fn resume(&self) {
        self.gate.signal(GateOutcome::Released);
    }

    /// Fail the current and every later wait until the next `connect`.
    pub fn quit(&self) {
        self.gate.signal(GateOutcome::Cancelled);
    }

    pub fn add_observer(&self, observer: Arc<dyn DebugObserver>) {
        lock(&self.observers).push(observer);
    }

    /// Unbounded event feed; nothing is dropped while the receiver is idle.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DebugEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.add_observer(Arc::new(ChannelObserver { tx }));
        rx
    }

    pub fn emit_execution_started(&self) {
        debug!(run_id = %self.run_id, "execution started");
        self.emit(DebugEvent::ExecutionStarted);
    }

    pub fn emit_state_update(&self, state: &StateEvent) {
        debug!(run_id = %self.run_id, node = %state.node_name, "state update");
        self.emit(DebugEvent::StateUpdate(state.clone()));
    }

    pub fn emit_message(&self, event: &ConversationEvent) {
        self.emit(DebugEvent::Message(event.clone()));
    }

    pub fn emit_breakpoint_hit(&self, breakpoint: &BreakpointResult) {
        debug!(run_id = %self.run_id, node = %breakpoint.node, "breakpoint hit");
        self.emit(DebugEvent::BreakpointHit(breakpoint.clone()));
    }

    pub fn emit_execution_completed(&self, result: &RuntimeResult) {
        debug!(run_id = %self.run_id, "execution completed");
        self.emit(DebugEvent::ExecutionCompleted(result.clone()));
    }

    pub fn emit_execution_error(&self, message: &str) {
        error!(run_id = %self.run_id, error = %message, "execution error");
        self.emit(DebugEvent::ExecutionError(message.to_string()));
    }

    fn emit(&self, event: DebugEvent) {
        let observers = lock(&self.observers).clone();
        for observer in observers {
            observer.on_event(&event);
        }
    }
}
