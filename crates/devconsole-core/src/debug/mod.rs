//! Debug sessions: pause an execution at breakpoints and resume it on
//! operator command.
//!
//! - [`ResumeGate`]: async primitive with `wait()` and `signal(outcome)`
//! - [`DebugBridge`]: per-run session state, controls and notifications
//! - [`DebugRuntime`]: runtime decorator that consumes breakpoints

pub mod bridge;
pub mod gate;
pub mod runtime;

pub use bridge::{DebugBridge, DebugEvent, DebugObserver};
pub use gate::{GateOutcome, ResumeGate};
pub use runtime::DebugRuntime;

use crate::runtime::RuntimeError;

/// Errors raised by a debug session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DebugError {
    #[error("debug session terminated")]
    Terminated,
}

impl From<DebugError> for RuntimeError {
    fn from(err: DebugError) -> Self {
        match err {
            DebugError::Terminated => RuntimeError::DebugQuit,
        }
    }
}
