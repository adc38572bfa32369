//! Errors crossing the runtime protocol boundary.

use std::any::Any;

use crate::domain::ErrorContract;

/// Failure reported by a runtime or factory.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Error the runtime already described; stored on the run as-is.
    #[error("{0}")]
    Structured(ErrorContract),

    /// The operator quit the debug session.
    #[error("debug session terminated")]
    DebugQuit,

    /// The runtime asked the hosting process to exit.
    #[error("process exited with code {0}")]
    Exit(i32),

    #[error("entrypoint not found: {0}")]
    EntrypointNotFound(String),

    #[error("runtime panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RuntimeError {
    /// Build a structured error in one call.
    pub fn structured(
        code: impl Into<String>,
        title: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        RuntimeError::Structured(ErrorContract::new(code, title, detail))
    }

    /// Short kind name used as an error code.
    pub fn code(&self) -> String {
        match self {
            RuntimeError::Structured(contract) => contract.code.clone(),
            RuntimeError::DebugQuit => "DebugQuit".to_string(),
            RuntimeError::Exit(_) => ErrorContract::SYSTEM_EXIT.to_string(),
            RuntimeError::EntrypointNotFound(_) => "EntrypointNotFound".to_string(),
            RuntimeError::Panicked(_) => "Panic".to_string(),
            RuntimeError::Other(_) => "RuntimeError".to_string(),
        }
    }

    /// Convert a caught panic payload into an error.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        RuntimeError::Panicked(panic_message(payload.as_ref()))
    }
}

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "(no message)".to_string()
    }
}
