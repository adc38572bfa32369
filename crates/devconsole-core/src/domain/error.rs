//! Domain-level error taxonomy for devconsole.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::runtime::RuntimeError;

/// Structured error recorded on a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContract {
    pub code: String,
    pub title: String,
    pub detail: String,
}

impl ErrorContract {
    pub fn new(
        code: impl Into<String>,
        title: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            title: title.into(),
            detail: detail.into(),
        }
    }

    /// Error code used for failures that carry no structured contract.
    pub const UNKNOWN: &'static str = "Unknown";

    /// Code recorded when an evaluation ends with a process exit.
    pub const SYSTEM_EXIT: &'static str = "SystemExit";

    pub fn unknown(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(Self::UNKNOWN, title, detail)
    }
}

impl fmt::Display for ErrorContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.title)
    }
}

/// Errors returned by `RunService` control operations.
///
/// `RunService::execute` itself never fails; these cover lookups and
/// rejected operator commands.
#[derive(Debug, thiserror::Error)]
pub enum RunServiceError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("run {0} is still running; wait for it to suspend or finish")]
    RunBusy(String),

    #[error("no active debug session for run {0}")]
    NoDebugSession(String),
}

/// Errors re-raised by `EvalRunService::execute` after the run has been
/// marked failed.
#[derive(Debug, thiserror::Error)]
pub enum EvalRunError {
    #[error("eval run not found: {0}")]
    RunNotFound(String),

    #[error("Evaluation process exited with code: {code}")]
    ProcessExit { code: i32 },

    #[error("eval set not found: {0}")]
    EvalSetNotFound(String),

    #[error("cannot auto-discover entrypoint: expected exactly one, found {found}")]
    EntrypointDiscovery { found: usize },

    #[error("evaluation panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl EvalRunError {
    /// Kind name recorded as the error code on a failed eval run.
    pub fn code(&self) -> String {
        match self {
            EvalRunError::RunNotFound(_) => "RunNotFound".to_string(),
            EvalRunError::ProcessExit { .. } => ErrorContract::SYSTEM_EXIT.to_string(),
            EvalRunError::EvalSetNotFound(_) => "EvalSetNotFound".to_string(),
            EvalRunError::EntrypointDiscovery { .. } => "EntrypointDiscovery".to_string(),
            EvalRunError::Panicked(_) => "Panic".to_string(),
            EvalRunError::Runtime(err) => err.code(),
        }
    }
}

/// Render an error and its `source()` chain, one cause per line.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\nCaused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
