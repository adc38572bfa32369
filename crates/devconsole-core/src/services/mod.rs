//! Run and eval services: the state machines front ends drive.

pub mod eval_results;
mod eval_run_service;
mod observer;
pub mod progress;
mod run_service;

pub use eval_results::{
    parse_results, EvalSetResults, EvaluationRunResult, EvaluationSetResult, EvaluatorScore,
};
pub use eval_run_service::{
    EvalContext, EvalEntrypoint, EvalOutcome, EvalRunService, EvalRunServiceBuilder,
};
pub use observer::{ChannelObserver, NoopObserver, RunObserver, ServiceEvent};
pub use progress::{
    ConsoleReporter, EvalEventBus, EvalProgress, JsonLinesReporter, ProgressReporter,
    ReportingConfig, PROJECT_ID_ENV,
};
pub use run_service::RunService;
