//! Orchestrates evaluation runs.
//!
//! An eval run hands an eval set to an [`EvalEntrypoint`], then folds the
//! entry point's output (or the run's output file) into per-evaluation
//! results. Failures are written back to the run, with a final update, and
//! then returned to the caller.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use devconsole_store::{EvalSet, EvalSetStore};
use futures::FutureExt;
use serde_json::Value;
use tracing::debug;

use super::eval_results::parse_results;
use super::observer::{NoopObserver, RunObserver};
use super::progress::{ConsoleReporter, EvalEventBus, ProgressReporter, ReportingConfig};
use crate::domain::{
    error_chain, ErrorContract, EvalRun, EvalRunError, EvalRunStatus, LogContent, LogLevel,
    LogMessage, TraceMessage,
};
use crate::metrics::METRICS;
use crate::obs::{self, RunSpan};
use crate::runtime::{panic_message, RunTelemetry, RuntimeError, RuntimeFactory, TelemetrySink};
use crate::sync::lock;

/// Everything an entry point needs to evaluate one eval set.
#[derive(Clone)]
pub struct EvalContext {
    pub run_id: String,
    pub entrypoint: String,
    /// Resolved eval set file.
    pub eval_set: PathBuf,
    /// Subset of evaluations to run; empty means all.
    pub eval_ids: Vec<String>,
    pub workers: usize,
    pub no_report: bool,
    pub enable_mocker_cache: bool,
    pub report_coverage: bool,
    pub eval_set_run_id: Option<String>,
    pub output_file: Option<PathBuf>,
    pub factory: Arc<dyn RuntimeFactory>,
    pub telemetry: RunTelemetry,
}

/// What an entry point returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalOutcome {
    /// Inline results: a JSON object, or a string holding one.
    pub output: Option<Value>,
}

/// Runs the evaluations of one eval set.
///
/// An abrupt process exit is reported as [`RuntimeError::Exit`].
#[async_trait]
pub trait EvalEntrypoint: Send + Sync {
    async fn evaluate(
        &self,
        context: EvalContext,
        events: &EvalEventBus,
    ) -> Result<EvalOutcome, RuntimeError>;
}

/// Cloneable handle to the eval run table.
#[derive(Clone)]
pub struct EvalRunService {
    inner: Arc<Inner>,
}

struct Inner {
    factory: Arc<dyn RuntimeFactory>,
    entrypoint: Arc<dyn EvalEntrypoint>,
    eval_sets: EvalSetStore,
    reporting: ReportingConfig,
    remote_reporter: Option<Arc<dyn ProgressReporter>>,
    runs: Mutex<HashMap<String, EvalRun>>,
    observer: Arc<dyn RunObserver<EvalRun>>,
}

impl Inner {
    fn runs(&self) -> MutexGuard<'_, HashMap<String, EvalRun>> {
        lock(&self.runs)
    }

    fn update<T>(&self, run_id: &str, f: impl FnOnce(&mut EvalRun) -> T) -> Option<T> {
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
}

impl TelemetrySink for Inner {
    fn log(&self, log: LogMessage) {
        self.handle_log(log);
    }

    fn trace(&self, trace: TraceMessage) {
        self.handle_trace(trace);
    }
}

/// Builder for [`EvalRunService`].
pub struct EvalRunServiceBuilder {
    factory: Arc<dyn RuntimeFactory>,
    entrypoint: Arc<dyn EvalEntrypoint>,
    eval_sets: EvalSetStore,
    reporting: ReportingConfig,
    remote_reporter: Option<Arc<dyn ProgressReporter>>,
    observer: Arc<dyn RunObserver<EvalRun>>,
}

impl EvalRunServiceBuilder {
    pub fn reporting(mut self, reporting: ReportingConfig) -> Self {
        self.reporting = reporting;
        self
    }

    /// Reporter attached only when a run's reporting prerequisites pass.
    pub fn remote_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.remote_reporter = Some(reporter);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn RunObserver<EvalRun>>) -> Self {
        self.observer = observer;
        self
    }

    pub fn build(self) -> EvalRunService {
        EvalRunService {
            inner: Arc::new(Inner {
                factory: self.factory,
                entrypoint: self.entrypoint,
                eval_sets: self.eval_sets,
                reporting: self.reporting,
                remote_reporter: self.remote_reporter,
                runs: Mutex::new(HashMap::new()),
                observer: self.observer,
            }),
        }
    }
}

impl EvalRunService {
    /// Reporting defaults to [`ReportingConfig::from_env`].
    pub fn builder(
        factory: Arc<dyn RuntimeFactory>,
        entrypoint: Arc<dyn EvalEntrypoint>,
        eval_sets: EvalSetStore,
    ) -> EvalRunServiceBuilder {
        EvalRunServiceBuilder {
            factory,
            entrypoint,
            eval_sets,
            reporting: ReportingConfig::from_env(),
            remote_reporter: None,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn register_run(&self, run: EvalRun) {
        let snapshot = run.clone();
        self.inner.runs().insert(run.id.clone(), run);
        self.inner.observer.on_run_updated(&snapshot);
    }

    pub fn get_run(&self, run_id: &str) -> Option<EvalRun> {
        self.inner.runs().get(run_id).cloned()
    }

    /// Runs whose eval set file stem is `eval_set_id`, newest first.
    pub fn get_runs_for_eval_set(&self, eval_set_id: &str) -> Vec<EvalRun> {
        let mut runs: Vec<EvalRun> = self
            .inner
            .runs()
            .values()
            .filter(|run| run.eval_set_name() == eval_set_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        runs
    }

    pub fn handle_log(&self, log: LogMessage) {
        self.inner.handle_log(log);
    }

    pub fn handle_trace(&self, trace: TraceMessage) {
        self.inner.handle_trace(trace);
    }

    /// Execute an eval run to completion.
    ///
    /// On failure the run is marked failed, its error and end time are set
    /// and a final update is emitted before the error is returned.
    pub async fn execute(&self, run_id: &str) -> Result<(), EvalRunError> {
        let run = self
            .get_run(run_id)
            .ok_or_else(|| EvalRunError::RunNotFound(run_id.to_string()))?;

        let inner = &self.inner;
        inner.add_log(run_id, LogLevel::Info, "Starting evaluation run...");
        inner.add_log(
            run_id,
            LogLevel::Info,
            format!("  Eval set path: {}", run.eval_set_path),
        );
        inner.add_log(
            run_id,
            LogLevel::Info,
            format!("  Entrypoint: {}", run.entrypoint),
        );
        inner.add_log(run_id, LogLevel::Info, format!("  Workers: {}", run.workers));

        inner.update(run_id, |run| {
            run.status = EvalRunStatus::Running;
            run.end_time = None;
            run.error = None;
        });
        obs::emit_eval_started(run_id, &run.eval_set_path, &run.entrypoint, run.workers);

        let outcome = RunSpan::new("eval", run_id)
            .instrument(AssertUnwindSafe(self.evaluate(run_id, run)).catch_unwind())
            .await;
        let result = match outcome {
            Ok(result) => result,
            Err(payload) => Err(EvalRunError::Panicked(panic_message(payload.as_ref()))),
        };

        if let Err(err) = inner.factory.dispose().await {
            obs::emit_dispose_error(run_id, &err);
        }

        match result {
            Ok(()) => {
                self.complete(run_id);
                Ok(())
            }
            Err(err) => {
                self.record_failure(run_id, &err);
                Err(err)
            }
        }
    }

    async fn evaluate(&self, run_id: &str, run: EvalRun) -> Result<(), EvalRunError> {
        let inner = &self.inner;
        let bus = EvalEventBus::new();
        bus.subscribe(Arc::new(ConsoleReporter::new(run_id)));
        if self.reporting_enabled(run_id, &run) {
            if let Some(reporter) = &inner.remote_reporter {
                bus.subscribe(reporter.clone());
            }
        }

        let eval_set = inner
            .eval_sets
            .resolve(&run.eval_set_path)
            .ok_or_else(|| EvalRunError::EvalSetNotFound(run.eval_set_path.clone()))?;

        let entrypoint = if run.entrypoint.is_empty() {
            let found = inner.factory.discover_entrypoints();
            match found.as_slice() {
                [only] => {
                    inner.add_log(
                        run_id,
                        LogLevel::Info,
                        format!("Auto-discovered entrypoint: {only}"),
                    );
                    only.clone()
                }
                _ => return Err(EvalRunError::EntrypointDiscovery { found: found.len() }),
            }
        } else {
            run.entrypoint.clone()
        };

        if run.evaluator_refs.is_empty() {
            let refs = evaluator_refs(&eval_set);
            inner.update(run_id, |run| run.evaluator_refs = refs);
        }

        let sink: Arc<dyn TelemetrySink> = inner.clone();
        let output_file = run.output_file.as_ref().map(PathBuf::from);
        let context = EvalContext {
            run_id: run_id.to_string(),
            entrypoint,
            eval_set,
            eval_ids: run.eval_ids.clone(),
            workers: run.workers,
            no_report: run.no_report,
            enable_mocker_cache: run.enable_mocker_cache,
            report_coverage: run.report_coverage,
            eval_set_run_id: run.eval_set_run_id.clone(),
            output_file: output_file.clone(),
            factory: inner.factory.clone(),
            telemetry: RunTelemetry::new(run_id, sink),
        };

        let outcome = match inner.entrypoint.evaluate(context, &bus).await {
            Ok(outcome) => outcome,
            Err(RuntimeError::Exit(code)) => return Err(EvalRunError::ProcessExit { code }),
            Err(err) => return Err(err.into()),
        };

        let results = parse_results(outcome.output.as_ref(), output_file.as_deref());
        debug!(run_id, evaluations = results.len(), "eval results parsed");
        inner.update(run_id, |run| {
            run.evaluation_results = results;
            run.status = EvalRunStatus::Completed;
            run.end_time = Some(Utc::now());
        });
        Ok(())
    }

    /// Reporting needs the run to allow it and a configured project.
    fn reporting_enabled(&self, run_id: &str, run: &EvalRun) -> bool {
        if run.no_report {
            return false;
        }
        if self.inner.reporting.project_id.is_none() {
            self.inner.add_log(
                run_id,
                LogLevel::Info,
                "DEVCONSOLE_PROJECT_ID is not set; results will not be reported",
            );
            return false;
        }
        true
    }

    fn complete(&self, run_id: &str) {
        let Some(run) = self.get_run(run_id) else {
            return;
        };
        let score = run.overall_score();
        let evaluations = run.total_evaluations();
        self.inner.add_log(
            run_id,
            LogLevel::Info,
            format!("Evaluation completed. Overall score: {:.1}%", score * 100.0),
        );
        METRICS.add_evaluations(evaluations as u64);
        obs::emit_eval_finished(run_id, score, evaluations, true);
    }

    fn record_failure(&self, run_id: &str, err: &EvalRunError) {
        let inner = &self.inner;
        let contract = match err {
            EvalRunError::ProcessExit { .. } => {
                inner.add_log(
                    run_id,
                    LogLevel::Error,
                    format!("SystemExit caught - {err}"),
                );
                ErrorContract::new(ErrorContract::SYSTEM_EXIT, err.to_string(), "")
            }
            other => {
                let message = match other.to_string() {
                    m if m.is_empty() => "(no message)".to_string(),
                    m => m,
                };
                let code = other.code();
                let detail = error_chain(other);
                inner.add_log(
                    run_id,
                    LogLevel::Error,
                    format!("Exception caught - type: {code}, message: {message}"),
                );
                inner.handle_log(LogMessage::traceback(run_id, &message, &detail));
                ErrorContract::new(code, message, detail)
            }
        };

        METRICS.inc_runs_failed();
        let evaluations = inner
            .update(run_id, |run| {
                run.status = EvalRunStatus::Failed;
                run.end_time = Some(Utc::now());
                run.error = Some(contract);
                run.total_evaluations()
            })
            .unwrap_or_default();
        obs::emit_eval_finished(run_id, 0.0, evaluations, false);
    }
}

/// Evaluator IDs referenced by an eval set file, or none if it is unreadable.
fn evaluator_refs(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<EvalSet>(&raw).ok())
        .map(|set| set.evaluator_refs)
        .unwrap_or_default()
}
