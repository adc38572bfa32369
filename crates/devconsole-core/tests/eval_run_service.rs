//! Integration tests for EvalRunService: result parsing, failure mapping,
//! entrypoint discovery and progress reporting.

mod common;

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use common::FakeFactory;
use devconsole_core::services::{EvalSetResults, JsonLinesReporter};
use devconsole_core::{
    ChannelObserver, ErrorContract, EvalContext, EvalEntrypoint, EvalEventBus, EvalOutcome,
    EvalProgress, EvalRun, EvalRunError, EvalRunService, EvalRunStatus, ProgressReporter,
    ReportingConfig, RuntimeError, RuntimeResult, ServiceEvent, SpanStatus, TraceMessage,
};
use devconsole_store::{EvalSetStore, Evaluation};

type Behaviour = dyn Fn(&EvalContext, &EvalEventBus) -> Result<EvalOutcome, RuntimeError> + Send + Sync;

/// Entry point driven by a closure; records every context it sees.
struct FakeEntrypoint {
    behaviour: Box<Behaviour>,
    seen: Mutex<Vec<EvalContext>>,
}

impl FakeEntrypoint {
    fn new(
        behaviour: impl Fn(&EvalContext, &EvalEventBus) -> Result<EvalOutcome, RuntimeError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            behaviour: Box::new(behaviour),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn contexts(&self) -> Vec<EvalContext> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EvalEntrypoint for FakeEntrypoint {
    async fn evaluate(
        &self,
        context: EvalContext,
        events: &EvalEventBus,
    ) -> Result<EvalOutcome, RuntimeError> {
        self.seen.lock().unwrap().push(context.clone());
        context.telemetry.info("evaluating");
        (self.behaviour)(&context, events)
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<EvalProgress>>);

impl ProgressReporter for Recorder {
    fn on_progress(&self, event: &EvalProgress) {
        self.0.lock().unwrap().push(event.clone());
    }
}

fn scores_payload(scores: &[f64]) -> Value {
    let evaluations: Vec<Value> = scores
        .iter()
        .enumerate()
        .map(|(i, score)| {
            json!({
                "evaluationName": format!("case {i}"),
                "evaluationId": format!("e{i}"),
                "evaluationRunResults": [{
                    "evaluatorName": "exact",
                    "result": {"score": score, "evaluationTime": 0.1}
                }]
            })
        })
        .collect();
    json!({"evaluationSetResults": evaluations})
}

fn project() -> (TempDir, EvalSetStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = EvalSetStore::new(dir.path());
    store
        .create_eval_set(
            "smoke",
            "Smoke",
            vec!["exact".into()],
            vec![Evaluation::new("e0", "case 0", json!({"name": "Ada"}))],
        )
        .unwrap();
    (dir, store)
}

fn service(store: EvalSetStore, entrypoint: Arc<FakeEntrypoint>) -> EvalRunService {
    let factory = Arc::new(FakeFactory::new().with_script("main", |_, _| {
        Ok(RuntimeResult::successful(json!({})))
    }));
    EvalRunService::builder(factory, entrypoint, store).build()
}

fn register(service: &EvalRunService, eval_set: &str, entrypoint: &str) -> String {
    let run = EvalRun::new(eval_set, entrypoint);
    let id = run.id.clone();
    service.register_run(run);
    id
}

fn log_lines(run: &EvalRun) -> Vec<String> {
    run.logs.iter().map(|l| l.message.to_string()).collect()
}

// ── Completed runs ──

#[tokio::test]
async fn inline_results_are_aggregated() {
    let (_dir, store) = project();
    let entrypoint = FakeEntrypoint::new(|_, _| {
        Ok(EvalOutcome {
            output: Some(scores_payload(&[1.0, 1.0, 0.5])),
        })
    });
    let service = service(store, entrypoint.clone());
    let id = register(&service, "smoke", "main");

    service.execute(&id).await.unwrap();

    let run = service.get_run(&id).unwrap();
    assert_eq!(run.status, EvalRunStatus::Completed);
    assert!(run.end_time.is_some());
    assert_eq!(run.total_evaluations(), 3);
    assert!((run.overall_score() - 0.8333).abs() < 1e-3);
    assert_eq!(run.evaluator_refs, vec!["exact"]);

    let lines = log_lines(&run);
    assert_eq!(lines[0], "Starting evaluation run...");
    assert_eq!(lines[1], "  Eval set path: smoke");
    assert_eq!(lines[2], "  Entrypoint: main");
    assert_eq!(lines[3], "  Workers: 1");
    assert!(lines.iter().any(|l| l == "evaluating"));
    assert_eq!(lines.last().unwrap(), "Evaluation completed. Overall score: 83.3%");

    let context = &entrypoint.contexts()[0];
    assert!(context.eval_set.ends_with("evaluations/eval-sets/smoke.json"));
    assert_eq!(context.entrypoint, "main");
}

#[tokio::test]
async fn inline_json_string_is_accepted() {
    let (_dir, store) = project();
    let entrypoint = FakeEntrypoint::new(|_, _| {
        Ok(EvalOutcome {
            output: Some(Value::String(scores_payload(&[0.25]).to_string())),
        })
    });
    let service = service(store, entrypoint);
    let id = register(&service, "smoke", "main");

    service.execute(&id).await.unwrap();

    let run = service.get_run(&id).unwrap();
    assert_eq!(run.evaluation_results[0].evaluator_results[0].score, 0.25);
}

#[tokio::test]
async fn output_file_is_used_when_inline_output_is_unusable() {
    let (dir, store) = project();
    let output_file = dir.path().join("out/results.json");
    let entrypoint = FakeEntrypoint::new(|context, _| {
        let path = context.output_file.as_deref().unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, scores_payload(&[1.0, 0.0]).to_string()).unwrap();
        Ok(EvalOutcome {
            output: Some(Value::String("not json".into())),
        })
    });
    let service = service(store, entrypoint);
    let mut run = EvalRun::new("smoke", "main");
    run.output_file = Some(output_file.display().to_string());
    let id = run.id.clone();
    service.register_run(run);

    service.execute(&id).await.unwrap();

    let run = service.get_run(&id).unwrap();
    assert_eq!(run.total_evaluations(), 2);
    assert_eq!(run.passed_evaluations(), 1);
}

#[tokio::test]
async fn no_usable_output_completes_with_no_results() {
    let (_dir, store) = project();
    let entrypoint = FakeEntrypoint::new(|_, _| Ok(EvalOutcome::default()));
    let service = service(store, entrypoint);
    let id = register(&service, "smoke", "main");

    service.execute(&id).await.unwrap();

    let run = service.get_run(&id).unwrap();
    assert_eq!(run.status, EvalRunStatus::Completed);
    assert!(run.evaluation_results.is_empty());
    assert_eq!(run.overall_score(), 0.0);
}

// ── Failures ──

#[tokio::test]
async fn process_exit_is_recorded_as_system_exit() {
    let (_dir, store) = project();
    let (observer, mut rx) = ChannelObserver::new();
    let factory = Arc::new(FakeFactory::new());
    let service = EvalRunService::builder(
        factory,
        FakeEntrypoint::new(|_, _| Err(RuntimeError::Exit(3))),
        store,
    )
    .observer(Arc::new(observer))
    .build();
    let id = register(&service, "smoke", "main");

    let err = service.execute(&id).await.unwrap_err();
    assert!(matches!(err, EvalRunError::ProcessExit { code: 3 }));

    let run = service.get_run(&id).unwrap();
    assert_eq!(run.status, EvalRunStatus::Failed);
    assert!(run.end_time.is_some());
    let error = run.error.clone().unwrap();
    assert_eq!(error.code, ErrorContract::SYSTEM_EXIT);
    assert_eq!(error.title, "Evaluation process exited with code: 3");
    assert!(log_lines(&run)
        .iter()
        .any(|l| l == "SystemExit caught - Evaluation process exited with code: 3"));

    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        if let ServiceEvent::RunUpdated(run) = event {
            last = Some(run);
        }
    }
    assert_eq!(last.unwrap().status, EvalRunStatus::Failed);
}

#[tokio::test]
async fn runtime_error_is_recorded_and_returned() {
    let (_dir, store) = project();
    let entrypoint = FakeEntrypoint::new(|_, _| {
        Err(RuntimeError::structured("ValueError", "bad eval input", "at case 2"))
    });
    let service = service(store, entrypoint);
    let id = register(&service, "smoke", "main");

    let err = service.execute(&id).await.unwrap_err();
    assert!(matches!(err, EvalRunError::Runtime(_)));

    let run = service.get_run(&id).unwrap();
    assert_eq!(run.status, EvalRunStatus::Failed);
    let error = run.error.clone().unwrap();
    assert_eq!(error.code, "ValueError");
    assert_eq!(error.title, "ValueError: bad eval input");
    assert!(log_lines(&run)
        .iter()
        .any(|l| l == "Exception caught - type: ValueError, message: ValueError: bad eval input"));
}

#[tokio::test]
async fn panicking_entrypoint_fails_the_run() {
    let (_dir, store) = project();
    let entrypoint = FakeEntrypoint::new(|_, _| panic!("evaluator blew up"));
    let service = service(store, entrypoint);
    let id = register(&service, "smoke", "main");

    let err = service.execute(&id).await.unwrap_err();
    assert!(matches!(&err, EvalRunError::Panicked(msg) if msg == "evaluator blew up"));
    assert_eq!(
        service.get_run(&id).unwrap().status,
        EvalRunStatus::Failed
    );
}

#[tokio::test]
async fn missing_eval_set_fails_before_evaluating() {
    let (_dir, store) = project();
    let entrypoint = FakeEntrypoint::new(|_, _| Ok(EvalOutcome::default()));
    let service = service(store, entrypoint.clone());
    let id = register(&service, "does-not-exist", "main");

    let err = service.execute(&id).await.unwrap_err();
    assert!(matches!(err, EvalRunError::EvalSetNotFound(_)));
    assert!(entrypoint.contexts().is_empty());
    assert_eq!(
        service.get_run(&id).unwrap().error.unwrap().code,
        "EvalSetNotFound"
    );
}

#[tokio::test]
async fn unknown_run_is_an_error() {
    let (_dir, store) = project();
    let service = service(store, FakeEntrypoint::new(|_, _| Ok(EvalOutcome::default())));
    assert!(matches!(
        service.execute("nope").await,
        Err(EvalRunError::RunNotFound(_))
    ));
}

// ── Entrypoint discovery ──

#[tokio::test]
async fn single_entrypoint_is_discovered() {
    let (_dir, store) = project();
    let entrypoint = FakeEntrypoint::new(|_, _| Ok(EvalOutcome::default()));
    let service = service(store, entrypoint.clone());
    let id = register(&service, "smoke", "");

    service.execute(&id).await.unwrap();

    assert_eq!(entrypoint.contexts()[0].entrypoint, "main");
    assert!(log_lines(&service.get_run(&id).unwrap())
        .iter()
        .any(|l| l == "Auto-discovered entrypoint: main"));
}

#[tokio::test]
async fn ambiguous_entrypoints_fail_discovery() {
    let (_dir, store) = project();
    let factory = Arc::new(
        FakeFactory::new()
            .with_script("one", |_, _| Ok(RuntimeResult::successful(json!({}))))
            .with_script("two", |_, _| Ok(RuntimeResult::successful(json!({})))),
    );
    let service = EvalRunService::builder(
        factory,
        FakeEntrypoint::new(|_, _| Ok(EvalOutcome::default())),
        store,
    )
    .build();
    let id = register(&service, "smoke", "");

    let err = service.execute(&id).await.unwrap_err();
    assert!(matches!(err, EvalRunError::EntrypointDiscovery { found: 2 }));
}

// ── Reporting ──

fn progress_entrypoint() -> Arc<FakeEntrypoint> {
    FakeEntrypoint::new(|context, events| {
        events.publish(EvalProgress::SetStarted {
            eval_set_run_id: context.run_id.clone(),
            eval_set: "smoke".into(),
            evaluations: 1,
        });
        let results: EvalSetResults = serde_json::from_value(scores_payload(&[1.0])).unwrap();
        events.publish(EvalProgress::SetCompleted {
            eval_set_run_id: context.run_id.clone(),
            overall_score: 1.0,
        });
        Ok(EvalOutcome {
            output: Some(serde_json::to_value(results).unwrap()),
        })
    })
}

fn reporting_service(
    store: EvalSetStore,
    project_id: Option<&str>,
    reporter: Arc<dyn ProgressReporter>,
) -> EvalRunService {
    EvalRunService::builder(Arc::new(FakeFactory::new()), progress_entrypoint(), store)
        .reporting(ReportingConfig::new(project_id.map(str::to_string)))
        .remote_reporter(reporter)
        .build()
}

#[tokio::test]
async fn remote_reporter_receives_progress_when_configured() {
    let (_dir, store) = project();
    let recorder = Arc::new(Recorder::default());
    let service = reporting_service(store, Some("proj-1"), recorder.clone());
    let id = register(&service, "smoke", "main");

    service.execute(&id).await.unwrap();

    assert_eq!(recorder.0.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn reporting_is_skipped_without_project_or_when_disabled() {
    let (_dir, store) = project();
    let recorder = Arc::new(Recorder::default());
    let service = reporting_service(store.clone(), None, recorder.clone());
    let id = register(&service, "smoke", "main");
    service.execute(&id).await.unwrap();
    assert!(recorder.0.lock().unwrap().is_empty());
    assert!(log_lines(&service.get_run(&id).unwrap())
        .iter()
        .any(|l| l.contains("DEVCONSOLE_PROJECT_ID")));

    let service = reporting_service(store, Some("proj-1"), recorder.clone());
    let mut run = EvalRun::new("smoke", "main");
    run.no_report = true;
    let id = run.id.clone();
    service.register_run(run);
    service.execute(&id).await.unwrap();
    assert!(recorder.0.lock().unwrap().is_empty());
}

#[tokio::test]
async fn json_lines_reporter_writes_project_results() {
    let (dir, store) = project();
    let path = dir.path().join("reports/proj-1.jsonl");
    let service = reporting_service(store, Some("proj-1"), Arc::new(JsonLinesReporter::new(&path)));
    let id = register(&service, "smoke", "main");

    service.execute(&id).await.unwrap();

    let raw = std::fs::read_to_string(Path::new(&path)).unwrap();
    assert_eq!(raw.lines().count(), 2);
}

// ── Factory lifecycle ──

#[tokio::test]
async fn factory_is_disposed_after_every_eval_run() {
    let (_dir, store) = project();
    let factory = Arc::new(FakeFactory::new());
    let service = EvalRunService::builder(
        factory.clone(),
        FakeEntrypoint::new(|_, _| Ok(EvalOutcome::default())),
        store,
    )
    .build();

    let ok = register(&service, "smoke", "main");
    service.execute(&ok).await.unwrap();
    assert_eq!(factory.factory_disposals.load(Ordering::SeqCst), 1);

    let missing = register(&service, "no-such-set", "main");
    assert!(service.execute(&missing).await.is_err());
    assert_eq!(factory.factory_disposals.load(Ordering::SeqCst), 2);
}

// ── Trace routing ──

#[tokio::test]
async fn traces_are_upserted_by_span_id() {
    let (_dir, store) = project();
    let service = service(store, FakeEntrypoint::new(|_, _| Ok(EvalOutcome::default())));
    let id = register(&service, "smoke", "main");

    service.handle_trace(TraceMessage::new(&id, "t1", "s1", "eval", SpanStatus::Started));
    service.handle_trace(TraceMessage::new(&id, "t1", "s2", "case", SpanStatus::Started));
    service.handle_trace(TraceMessage::new(&id, "t1", "s1", "eval", SpanStatus::Completed));

    let run = service.get_run(&id).unwrap();
    assert_eq!(run.traces.len(), 2);
    assert_eq!(run.traces[0].span_id, "s1");
    assert_eq!(run.traces[0].status, SpanStatus::Completed);
    assert_eq!(run.traces[1].status, SpanStatus::Started);
}

// ── Run table ──

#[tokio::test]
async fn runs_are_listed_per_eval_set() {
    let (_dir, store) = project();
    let service = service(store, FakeEntrypoint::new(|_, _| Ok(EvalOutcome::default())));
    let first = register(&service, "evaluations/eval-sets/smoke.json", "main");
    let second = register(&service, "smoke", "main");
    register(&service, "other", "main");

    let runs = service.get_runs_for_eval_set("smoke");
    assert_eq!(runs.len(), 2);
    let ids: Vec<&str> = runs.iter().map(|r| r.id.as_str()).collect();
    assert!(ids.contains(&first.as_str()));
    assert!(ids.contains(&second.as_str()));
    assert!(runs[0].start_time >= runs[1].start_time);
}
