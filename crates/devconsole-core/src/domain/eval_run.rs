//! Evaluation runs and their scored results.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::error::ErrorContract;
use super::messages::{LogMessage, TraceMessage};

/// Status of an eval run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvalRunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl EvalRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvalRunStatus::Pending => "pending",
            EvalRunStatus::Running => "running",
            EvalRunStatus::Completed => "completed",
            EvalRunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EvalRunStatus::Completed | EvalRunStatus::Failed)
    }
}

/// Score from one evaluator for one evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluatorResult {
    pub evaluator_id: String,
    #[serde(default)]
    pub evaluator_name: String,
    /// In `0.0..=1.0`.
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub evaluation_time: f64,
    #[serde(default)]
    pub justification: String,
}

/// All evaluator results for one evaluation case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResult {
    pub eval_id: String,
    #[serde(default)]
    pub eval_name: String,
    #[serde(default)]
    pub evaluator_results: Vec<EvaluatorResult>,
}

impl EvaluationResult {
    pub fn new(eval_id: impl Into<String>, eval_name: impl Into<String>) -> Self {
        Self {
            eval_id: eval_id.into(),
            eval_name: eval_name.into(),
            evaluator_results: Vec::new(),
        }
    }

    /// True when every evaluator scored exactly 1.0.
    pub fn passed(&self) -> bool {
        self.evaluator_results.iter().all(|r| r.score == 1.0)
    }
}

fn default_workers() -> usize {
    1
}

/// One execution of an eval set against an entrypoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalRun {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub eval_set_path: String,
    #[serde(default)]
    pub entrypoint: String,
    #[serde(default)]
    pub status: EvalRunStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub evaluator_refs: Vec<String>,
    #[serde(default)]
    pub evaluation_results: Vec<EvaluationResult>,
    #[serde(default)]
    pub error: Option<ErrorContract>,

    // Execution options
    #[serde(default)]
    pub no_report: bool,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub eval_set_run_id: Option<String>,
    #[serde(default)]
    pub enable_mocker_cache: bool,
    #[serde(default)]
    pub eval_ids: Vec<String>,
    #[serde(default)]
    pub report_coverage: bool,
    #[serde(default)]
    pub output_file: Option<String>,

    #[serde(skip)]
    pub logs: Vec<LogMessage>,
    #[serde(skip)]
    pub traces: Vec<TraceMessage>,
}

impl EvalRun {
    /// New pending run with an 8-character ID and default options.
    pub fn new(eval_set_path: impl Into<String>, entrypoint: impl Into<String>) -> Self {
        let id: String = Uuid::new_v4().to_string().chars().take(8).collect();
        Self {
            name: default_name(&id),
            id,
            eval_set_path: eval_set_path.into(),
            entrypoint: entrypoint.into(),
            status: EvalRunStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            evaluator_refs: Vec::new(),
            evaluation_results: Vec::new(),
            error: None,
            no_report: false,
            workers: default_workers(),
            eval_set_run_id: None,
            enable_mocker_cache: false,
            eval_ids: Vec::new(),
            report_coverage: false,
            output_file: None,
            logs: Vec::new(),
            traces: Vec::new(),
        }
    }

    /// Replace the name; an empty name falls back to `Run: <id>`.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.name = if name.is_empty() {
            default_name(&self.id)
        } else {
            name
        };
        self
    }

    /// Mean of every evaluator score, 0.0 when there are none.
    pub fn overall_score(&self) -> f64 {
        let scores: Vec<f64> = self
            .evaluation_results
            .iter()
            .flat_map(|e| e.evaluator_results.iter().map(|r| r.score))
            .collect();
        mean(&scores)
    }

    /// Mean score per evaluator ID across all evaluations.
    pub fn evaluator_scores(&self) -> BTreeMap<String, f64> {
        let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for result in self
            .evaluation_results
            .iter()
            .flat_map(|e| e.evaluator_results.iter())
        {
            grouped
                .entry(result.evaluator_id.clone())
                .or_default()
                .push(result.score);
        }
        grouped
            .into_iter()
            .map(|(id, scores)| (id, mean(&scores)))
            .collect()
    }

    pub fn total_evaluations(&self) -> usize {
        self.evaluation_results.len()
    }

    pub fn passed_evaluations(&self) -> usize {
        self.evaluation_results.iter().filter(|e| e.passed()).count()
    }

    /// Insert or replace the trace with the same `span_id`. Returns `true`
    /// when an existing entry was replaced.
    pub fn upsert_trace(&mut self, trace: TraceMessage) -> bool {
        match self.traces.iter_mut().find(|t| t.span_id == trace.span_id) {
            Some(existing) => {
                *existing = trace;
                true
            }
            None => {
                self.traces.push(trace);
                false
            }
        }
    }

    /// Elapsed time; measured against now while the run has no end time.
    pub fn duration(&self) -> Duration {
        self.end_time.unwrap_or_else(Utc::now) - self.start_time
    }

    /// Duration formatted as seconds with one decimal, e.g. `2.5s`.
    pub fn duration_display(&self) -> String {
        format!("{:.1}s", self.duration().num_milliseconds() as f64 / 1000.0)
    }

    /// File stem of `eval_set_path`.
    pub fn eval_set_name(&self) -> String {
        Path::new(&self.eval_set_path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Plain JSON form with snake_case keys. Logs and traces are omitted.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        let mut run: EvalRun = serde_json::from_value(value)?;
        if run.name.is_empty() {
            run.name = default_name(&run.id);
        }
        for evaluation in &mut run.evaluation_results {
            if evaluation.eval_name.is_empty() {
                evaluation.eval_name = evaluation.eval_id.clone();
            }
            for result in &mut evaluation.evaluator_results {
                if result.evaluator_name.is_empty() {
                    result.evaluator_name = result.evaluator_id.clone();
                }
            }
        }
        Ok(run)
    }
}

fn default_name(id: &str) -> String {
    format!("Run: {id}")
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::messages::LogLevel;
    use serde_json::json;

    fn scored(evaluator: &str, score: f64) -> EvaluatorResult {
        EvaluatorResult {
            evaluator_id: evaluator.into(),
            evaluator_name: evaluator.into(),
            score,
            details: String::new(),
            evaluation_time: 0.0,
            justification: String::new(),
        }
    }

    #[test]
    fn new_run_defaults() {
        let run = EvalRun::new("evaluations/eval-sets/smoke.json", "main");
        assert_eq!(run.id.len(), 8);
        assert_eq!(run.name, format!("Run: {}", run.id));
        assert_eq!(run.workers, 1);
        assert_eq!(run.status, EvalRunStatus::Pending);
        assert_eq!(run.eval_set_name(), "smoke");
    }

    #[test]
    fn overall_and_per_evaluator_scores() {
        let mut run = EvalRun::new("set.json", "main");
        let mut first = EvaluationResult::new("e1", "first");
        first.evaluator_results = vec![scored("exact", 1.0), scored("judge", 0.5)];
        let mut second = EvaluationResult::new("e2", "second");
        second.evaluator_results = vec![scored("exact", 1.0)];
        run.evaluation_results = vec![first, second];

        assert!((run.overall_score() - 2.5 / 3.0).abs() < 1e-9);
        assert!(!run.evaluation_results[0].passed());
        assert!(run.evaluation_results[1].passed());
        assert_eq!(run.passed_evaluations(), 1);

        let per = run.evaluator_scores();
        assert_eq!(per["exact"], 1.0);
        assert_eq!(per["judge"], 0.5);
    }

    #[test]
    fn upsert_trace_replaces_by_span_id() {
        use crate::domain::messages::SpanStatus;

        let mut run = EvalRun::new("smoke.json", "agent");
        let started = TraceMessage::new(&run.id, "t", "s1", "eval", SpanStatus::Started);
        let other = TraceMessage::new(&run.id, "t", "s2", "case", SpanStatus::Started);
        let done = TraceMessage::new(&run.id, "t", "s1", "eval", SpanStatus::Completed);

        assert!(!run.upsert_trace(started));
        assert!(!run.upsert_trace(other));
        assert!(run.upsert_trace(done));

        assert_eq!(run.traces.len(), 2);
        assert_eq!(run.traces[0].span_id, "s1");
        assert_eq!(run.traces[0].status, SpanStatus::Completed);
        assert_eq!(run.traces[1].span_id, "s2");
    }

    #[test]
    fn empty_run_scores_zero() {
        let run = EvalRun::new("set.json", "main");
        assert_eq!(run.overall_score(), 0.0);
        assert!(run.evaluator_scores().is_empty());
        assert!(EvaluationResult::new("e", "e").passed());
    }

    #[test]
    fn to_value_uses_snake_case_and_skips_logs() {
        let mut run = EvalRun::new("set.json", "main");
        run.logs.push(LogMessage::new(run.id.clone(), LogLevel::Info, "x"));
        let raw = run.to_value().unwrap();
        assert!(raw.get("eval_set_path").is_some());
        assert!(raw.get("no_report").is_some());
        assert!(raw.get("logs").is_none());
        assert!(raw.get("traces").is_none());
    }

    #[test]
    fn from_value_fills_defaults() {
        let raw = json!({
            "id": "abcd1234",
            "eval_set_path": "sets/smoke.json",
            "start_time": "2026-01-01T00:00:00Z",
            "evaluation_results": [
                {"eval_id": "e1", "evaluator_results": [{"evaluator_id": "exact", "score": 1.0}]}
            ]
        });
        let run = EvalRun::from_value(raw).unwrap();
        assert_eq!(run.name, "Run: abcd1234");
        assert_eq!(run.workers, 1);
        assert_eq!(run.evaluation_results[0].eval_name, "e1");
        assert_eq!(
            run.evaluation_results[0].evaluator_results[0].evaluator_name,
            "exact"
        );
    }
}
