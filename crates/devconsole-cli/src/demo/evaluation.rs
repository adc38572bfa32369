//! Evaluation entry point for the demo runtimes.
//!
//! Each evaluation's inputs go through a fresh runtime instance, and the
//! output is scored by every evaluator the eval set references. Only the
//! `exact-match` and `contains` evaluator types are scored; other types
//! score 0 with an explanation in the details.

use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};

use devconsole_core::services::{
    EvalSetResults, EvaluationRunResult, EvaluationSetResult, EvaluatorScore,
};
use devconsole_core::{
    EvalContext, EvalEntrypoint, EvalEventBus, EvalOutcome, EvalProgress, ExecuteOptions,
    RuntimeContext, RuntimeError, RuntimeStatus,
};
use devconsole_store::{get_evaluator_type, EvalSet, Evaluation, EvaluatorStore};

const EXACT_MATCH: &str = "exact-match";
const CONTAINS: &str = "contains";

/// Evaluator reference resolved against the evaluator store.
struct ResolvedEvaluator {
    id: String,
    type_id: String,
    default_criteria: Option<Value>,
}

pub struct DemoEvaluator {
    evaluators: EvaluatorStore,
}

impl DemoEvaluator {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            evaluators: EvaluatorStore::new(base_dir),
        }
    }

    fn resolve(&self, context: &EvalContext, evaluator_ref: &str) -> ResolvedEvaluator {
        if let Some(evaluator) = self.evaluators.load_evaluator(evaluator_ref) {
            return ResolvedEvaluator {
                id: evaluator_ref.to_string(),
                type_id: evaluator.evaluator_type_id.clone(),
                default_criteria: evaluator.default_criteria().cloned(),
            };
        }
        if get_evaluator_type(evaluator_ref).is_none() {
            context
                .telemetry
                .warn(format!("Evaluator '{evaluator_ref}' not found"));
        }
        ResolvedEvaluator {
            id: evaluator_ref.to_string(),
            type_id: evaluator_ref.to_string(),
            default_criteria: None,
        }
    }

    async fn run_case(
        &self,
        context: &EvalContext,
        evaluators: &[ResolvedEvaluator],
        evaluation: Evaluation,
        events: &EvalEventBus,
    ) -> EvaluationSetResult {
        events.publish(EvalProgress::EvaluationStarted {
            eval_id: evaluation.id.clone(),
            eval_name: evaluation.name.clone(),
        });
        let started = Instant::now();
        let output = invoke(context, &evaluation).await;
        let elapsed = started.elapsed().as_secs_f64();

        let evaluation_run_results = evaluators
            .iter()
            .map(|evaluator| {
                let criteria = evaluation
                    .evaluation_criterias
                    .get(&evaluator.id)
                    .or(evaluator.default_criteria.as_ref());
                EvaluationRunResult {
                    evaluator_name: Some(evaluator.id.clone()),
                    result: score(&evaluator.type_id, criteria, &output, elapsed),
                }
            })
            .collect();

        let result = EvaluationSetResult {
            evaluation_name: Some(evaluation.name.clone()),
            evaluation_id: Some(evaluation.id.clone()),
            evaluation_run_results,
        };
        let completed = EvalSetResults {
            evaluation_set_results: vec![result.clone()],
        };
        for result in completed.into_evaluation_results() {
            events.publish(EvalProgress::EvaluationCompleted { result });
        }
        result
    }
}

/// Execute one evaluation through a fresh runtime instance.
async fn invoke(context: &EvalContext, evaluation: &Evaluation) -> Result<Value, String> {
    let runtime_context = RuntimeContext::new(
        format!("{}:{}", context.run_id, evaluation.id),
        context.telemetry.clone(),
    );
    let runtime = context
        .factory
        .new_runtime(&context.entrypoint, runtime_context)
        .await
        .map_err(|e| e.to_string())?;
    let outcome = runtime
        .execute(Some(evaluation.inputs.clone()), ExecuteOptions::default())
        .await;
    if let Err(e) = runtime.dispose().await {
        context
            .telemetry
            .warn(format!("Failed to dispose runtime: {e}"));
    }

    let result = outcome.map_err(|e| e.to_string())?;
    match result.status {
        RuntimeStatus::Successful => Ok(result.output.unwrap_or(Value::Null)),
        RuntimeStatus::Suspended => Err("runtime suspended waiting for input".to_string()),
        RuntimeStatus::Faulted => Err(result
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "runtime faulted".to_string())),
    }
}

fn score(
    type_id: &str,
    criteria: Option<&Value>,
    output: &Result<Value, String>,
    evaluation_time: f64,
) -> EvaluatorScore {
    let scored = |score: f64, details: Value, justification: &str| EvaluatorScore {
        score,
        details,
        evaluation_time,
        justification: justification.to_string(),
    };

    let actual = match output {
        Ok(actual) => actual,
        Err(error) => return scored(0.0, json!({"error": error}), "Runtime did not produce output"),
    };

    match type_id {
        EXACT_MATCH => match criteria.and_then(|c| c.get("expectedOutput")) {
            Some(expected) if expected == actual => scored(1.0, Value::Null, "Output matches"),
            Some(expected) => scored(
                0.0,
                json!({"expected": expected, "actual": actual}),
                "Output differs from the expected output",
            ),
            None => scored(0.0, json!({"error": "missing expectedOutput"}), ""),
        },
        CONTAINS => match criteria.and_then(|c| c.get("searchText")).and_then(Value::as_str) {
            Some(needle) => {
                let haystack = match actual {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if haystack.contains(needle) {
                    scored(1.0, Value::Null, "Output contains the search text")
                } else {
                    scored(
                        0.0,
                        json!({"searchText": needle, "actual": actual}),
                        "Search text not found in output",
                    )
                }
            }
            None => scored(0.0, json!({"error": "missing searchText"}), ""),
        },
        other => scored(
            0.0,
            json!({"error": format!("evaluator type '{other}' is not supported here")}),
            "",
        ),
    }
}

#[async_trait]
impl EvalEntrypoint for DemoEvaluator {
    async fn evaluate(
        &self,
        context: EvalContext,
        events: &EvalEventBus,
    ) -> Result<EvalOutcome, RuntimeError> {
        let raw = tokio::fs::read_to_string(&context.eval_set)
            .await
            .with_context(|| format!("read eval set {:?}", context.eval_set))?;
        let eval_set: EvalSet = serde_json::from_str(&raw)
            .with_context(|| format!("parse eval set {:?}", context.eval_set))?;

        let evaluators: Vec<ResolvedEvaluator> = eval_set
            .evaluator_refs
            .iter()
            .map(|r| self.resolve(&context, r))
            .collect();
        let evaluations: Vec<Evaluation> = eval_set
            .evaluations
            .into_iter()
            .filter(|e| context.eval_ids.is_empty() || context.eval_ids.contains(&e.id))
            .collect();

        let eval_set_run_id = context
            .eval_set_run_id
            .clone()
            .unwrap_or_else(|| context.run_id.clone());
        events.publish(EvalProgress::SetStarted {
            eval_set_run_id: eval_set_run_id.clone(),
            eval_set: eval_set.name.clone(),
            evaluations: evaluations.len(),
        });

        let results: Vec<EvaluationSetResult> = stream::iter(evaluations)
            .map(|evaluation| self.run_case(&context, &evaluators, evaluation, events))
            .buffered(context.workers.max(1))
            .collect()
            .await;

        let payload = EvalSetResults {
            evaluation_set_results: results,
        };
        let scores: Vec<f64> = payload
            .evaluation_set_results
            .iter()
            .flat_map(|e| e.evaluation_run_results.iter().map(|r| r.result.score))
            .collect();
        let overall_score = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        events.publish(EvalProgress::SetCompleted {
            eval_set_run_id,
            overall_score,
        });

        let body = serde_json::to_string_pretty(&payload).context("serialize eval results")?;
        if let Some(path) = &context.output_file {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("create {:?}", parent))?;
            }
            tokio::fs::write(path, &body)
                .await
                .with_context(|| format!("write {:?}", path))?;
        }
        Ok(EvalOutcome {
            output: Some(Value::String(body)),
        })
    }
}
