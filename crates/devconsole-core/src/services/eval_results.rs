//! Evaluation output payloads and the best-effort parser that turns them
//! into [`EvaluationResult`]s.
//!
//! Sources are tried in order: the entry point's inline output (a JSON
//! string or an object), then the run's output file. Anything that does not
//! parse falls through to the next source; with no usable source the result
//! list is empty. Inside a payload, fields are read leniently: a null or
//! mistyped field takes its default, and a malformed row is dropped on its
//! own without discarding its siblings.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::{EvaluationResult, EvaluatorResult};

const UNKNOWN: &str = "Unknown";

/// Top-level evaluation output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalSetResults {
    #[serde(default, deserialize_with = "lenient_rows")]
    pub evaluation_set_results: Vec<EvaluationSetResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSetResult {
    #[serde(default, deserialize_with = "lenient_name")]
    pub evaluation_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_name")]
    pub evaluation_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_rows")]
    pub evaluation_run_results: Vec<EvaluationRunResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRunResult {
    #[serde(default, deserialize_with = "lenient_name")]
    pub evaluator_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_score")]
    pub result: EvaluatorScore,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatorScore {
    #[serde(default, deserialize_with = "lenient_number")]
    pub score: f64,
    #[serde(default)]
    pub details: Value,
    #[serde(default, deserialize_with = "lenient_number")]
    pub evaluation_time: f64,
    #[serde(default, deserialize_with = "lenient_text")]
    pub justification: String,
}

/// Numbers as-is, booleans as 1.0/0.0, numeric strings parsed, else 0.0.
fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or_default(),
        Value::Bool(b) => f64::from(u8::from(b)),
        Value::String(s) => s.trim().parse().unwrap_or_default(),
        _ => 0.0,
    })
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn lenient_name<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

/// A non-object result (including null) scores as the default.
fn lenient_score<'de, D: Deserializer<'de>>(deserializer: D) -> Result<EvaluatorScore, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Keep every row that parses; a non-array is treated as empty.
fn lenient_rows<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Value::Array(rows) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            serde_json::from_value(row)
                .map_err(|e| debug!(error = %e, "skipping malformed eval result row"))
                .ok()
        })
        .collect())
}

impl EvalSetResults {
    /// Convert into domain results, filling missing names with `Unknown`.
    pub fn into_evaluation_results(self) -> Vec<EvaluationResult> {
        self.evaluation_set_results
            .into_iter()
            .map(|evaluation| {
                let eval_name = evaluation
                    .evaluation_name
                    .unwrap_or_else(|| UNKNOWN.to_string());
                let eval_id = evaluation
                    .evaluation_id
                    .unwrap_or_else(|| eval_name.clone());
                let evaluator_results = evaluation
                    .evaluation_run_results
                    .into_iter()
                    .map(|run| {
                        let evaluator_name =
                            run.evaluator_name.unwrap_or_else(|| UNKNOWN.to_string());
                        EvaluatorResult {
                            evaluator_id: evaluator_name.clone(),
                            evaluator_name,
                            score: run.result.score,
                            details: details_text(run.result.details),
                            evaluation_time: run.result.evaluation_time,
                            justification: run.result.justification,
                        }
                    })
                    .collect();
                EvaluationResult {
                    eval_id,
                    eval_name,
                    evaluator_results,
                }
            })
            .collect()
    }
}

fn details_text(details: Value) -> String {
    match details {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Parse evaluation results from inline output, then from `output_file`.
pub fn parse_results(output: Option<&Value>, output_file: Option<&Path>) -> Vec<EvaluationResult> {
    inline_payload(output)
        .or_else(|| output_file.and_then(file_payload))
        .map(EvalSetResults::into_evaluation_results)
        .unwrap_or_default()
}

fn inline_payload(output: Option<&Value>) -> Option<EvalSetResults> {
    let data = match output? {
        Value::String(raw) => serde_json::from_str(raw)
            .map_err(|e| debug!(error = %e, "inline eval output is not JSON"))
            .ok()?,
        Value::Object(map) => Value::Object(map.clone()),
        _ => return None,
    };
    payload_from(data)
}

fn file_payload(path: &Path) -> Option<EvalSetResults> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| debug!(path = %path.display(), error = %e, "eval output file unreadable"))
        .ok()?;
    let data = serde_json::from_str(&raw)
        .map_err(|e| debug!(path = %path.display(), error = %e, "eval output file is not JSON"))
        .ok()?;
    payload_from(data)
}

/// Only non-empty JSON objects count as a payload.
fn payload_from(data: Value) -> Option<EvalSetResults> {
    match &data {
        Value::Object(map) if !map.is_empty() => serde_json::from_value(data)
            .map_err(|e| debug!(error = %e, "eval output has an unexpected shape"))
            .ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(score: f64) -> Value {
        json!({
            "evaluationSetResults": [{
                "evaluationName": "greets Ada",
                "evaluationId": "e1",
                "evaluationRunResults": [{
                    "evaluatorName": "exact",
                    "result": {"score": score, "details": {"diff": []}, "evaluationTime": 0.2}
                }]
            }]
        })
    }

    #[test]
    fn inline_object_is_used() {
        let results = parse_results(Some(&payload(1.0)), None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].eval_id, "e1");
        let evaluator = &results[0].evaluator_results[0];
        assert_eq!(evaluator.evaluator_id, "exact");
        assert_eq!(evaluator.details, r#"{"diff":[]}"#);
        assert_eq!(evaluator.evaluation_time, 0.2);
    }

    #[test]
    fn inline_string_is_parsed() {
        let raw = Value::String(payload(0.5).to_string());
        let results = parse_results(Some(&raw), None);
        assert_eq!(results[0].evaluator_results[0].score, 0.5);
    }

    #[test]
    fn missing_names_default_to_unknown() {
        let raw = json!({"evaluationSetResults": [{"evaluationRunResults": [{"result": {}}]}]});
        let results = parse_results(Some(&raw), None);
        assert_eq!(results[0].eval_name, "Unknown");
        assert_eq!(results[0].eval_id, "Unknown");
        assert_eq!(results[0].evaluator_results[0].evaluator_name, "Unknown");
        assert_eq!(results[0].evaluator_results[0].score, 0.0);
    }

    #[test]
    fn null_fields_take_their_defaults() {
        let raw = json!({"evaluationSetResults": [{
            "evaluationName": "nulls",
            "evaluationRunResults": [{
                "evaluatorName": null,
                "result": {"score": 0.7, "justification": null, "evaluationTime": null}
            }]
        }]});
        let results = parse_results(Some(&raw), None);
        assert_eq!(results.len(), 1);
        let evaluator = &results[0].evaluator_results[0];
        assert_eq!(evaluator.score, 0.7);
        assert_eq!(evaluator.justification, "");
        assert_eq!(evaluator.evaluation_time, 0.0);
        assert_eq!(evaluator.evaluator_name, "Unknown");
    }

    #[test]
    fn mistyped_score_does_not_discard_other_evaluations() {
        let raw = json!({"evaluationSetResults": [
            {"evaluationId": "a", "evaluationRunResults": [{"result": {"score": true}}]},
            {"evaluationId": "b", "evaluationRunResults": [{"result": {"score": "0.25"}}]},
            {"evaluationId": "c", "evaluationRunResults": [{"result": null}, 7]},
            "not an evaluation"
        ]});
        let results = parse_results(Some(&raw), None);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].evaluator_results[0].score, 1.0);
        assert_eq!(results[1].evaluator_results[0].score, 0.25);
        assert_eq!(results[2].evaluator_results.len(), 1);
        assert_eq!(results[2].evaluator_results[0].score, 0.0);
    }

    #[test]
    fn empty_object_falls_through_to_nothing() {
        assert!(parse_results(Some(&json!({})), None).is_empty());
        assert!(parse_results(Some(&json!([1, 2])), None).is_empty());
        assert!(parse_results(None, None).is_empty());
    }
}
