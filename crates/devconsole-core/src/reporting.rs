use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::domain::EvalRun;

/// Aggregate section persisted next to the run in eval run artifacts.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EvalRunSummaryArtifact {
    pub overall_score: f64,
    pub total_evaluations: usize,
    pub passed_evaluations: usize,
    pub evaluator_scores: BTreeMap<String, f64>,
    pub duration: String,
}

impl EvalRunSummaryArtifact {
    pub fn from_run(run: &EvalRun) -> Self {
        Self {
            overall_score: run.overall_score(),
            total_evaluations: run.total_evaluations(),
            passed_evaluations: run.passed_evaluations(),
            evaluator_scores: run.evaluator_scores(),
            duration: run.duration_display(),
        }
    }
}

#[derive(Serialize)]
struct EvalRunArtifact<'a> {
    run: Value,
    summary: &'a EvalRunSummaryArtifact,
}

/// Write an eval run and its summary as pretty JSON.
pub fn write_eval_run_json(path: &Path, run: &EvalRun) -> Result<()> {
    let summary = EvalRunSummaryArtifact::from_run(run);
    let artifact = EvalRunArtifact {
        run: run.to_value().context("serialize eval run")?,
        summary: &summary,
    };
    let content = serde_json::to_string_pretty(&artifact).context("serialize eval artifact")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
    }
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render a markdown summary of an eval run.
pub fn render_eval_summary_md(run: &EvalRun) -> String {
    let summary = EvalRunSummaryArtifact::from_run(run);
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", run.name));
    out.push_str(&format!(
        "- eval set: `{}`\n- status: {}\n- overall score: {:.1}%\n- passed: {}/{}\n- duration: {}\n",
        run.eval_set_name(),
        run.status.as_str(),
        summary.overall_score * 100.0,
        summary.passed_evaluations,
        summary.total_evaluations,
        summary.duration,
    ));

    if let Some(error) = &run.error {
        out.push_str(&format!("\n## Error\n- `{}`: {}\n", error.code, error.title));
    }

    if !summary.evaluator_scores.is_empty() {
        out.push_str("\n## Evaluators\n");
        for (evaluator, score) in &summary.evaluator_scores {
            out.push_str(&format!("- `{}`: {:.2}\n", evaluator, score));
        }
    }

    if !run.evaluation_results.is_empty() {
        out.push_str("\n## Evaluations\n");
        for result in &run.evaluation_results {
            let mark = if result.passed() { "pass" } else { "fail" };
            out.push_str(&format!("- {} ({}): {}\n", result.eval_name, result.eval_id, mark));
        }
    }
    out
}
