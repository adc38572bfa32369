//! Evaluation progress events and the reporters that consume them.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::EvaluationResult;
use crate::sync::lock;

/// Environment variable naming the project results are reported to.
pub const PROJECT_ID_ENV: &str = "DEVCONSOLE_PROJECT_ID";

/// Progress published by an evaluation entry point while it works.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EvalProgress {
    SetStarted {
        eval_set_run_id: String,
        eval_set: String,
        evaluations: usize,
    },
    EvaluationStarted {
        eval_id: String,
        eval_name: String,
    },
    EvaluationCompleted {
        result: EvaluationResult,
    },
    SetCompleted {
        eval_set_run_id: String,
        overall_score: f64,
    },
}

/// Consumer of [`EvalProgress`] events.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, event: &EvalProgress);
}

/// Fan-out of progress events to the reporters subscribed for one run.
#[derive(Clone, Default)]
pub struct EvalEventBus {
    reporters: Arc<Mutex<Vec<Arc<dyn ProgressReporter>>>>,
}

impl EvalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, reporter: Arc<dyn ProgressReporter>) {
        lock(&self.reporters).push(reporter);
    }

    pub fn publish(&self, event: EvalProgress) {
        let reporters = lock(&self.reporters).clone();
        for reporter in reporters {
            reporter.on_progress(&event);
        }
    }

    pub fn reporter_count(&self) -> usize {
        lock(&self.reporters).len()
    }
}

/// Writes progress to the tracing log.
#[derive(Debug, Clone)]
pub struct ConsoleReporter {
    run_id: String,
}

impl ConsoleReporter {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }
}

impl ProgressReporter for ConsoleReporter {
    fn on_progress(&self, event: &EvalProgress) {
        match event {
            EvalProgress::SetStarted {
                eval_set,
                evaluations,
                ..
            } => info!(run_id = %self.run_id, eval_set = %eval_set, evaluations, "eval set started"),
            EvalProgress::EvaluationStarted { eval_id, eval_name } => {
                info!(run_id = %self.run_id, eval_id = %eval_id, "running {eval_name}")
            }
            EvalProgress::EvaluationCompleted { result } => info!(
                run_id = %self.run_id,
                eval_id = %result.eval_id,
                passed = result.passed(),
                "evaluation finished"
            ),
            EvalProgress::SetCompleted { overall_score, .. } => {
                info!(run_id = %self.run_id, overall_score, "eval set completed")
            }
        }
    }
}

/// Appends each progress event as one JSON line to a project results file.
#[derive(Debug, Clone)]
pub struct JsonLinesReporter {
    path: PathBuf,
}

impl JsonLinesReporter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, event: &EvalProgress) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

impl ProgressReporter for JsonLinesReporter {
    fn on_progress(&self, event: &EvalProgress) {
        if let Err(e) = self.append(event) {
            warn!(path = %self.path.display(), error = %e, "failed to report eval progress");
        }
    }
}

/// Where eval results are reported, if anywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportingConfig {
    pub project_id: Option<String>,
}

impl ReportingConfig {
    pub fn new(project_id: Option<String>) -> Self {
        Self {
            project_id: project_id.filter(|id| !id.trim().is_empty()),
        }
    }

    /// Read the project ID from `DEVCONSOLE_PROJECT_ID`.
    pub fn from_env() -> Self {
        Self::new(std::env::var(PROJECT_ID_ENV).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<EvalProgress>>);

    impl ProgressReporter for Collect {
        fn on_progress(&self, event: &EvalProgress) {
            lock(&self.0).push(event.clone());
        }
    }

    #[test]
    fn bus_fans_out_to_every_reporter() {
        let bus = EvalEventBus::new();
        let a = Arc::new(Collect::default());
        let b = Arc::new(Collect::default());
        bus.subscribe(a.clone());
        bus.subscribe(b.clone());

        bus.publish(EvalProgress::EvaluationStarted {
            eval_id: "e1".into(),
            eval_name: "first".into(),
        });

        assert_eq!(bus.reporter_count(), 2);
        assert_eq!(lock(&a.0).len(), 1);
        assert_eq!(lock(&b.0).len(), 1);
    }

    #[test]
    fn json_lines_reporter_appends() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = JsonLinesReporter::new(dir.path().join("results/p1.jsonl"));
        reporter.on_progress(&EvalProgress::SetCompleted {
            eval_set_run_id: "s1".into(),
            overall_score: 0.5,
        });
        reporter.on_progress(&EvalProgress::SetCompleted {
            eval_set_run_id: "s2".into(),
            overall_score: 1.0,
        });

        let raw = std::fs::read_to_string(reporter.path()).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "set_completed");
        assert_eq!(first["eval_set_run_id"], "s1");
    }

    #[test]
    fn blank_project_id_disables_reporting() {
        assert_eq!(ReportingConfig::new(Some("  ".into())).project_id, None);
        assert_eq!(
            ReportingConfig::new(Some("p1".into())).project_id.as_deref(),
            Some("p1")
        );
    }
}
