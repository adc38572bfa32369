//! devconsole - drive agent runtimes and evaluations from the terminal
//!
//! ## Commands
//!
//! - `entrypoints`: list the runnable entrypoints
//! - `schema`: show an entrypoint's input/output schema and graph
//! - `run`: execute an entrypoint in run, chat or debug mode
//! - `eval`: run an eval set and report the scores
//! - `eval-sets`, `evaluators`, `types`: manage evaluation definitions

mod demo;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, Level};

use devconsole_core::services::JsonLinesReporter;
use devconsole_core::{
    render_eval_summary_md, write_eval_run_json, Breakpoints, ChannelObserver, EvalRun,
    EvalRunService, ExecutionMode, ExecutionRun, ReportingConfig, RunService, RunStatus,
    RunTelemetry, RuntimeContext, RuntimeFactory, ServiceEvent, METRICS,
};
use devconsole_store::{EvalSetStore, Evaluation, EvaluatorStore, EVALUATOR_TYPES};

use demo::{DemoEvaluator, DemoFactory};

/// Where project progress reports are appended, relative to the base dir.
const REPORTS_DIR: &str = ".devconsole/reports";

#[derive(Parser)]
#[command(name = "devconsole")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Developer console for agent runtimes and evaluations", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output and JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Project root containing `evaluations/`
    #[arg(long, global = true, env = "DEVCONSOLE_BASE_DIR", default_value = ".")]
    base_dir: PathBuf,

    /// Project that evaluation progress is reported to
    #[arg(long, global = true, env = "DEVCONSOLE_PROJECT_ID")]
    project_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List runnable entrypoints
    Entrypoints,

    /// Show the schema of an entrypoint
    Schema {
        /// Entrypoint name
        entrypoint: String,
    },

    /// Execute an entrypoint
    Run {
        /// Entrypoint name
        entrypoint: String,

        /// Input as JSON
        #[arg(short, long, default_value = "{}")]
        input: String,

        /// Execution mode: run, chat or debug
        #[arg(short, long, default_value = "run")]
        mode: ExecutionMode,

        /// Resume data for the first suspension (JSON, or plain text)
        #[arg(long)]
        resume: Option<String>,

        /// Debug breakpoints: `*` or a comma separated list of nodes
        #[arg(long)]
        breakpoints: Option<String>,
    },

    /// Run an eval set against an entrypoint
    Eval {
        /// Eval set path, file stem or ID
        eval_set: String,

        /// Entrypoint to evaluate (auto-discovered when there is only one)
        #[arg(short, long)]
        entrypoint: Option<String>,

        /// Display name of the run
        #[arg(long)]
        name: Option<String>,

        /// Where the entry point writes its raw results
        #[arg(long)]
        output_file: Option<PathBuf>,

        /// Write the finished run and its summary as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        /// Evaluations run concurrently
        #[arg(short, long, default_value = "1")]
        workers: usize,

        /// Only run these evaluation IDs
        #[arg(long = "eval-id")]
        eval_ids: Vec<String>,

        /// Do not report progress to the project
        #[arg(long)]
        no_report: bool,
    },

    /// Manage eval sets
    EvalSets {
        #[command(subcommand)]
        action: EvalSetAction,
    },

    /// Manage evaluators
    Evaluators {
        #[command(subcommand)]
        action: EvaluatorAction,
    },

    /// List evaluator types
    Types,
}

#[derive(Subcommand)]
enum EvalSetAction {
    /// List eval sets
    List,

    /// Show one eval set
    Show { id: String },

    /// Create an eval set
    Create {
        id: String,

        /// Display name (default: the ID)
        #[arg(long)]
        name: Option<String>,

        /// Evaluator IDs referenced by the set
        #[arg(long = "evaluator")]
        evaluators: Vec<String>,

        /// JSON file holding an array of evaluations
        #[arg(long)]
        evaluations: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum EvaluatorAction {
    /// List evaluators
    List,

    /// Show one evaluator
    Show { id: String },

    /// Create an evaluator
    Create {
        id: String,

        /// Evaluator type ID (see `devconsole types`)
        #[arg(long = "type")]
        type_id: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Evaluator configuration as a JSON object
        #[arg(long)]
        config: Option<String>,

        /// Default criteria as JSON
        #[arg(long)]
        criteria: Option<String>,
    },

    /// Delete an evaluator
    Delete { id: String },
}

/// Settings shared by every command.
struct Console {
    base_dir: PathBuf,
    project_id: Option<String>,
    json: bool,
}

impl Console {
    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce()) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human();
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    devconsole_core::init_tracing(cli.json, level);

    let console = Console {
        base_dir: cli.base_dir,
        project_id: cli.project_id,
        json: cli.json,
    };

    let result = match cli.command {
        Commands::Entrypoints => cmd_entrypoints(&console),
        Commands::Schema { entrypoint } => cmd_schema(&console, &entrypoint).await,
        Commands::Run {
            entrypoint,
            input,
            mode,
            resume,
            breakpoints,
        } => {
            cmd_run(
                &console,
                &entrypoint,
                &input,
                mode,
                resume,
                breakpoints.as_deref(),
            )
            .await
        }
        Commands::Eval {
            eval_set,
            entrypoint,
            name,
            output_file,
            report,
            workers,
            eval_ids,
            no_report,
        } => {
            let mut run = EvalRun::new(eval_set, entrypoint.unwrap_or_default())
                .with_name(name.unwrap_or_default());
            run.workers = workers.max(1);
            run.eval_ids = eval_ids;
            run.no_report = no_report;
            run.output_file = output_file.map(|p| p.display().to_string());
            cmd_eval(&console, run, report.as_deref()).await
        }
        Commands::EvalSets { action } => match action {
            EvalSetAction::List => cmd_eval_sets_list(&console),
            EvalSetAction::Show { id } => cmd_eval_sets_show(&console, &id),
            EvalSetAction::Create {
                id,
                name,
                evaluators,
                evaluations,
            } => cmd_eval_sets_create(
                &console,
                &id,
                name.as_deref(),
                evaluators,
                evaluations.as_deref(),
            ),
        },
        Commands::Evaluators { action } => match action {
            EvaluatorAction::List => cmd_evaluators_list(&console),
            EvaluatorAction::Show { id } => cmd_evaluators_show(&console, &id),
            EvaluatorAction::Create {
                id,
                type_id,
                description,
                config,
                criteria,
            } => cmd_evaluators_create(
                &console,
                &id,
                &type_id,
                &description,
                config.as_deref(),
                criteria.as_deref(),
            ),
            EvaluatorAction::Delete { id } => cmd_evaluators_delete(&console, &id),
        },
        Commands::Types => cmd_types(&console),
    };

    METRICS.flush();
    result
}

// ── Entrypoints ──

fn cmd_entrypoints(console: &Console) -> Result<()> {
    let entrypoints = DemoFactory.discover_entrypoints();
    console.emit(&entrypoints, || {
        for name in &entrypoints {
            println!("{name}");
        }
    })
}

async fn cmd_schema(console: &Console, entrypoint: &str) -> Result<()> {
    let context = RuntimeContext::new("schema", RunTelemetry::detached("schema"));
    let runtime = DemoFactory.new_runtime(entrypoint, context).await?;
    let schema = runtime.get_schema().await;
    runtime.dispose().await?;
    let schema = schema?;

    // Schemas are JSON documents either way.
    println!("{}", serde_json::to_string_pretty(&schema)?);
    if !console.json {
        if let Some(graph) = &schema.graph {
            println!("graph: {}", graph.node_names().join(" -> "));
        }
    }
    Ok(())
}

// ── Runs ──

/// What to do when (re)starting a run.
enum Step {
    Execute,
    Input(String),
}

/// Line-based operator input.
struct Prompt {
    lines: Lines<BufReader<Stdin>>,
}

impl Prompt {
    fn stdin() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// `None` at end of input.
    async fn ask(&mut self, question: &str) -> Result<Option<String>> {
        print!("{question}");
        std::io::stdout().flush()?;
        Ok(self.lines.next_line().await?)
    }
}

async fn cmd_run(
    console: &Console,
    entrypoint: &str,
    input: &str,
    mode: ExecutionMode,
    mut resume: Option<String>,
    breakpoints: Option<&str>,
) -> Result<()> {
    let input: Value = serde_json::from_str(input).context("--input must be valid JSON")?;

    let (observer, mut events) = ChannelObserver::new();
    let service = RunService::with_observer(Arc::new(DemoFactory), Arc::new(observer));
    let run = ExecutionRun::new(entrypoint, input, mode);
    let run_id = run.id.clone();
    service.register_run(run);
    if let Some(spec) = breakpoints {
        service.set_breakpoints(&run_id, Breakpoints::parse(spec))?;
    }

    let mut prompt = Prompt::stdin();
    drive(console, &service, &run_id, Step::Execute, &mut events, &mut prompt).await?;

    while let Some(run) = service
        .get_run(&run_id)
        .filter(|r| r.status == RunStatus::Suspended)
    {
        if let Some(output) = run.output_data.as_ref().filter(|_| !console.json) {
            println!("Suspended: {output}");
        }
        let answer = match resume.take() {
            Some(answer) => answer,
            None => match prompt.ask("> ").await? {
                Some(answer) => answer,
                None => break,
            },
        };
        drive(
            console,
            &service,
            &run_id,
            Step::Input(answer),
            &mut events,
            &mut prompt,
        )
        .await?;
    }

    let run = service.get_run(&run_id).context("run disappeared")?;
    console.emit(&run, || print_run(&run))?;
    if run.status == RunStatus::Failed {
        bail!("run {} failed", run.id);
    }
    Ok(())
}

/// Execute one step of a run, echoing its logs and answering breakpoints.
async fn drive(
    console: &Console,
    service: &RunService,
    run_id: &str,
    step: Step,
    events: &mut UnboundedReceiver<ServiceEvent<ExecutionRun>>,
    prompt: &mut Prompt,
) -> Result<()> {
    let mut task = tokio::spawn({
        let service = service.clone();
        let run_id = run_id.to_string();
        async move {
            match step {
                Step::Execute => {
                    service.execute(&run_id).await;
                    Ok(())
                }
                Step::Input(text) => service.submit_chat_input(&run_id, &text).await,
            }
        }
    });

    loop {
        tokio::select! {
            joined = &mut task => {
                joined.context("run task aborted")??;
                break;
            }
            Some(event) = events.recv() => {
                echo(console, &event);
                let paused = service.get_run(run_id).and_then(|r| r.breakpoint);
                if let Some(breakpoint) = paused {
                    let question = format!("[{}] (s)tep, (c)ontinue, (q)uit > ", breakpoint.node);
                    match prompt.ask(&question).await?.as_deref().map(str::trim) {
                        Some("s") | Some("step") | Some("") => service.step_debug(run_id)?,
                        Some("c") | Some("continue") => service.continue_debug(run_id)?,
                        _ => service.stop_debug(run_id)?,
                    }
                }
            }
        }
    }

    while let Ok(event) = events.try_recv() {
        echo(console, &event);
    }
    Ok(())
}

fn echo(console: &Console, event: &ServiceEvent<ExecutionRun>) {
    if console.json {
        return;
    }
    if let ServiceEvent::Log(log) = event {
        println!("[{}] {}", log.level, log.message);
    }
}

fn print_run(run: &ExecutionRun) {
    println!();
    println!("run {} ({})", run.id, run.entrypoint);
    println!("Status: {}", run.status.as_str());
    println!("Duration: {}ms", run.duration().num_milliseconds());
    if let Some(output) = &run.output_data {
        println!("Output: {output}");
    }
    if let Some(error) = &run.error {
        println!("Error: {error}");
        if !error.detail.is_empty() {
            println!("    {}", error.detail.replace('\n', "\n    "));
        }
    }
    for message in &run.messages {
        println!("{}: {}", message.role, message.text());
        for call in &message.tool_calls {
            println!("    tool {}", call.name);
        }
    }
}

// ── Evaluations ──

async fn cmd_eval(console: &Console, run: EvalRun, report: Option<&Path>) -> Result<()> {
    let reporting = ReportingConfig::new(console.project_id.clone());
    let mut builder = EvalRunService::builder(
        Arc::new(DemoFactory),
        Arc::new(DemoEvaluator::new(&console.base_dir)),
        EvalSetStore::new(&console.base_dir),
    );
    if let Some(project_id) = &reporting.project_id {
        let path = console
            .base_dir
            .join(REPORTS_DIR)
            .join(format!("{project_id}.jsonl"));
        builder = builder.remote_reporter(Arc::new(JsonLinesReporter::new(path)));
    }
    let service = builder.reporting(reporting).build();

    let run_id = run.id.clone();
    service.register_run(run);
    let outcome = service.execute(&run_id).await;

    let run = service.get_run(&run_id).context("eval run disappeared")?;
    if let Some(path) = report {
        write_eval_run_json(path, &run)?;
        info!(path = %path.display(), "eval report written");
    }
    console.emit(&run.to_value()?, || print!("{}", render_eval_summary_md(&run)))?;
    outcome.context("evaluation failed")?;
    Ok(())
}

fn cmd_eval_sets_list(console: &Console) -> Result<()> {
    let sets = EvalSetStore::new(&console.base_dir).list_eval_sets();
    let data: Vec<_> = sets.iter().map(|s| &s.data).collect();
    console.emit(&data, || {
        if sets.is_empty() {
            println!("No eval sets found.");
        }
        for set in &sets {
            println!(
                "{:<24} {:<32} {:>3} evaluations  [{}]",
                set.id,
                set.name,
                set.evaluation_count,
                set.evaluator_refs.join(", ")
            );
        }
    })
}

fn cmd_eval_sets_show(console: &Console, id: &str) -> Result<()> {
    let Some(set) = EvalSetStore::new(&console.base_dir).load_eval_set(id) else {
        bail!("eval set '{id}' not found");
    };
    console.emit(&set, || {
        println!("{} ({})", set.name, set.id);
        println!("Evaluators: {}", set.evaluator_refs.join(", "));
        for evaluation in &set.evaluations {
            println!("  {:<16} {}", evaluation.id, evaluation.name);
        }
    })
}

fn cmd_eval_sets_create(
    console: &Console,
    id: &str,
    name: Option<&str>,
    evaluators: Vec<String>,
    evaluations: Option<&Path>,
) -> Result<()> {
    let evaluations: Vec<Evaluation> = match evaluations {
        Some(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
            serde_json::from_str(&raw).with_context(|| format!("parse {:?}", path))?
        }
        None => Vec::new(),
    };
    let path = EvalSetStore::new(&console.base_dir).create_eval_set(
        id,
        name.unwrap_or(id),
        evaluators,
        evaluations,
    )?;
    console.emit(&json!({"id": id, "path": path}), || {
        println!("Created eval set '{}' at {}", id, path.display())
    })
}

fn cmd_evaluators_list(console: &Console) -> Result<()> {
    let evaluators = EvaluatorStore::new(&console.base_dir).list_evaluators();
    let data: Vec<_> = evaluators.iter().map(|e| &e.data).collect();
    console.emit(&data, || {
        if evaluators.is_empty() {
            println!("No evaluators found.");
        }
        for evaluator in &evaluators {
            println!(
                "{:<24} {:<20} {}",
                evaluator.id, evaluator.evaluator_type_id, evaluator.description
            );
        }
    })
}

fn cmd_evaluators_show(console: &Console, id: &str) -> Result<()> {
    let Some(evaluator) = EvaluatorStore::new(&console.base_dir).load_evaluator(id) else {
        bail!("evaluator '{id}' not found");
    };
    console.emit(&evaluator, || {
        println!("{} ({})", evaluator.id, evaluator.evaluator_type_id);
        if !evaluator.description.is_empty() {
            println!("{}", evaluator.description);
        }
        for (key, value) in &evaluator.evaluator_config {
            println!("  {key}: {value}");
        }
    })
}

fn cmd_evaluators_create(
    console: &Console,
    id: &str,
    type_id: &str,
    description: &str,
    config: Option<&str>,
    criteria: Option<&str>,
) -> Result<()> {
    let config: Map<String, Value> = match config {
        Some(raw) => serde_json::from_str(raw).context("--config must be a JSON object")?,
        None => Map::new(),
    };
    let criteria = criteria.map(parse_json_or_text);
    let path = EvaluatorStore::new(&console.base_dir).create_evaluator(
        id,
        type_id,
        description,
        config,
        criteria,
    )?;
    console.emit(&json!({"id": id, "path": path}), || {
        println!("Created evaluator '{}' at {}", id, path.display())
    })
}

fn cmd_evaluators_delete(console: &Console, id: &str) -> Result<()> {
    if !EvaluatorStore::new(&console.base_dir).delete_evaluator(id)? {
        bail!("evaluator '{id}' not found");
    }
    console.emit(&json!({"deleted": id}), || println!("Deleted evaluator '{id}'"))
}

fn cmd_types(console: &Console) -> Result<()> {
    let types: Vec<Value> = EVALUATOR_TYPES
        .iter()
        .map(|t| {
            json!({
                "id": t.id,
                "name": t.name,
                "description": t.description,
                "criteriaKeys": t.criteria_keys,
            })
        })
        .collect();
    console.emit(&types, || {
        for t in EVALUATOR_TYPES {
            println!("{:<20} {}", t.id, t.description);
        }
    })
}

/// JSON when it parses, otherwise the raw text as a JSON string.
fn parse_json_or_text(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn console(dir: &Path) -> Console {
        Console {
            base_dir: dir.to_path_buf(),
            project_id: None,
            json: true,
        }
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_command_parses_mode_and_breakpoints() {
        let cli = Cli::try_parse_from([
            "devconsole",
            "run",
            "stepper",
            "--mode",
            "debug",
            "--breakpoints",
            "plan,act",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                entrypoint,
                mode,
                breakpoints,
                input,
                ..
            } => {
                assert_eq!(entrypoint, "stepper");
                assert_eq!(mode, ExecutionMode::Debug);
                assert_eq!(breakpoints.as_deref(), Some("plan,act"));
                assert_eq!(input, "{}");
            }
            _ => panic!("expected run"),
        }
        assert!(Cli::try_parse_from(["devconsole", "run", "x", "--mode", "fast"]).is_err());
    }

    #[test]
    fn eval_command_collects_eval_ids() {
        let cli = Cli::try_parse_from([
            "devconsole",
            "--base-dir",
            "/tmp/project",
            "eval",
            "smoke",
            "--eval-id",
            "a",
            "--eval-id",
            "b",
            "-w",
            "4",
        ])
        .unwrap();
        assert_eq!(cli.base_dir, PathBuf::from("/tmp/project"));
        match cli.command {
            Commands::Eval {
                eval_set,
                eval_ids,
                workers,
                ..
            } => {
                assert_eq!(eval_set, "smoke");
                assert_eq!(eval_ids, vec!["a", "b"]);
                assert_eq!(workers, 4);
            }
            _ => panic!("expected eval"),
        }
    }

    #[test]
    fn resume_text_falls_back_to_string() {
        assert_eq!(parse_json_or_text(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(parse_json_or_text("yes"), json!("yes"));
    }

    #[test]
    fn eval_set_and_evaluator_commands_round_trip_through_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let console = console(dir.path());
        let evaluations = dir.path().join("cases.json");
        std::fs::write(
            &evaluations,
            r#"[{"id": "ada", "name": "greets Ada", "inputs": {"name": "Ada"}}]"#,
        )
        .unwrap();

        cmd_evaluators_create(
            &console,
            "exact",
            "exact-match",
            "",
            None,
            Some(r#"{"expectedOutput": {"greeting": "Hello, Ada!"}}"#),
        )
        .unwrap();
        cmd_eval_sets_create(
            &console,
            "greetings",
            None,
            vec!["exact".into()],
            Some(&evaluations),
        )
        .unwrap();

        let set = EvalSetStore::new(dir.path())
            .load_eval_set("greetings")
            .unwrap();
        assert_eq!(set.name, "greetings");
        assert_eq!(set.evaluations[0].id, "ada");
        assert!(cmd_eval_sets_show(&console, "missing").is_err());

        cmd_evaluators_delete(&console, "exact").unwrap();
        assert!(cmd_evaluators_delete(&console, "exact").is_err());
        assert!(cmd_evaluators_create(&console, "bad", "no-such-type", "", None, None).is_err());
    }

    #[tokio::test]
    async fn eval_command_scores_and_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let console = console(dir.path());
        EvaluatorStore::new(dir.path())
            .create_evaluator(
                "exact",
                "exact-match",
                "",
                Map::new(),
                Some(json!({"expectedOutput": {"greeting": "Hello, Ada!"}})),
            )
            .unwrap();
        EvalSetStore::new(dir.path())
            .create_eval_set(
                "greetings",
                "Greetings",
                vec!["exact".into()],
                vec![Evaluation::new("ada", "greets Ada", json!({"name": "Ada"}))],
            )
            .unwrap();

        let report = dir.path().join("report.json");
        let run = EvalRun::new("greetings", "greeting");
        cmd_eval(&console, run, Some(&report)).await.unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
        assert_eq!(raw["run"]["status"], "completed");
        assert_eq!(raw["summary"]["overall_score"], 1.0);
    }

    #[tokio::test]
    async fn eval_command_fails_for_missing_eval_set() {
        let dir = tempfile::tempdir().unwrap();
        let run = EvalRun::new("nope", "greeting");
        assert!(cmd_eval(&console(dir.path()), run, None).await.is_err());
    }

    #[tokio::test]
    async fn run_command_completes_a_plain_run() {
        let dir = tempfile::tempdir().unwrap();
        cmd_run(
            &console(dir.path()),
            "greeting",
            r#"{"name": "Ada"}"#,
            ExecutionMode::Run,
            None,
            None,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn run_command_resumes_support_chat_with_given_answer() {
        let dir = tempfile::tempdir().unwrap();
        cmd_run(
            &console(dir.path()),
            "support",
            r#"{"message": "my lamp arrived broken"}"#,
            ExecutionMode::Chat,
            Some("yes".into()),
            None,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn run_command_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_run(
            &console(dir.path()),
            "numbers",
            r#"{"numbers": []}"#,
            ExecutionMode::Run,
            None,
            None,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("failed"));
    }
}
