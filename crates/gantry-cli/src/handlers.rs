//! Command handlers.

use crate::commands::{RunWorkflowArgs, TriggerArgs};
use crate::config::CliConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use console::style;
use futures::future::join_all;
use gantry_core::events::Event;
use gantry_core::filter;
use gantry_core::ports::JobRunner;
use gantry_core::run::{ExecutionRun, JobStatus, RunRequest, RunStatus, SkipReason};
use gantry_core::workflow::{Trigger, TriggerKind, WorkflowDefinition};
use gantry_runner::{DryRunRunner, ExecutorRunner, RunnerConfig};
use gantry_scheduler::{
    BroadcastEventBus, Project, TriggerDispatcher, WorkflowScheduler, cron_matches, next_fire,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

const TEMPLATE: &str = r#"version: "1"

executors:
  python:
    type: docker
    image: python:3.12

jobs:
  lint:
    steps:
      - echo "Linting..."
  unit_tests:
    executor: python
    steps:
      - pip install -r requirements.txt
      - python -m pytest
  package:
    steps:
      - echo "Packaging..."

workflows:
  build:
    jobs:
      - lint
      - unit_tests
      - package:
          requires:
            - lint
            - unit_tests
          filters:
            branches:
              only: master

  nightly:
    triggers:
      - schedule:
          cron: "0 1 * * *"
          filters:
            branches:
              only: master
    jobs:
      - unit_tests
"#;

/// Exit code for a finished set of runs.
pub fn exit_code_for(runs: &[ExecutionRun]) -> ExitCode {
    if runs.iter().all(|r| r.status == RunStatus::Succeeded) {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

/// Write a starter workflow file.
pub fn init() -> Result<ExitCode> {
    let path = Path::new("gantry.yaml");

    if path.exists() {
        println!("{} gantry.yaml already exists", style("!").yellow());
        return Ok(ExitCode::SUCCESS);
    }

    std::fs::write(path, TEMPLATE)?;
    println!("{} Created gantry.yaml", style("✓").green());
    Ok(ExitCode::SUCCESS)
}

/// Load a workflow file and report its structure.
pub fn validate(config: &CliConfig, path: Option<PathBuf>) -> Result<ExitCode> {
    let path = path.unwrap_or_else(|| config.workflow_file.clone());
    let project = load_project(&path)?;

    println!(
        "{} {} is valid ({} jobs, {} workflows)",
        style("✓").green(),
        path.display(),
        project.registry().len(),
        project.workflows().len()
    );

    let now = Utc::now();
    for workflow in project.workflows() {
        let dag = project.dag(&workflow.name)?;
        println!(
            "\n  {} [{}]",
            style(&workflow.name).bold(),
            workflow.trigger.kind()
        );
        if let Some(cron) = workflow.trigger.cron() {
            match next_fire(cron, now)? {
                Some(at) => println!("    cron {}  next fire {}", cron, at.to_rfc3339()),
                None => println!("    cron {}  never fires again", cron),
            }
        }
        for node in dag.topological_order() {
            println!("    - {} ({})", node.name, node.job.executor.kind());
        }
        for (from, to) in dag.edges() {
            println!("      {} {} {}", from, style("→").dim(), to);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Print the initial state of every job for a branch without running.
pub fn plan(
    config: &CliConfig,
    workflow: &str,
    branch: &str,
    file: Option<PathBuf>,
) -> Result<ExitCode> {
    let project = load_project(&file.unwrap_or_else(|| config.workflow_file.clone()))?;
    let dag = project.dag(workflow)?;
    let scheduler = WorkflowScheduler::new(Arc::new(DryRunRunner));
    let run = scheduler.plan(dag, &RunRequest::manual(workflow, branch))?;

    println!(
        "Plan for {} on {}",
        style(workflow).bold(),
        style(branch).cyan()
    );
    for line in plan_lines(&project, &run)? {
        println!("  {}", line);
    }

    Ok(ExitCode::SUCCESS)
}

fn plan_lines(project: &Project, run: &ExecutionRun) -> Result<Vec<String>> {
    let dag = project.dag(&run.workflow)?;
    let satisfied = |name: &str| {
        run.status_of(name)
            .is_some_and(|status| status.satisfies_requires())
    };

    let lines = dag
        .topological_order()
        .into_iter()
        .map(|node| match run.job(&node.name) {
            Some(job) if job.status == JobStatus::SkippedFiltered => {
                format!("{:<28} skipped ({})", node.name, describe_skip(job.skip_reason))
            }
            _ if dag.is_ready(&node.name, satisfied) => format!("{:<28} ready", node.name),
            _ => {
                let waiting: Vec<_> = dag
                    .predecessors(&node.name)
                    .iter()
                    .filter(|p| !satisfied(&p.name))
                    .map(|p| p.name.clone())
                    .collect();
                format!(
                    "{:<28} pending (waits on {})",
                    node.name,
                    waiting.join(", ")
                )
            }
        })
        .collect();

    Ok(lines)
}

fn describe_skip(reason: Option<SkipReason>) -> &'static str {
    match reason {
        Some(SkipReason::UpstreamFiltered) => "all requirements filtered",
        Some(SkipReason::BranchFilter) | None => "branch filter",
    }
}

/// Run a single workflow for a branch.
pub async fn run_workflow(config: &CliConfig, args: RunWorkflowArgs) -> Result<ExitCode> {
    let path = args.file.unwrap_or_else(|| config.workflow_file.clone());
    let project = load_project(&path)?;
    let workflow = project.workflow(&args.workflow)?;

    let Some(request) = workflow_request(workflow, &args.branch, args.commit, args.now)? else {
        if let Some(now) = args.now {
            println!(
                "{} {} is not due at {} on {}",
                style("i").blue(),
                args.workflow,
                now.to_rfc3339(),
                args.branch
            );
        }
        return Ok(ExitCode::SUCCESS);
    };

    let runs = execute_all(config, &project, vec![request], args.dry_run, args.json).await?;
    report(&runs, args.json)
}

/// Request for a `run-workflow` invocation. With `--now`, a schedule workflow
/// only runs when its cron and trigger filter admit the time and branch;
/// `None` means it is not due. Push workflows ignore `now`.
fn workflow_request(
    workflow: &WorkflowDefinition,
    branch: &str,
    commit: Option<String>,
    now: Option<DateTime<Utc>>,
) -> Result<Option<RunRequest>> {
    let mut request = RunRequest::manual(&workflow.name, branch).with_commit(commit);

    if let (Trigger::Schedule { cron, .. }, Some(now)) = (&workflow.trigger, now) {
        if !cron_matches(cron, now)? || !filter::allows(workflow.trigger.filter(), branch) {
            return Ok(None);
        }
        request.trigger = TriggerKind::Schedule;
    }

    Ok(Some(request))
}

/// Dispatch a push and run every workflow it starts.
pub async fn trigger_push(
    config: &CliConfig,
    branch: &str,
    commit: Option<String>,
    common: TriggerArgs,
) -> Result<ExitCode> {
    let project = load_project(&common.file.unwrap_or_else(|| config.workflow_file.clone()))?;
    let requests = TriggerDispatcher::new(&project).on_push(branch, commit)?;
    run_dispatched(config, &project, requests, common.dry_run, common.json).await
}

/// Dispatch a scheduler tick and run every workflow that is due.
pub async fn trigger_schedule(
    config: &CliConfig,
    now: Option<DateTime<Utc>>,
    branch: Option<String>,
    common: TriggerArgs,
) -> Result<ExitCode> {
    let project = load_project(&common.file.unwrap_or_else(|| config.workflow_file.clone()))?;
    let now = now.unwrap_or_else(Utc::now);
    let branch = branch.unwrap_or_else(|| config.default_branch.clone());
    let requests = TriggerDispatcher::new(&project).on_schedule_tick(now, &branch, None)?;
    run_dispatched(config, &project, requests, common.dry_run, common.json).await
}

async fn run_dispatched(
    config: &CliConfig,
    project: &Project,
    requests: Vec<RunRequest>,
    dry_run: bool,
    json: bool,
) -> Result<ExitCode> {
    if requests.is_empty() {
        if json {
            println!("[]");
        } else {
            println!("{} No workflows triggered", style("i").blue());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let runs = execute_all(config, project, requests, dry_run, json).await?;
    report(&runs, json)
}

/// Run every request concurrently, printing progress unless `quiet`.
async fn execute_all(
    config: &CliConfig,
    project: &Project,
    requests: Vec<RunRequest>,
    dry_run: bool,
    quiet: bool,
) -> Result<Vec<ExecutionRun>> {
    let runner: Arc<dyn JobRunner> = if dry_run {
        Arc::new(DryRunRunner)
    } else {
        Arc::new(ExecutorRunner::new(RunnerConfig {
            workspace: std::env::current_dir()?,
            step_timeout_secs: config.step_timeout_secs,
            ..Default::default()
        }))
    };

    let bus = Arc::new(BroadcastEventBus::new());
    let printer = (!quiet).then(|| spawn_progress(&bus));
    let scheduler = WorkflowScheduler::new(runner)
        .with_event_bus(bus.clone())
        .with_max_parallel_jobs(config.max_parallel_jobs);

    let mut pending = Vec::with_capacity(requests.len());
    for request in requests {
        let dag = project.dag(&request.workflow)?;
        pending.push(scheduler.execute(dag, request));
    }
    let results = join_all(pending).await;

    // Close the channel so the printer drains and exits
    drop(scheduler);
    drop(bus);
    if let Some(handle) = printer
        && let Err(e) = handle.await
    {
        warn!(error = %e, "Progress printer ended abnormally");
    }

    results
        .into_iter()
        .map(|r| r.context("workflow run aborted"))
        .collect()
}

fn spawn_progress(bus: &BroadcastEventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(missed)) => {
                    println!("{} {} progress events dropped", style("!").yellow(), missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_event(event: &Event) {
    match event {
        Event::RunStarted(p) => println!(
            "{} Running {} on {} ({} jobs)",
            style("▶").cyan(),
            style(&p.workflow).bold(),
            style(&p.branch).dim(),
            p.job_count
        ),
        Event::JobSkipped(p) => println!(
            "  {} {} skipped ({})",
            style("-").dim(),
            p.job,
            describe_skip(Some(p.reason))
        ),
        Event::JobStarted(p) => println!("  {} {} started", style("▶").cyan(), p.job),
        Event::JobCompleted(p) if p.success => println!(
            "  {} {} {}",
            style("✓").green(),
            p.job,
            style(format_duration(p.duration_ms)).dim()
        ),
        Event::JobCompleted(p) => {
            let code = p
                .exit_code
                .map(|c| format!("exit {}", c))
                .unwrap_or_else(|| "error".to_string());
            match &p.failed_step {
                Some(step) => println!(
                    "  {} {} {} at `{}`",
                    style("✗").red(),
                    p.job,
                    code,
                    step
                ),
                None => println!("  {} {} {}", style("✗").red(), p.job, code),
            }
        }
        Event::RunCompleted(p) => println!(
            "{} {} {} ({} succeeded, {} failed, {} skipped) {}",
            match p.status {
                RunStatus::Succeeded => style("✓").green(),
                _ => style("✗").red(),
            },
            p.workflow,
            p.status,
            p.jobs_succeeded,
            p.jobs_failed,
            p.jobs_skipped,
            style(format_duration(p.duration_ms)).dim()
        ),
    }
}

fn report(runs: &[ExecutionRun], json: bool) -> Result<ExitCode> {
    if json {
        let out = match runs {
            [single] => serde_json::to_string_pretty(single)?,
            many => serde_json::to_string_pretty(many)?,
        };
        println!("{}", out);
    }

    for run in runs {
        if let Some(job) = &run.failed_job {
            eprintln!("failed job: {}", job);
        }
    }

    Ok(exit_code_for(runs))
}

fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

/// Show the current configuration.
pub fn show_config(config: &CliConfig) -> Result<ExitCode> {
    println!("# {}", CliConfig::config_path()?.display());
    print!("{}", serde_yaml::to_string(config)?);
    Ok(ExitCode::SUCCESS)
}

/// Update and persist one configuration value.
pub fn set_config(key: &str, value: &str) -> Result<ExitCode> {
    let mut config = CliConfig::load()?;
    config.set(key, value)?;
    config.save()?;
    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(ExitCode::SUCCESS)
}

fn load_project(path: &Path) -> Result<Project> {
    Project::from_file(path).with_context(|| format!("loading {}", path.display()))
}
