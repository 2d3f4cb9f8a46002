//! Runner configuration and executor dispatch.

use crate::container::ContainerRunner;
use crate::shell::ShellRunner;
use async_trait::async_trait;
use gantry_core::ports::{JobContext, JobOutcome, JobRunner};
use gantry_core::workflow::Executor;
use gantry_core::{Error, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// Configuration shared by every runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Directory steps run in. Mounted at `/workspace` for containers.
    pub workspace: PathBuf,
    /// Per-step limit; `None` means no limit.
    pub step_timeout_secs: Option<u64>,
    /// Interpreter used for `sh -c` style invocation.
    pub shell: String,
    /// Extra variables exported to every step.
    pub env: BTreeMap<String, String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            step_timeout_secs: Some(3600),
            shell: "sh".to_string(),
            env: BTreeMap::new(),
        }
    }
}

/// Routes each job to the backend its executor names.
///
/// `docker` executors run in containers; `machine` and `shell` executors run
/// on the host. The Docker client is optional so pipelines without container
/// jobs work on hosts without a daemon.
pub struct ExecutorRunner {
    shell: ShellRunner,
    container: Option<ContainerRunner>,
}

impl ExecutorRunner {
    pub fn new(config: RunnerConfig) -> Self {
        let container = match ContainerRunner::new(config.clone()) {
            Ok(runner) => Some(runner),
            Err(e) => {
                warn!(error = %e, "Docker unavailable, container jobs will fail");
                None
            }
        };

        Self {
            shell: ShellRunner::new(config),
            container,
        }
    }

    /// Host-only dispatch. Container jobs fail with a clear error.
    pub fn without_containers(config: RunnerConfig) -> Self {
        Self {
            shell: ShellRunner::new(config),
            container: None,
        }
    }
}

#[async_trait]
impl JobRunner for ExecutorRunner {
    async fn run(&self, ctx: &JobContext) -> Result<JobOutcome> {
        match &ctx.job.executor {
            Executor::Docker { .. } => match &self.container {
                Some(runner) => runner.run(ctx).await,
                None => Err(Error::JobExecution {
                    job: ctx.instance.clone(),
                    reason: "docker executor requested but Docker is unavailable".to_string(),
                }),
            },
            Executor::Machine { .. } | Executor::Shell => self.shell.run(ctx).await,
        }
    }
}

/// Logs what would run and reports success without executing anything.
#[derive(Debug, Default, Clone)]
pub struct DryRunRunner;

#[async_trait]
impl JobRunner for DryRunRunner {
    async fn run(&self, ctx: &JobContext) -> Result<JobOutcome> {
        for step in &ctx.job.steps {
            info!(
                job = %ctx.instance,
                executor = ctx.job.executor.kind(),
                step = %step,
                "[dry-run] would execute"
            );
        }
        Ok(JobOutcome::succeeded(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::RunId;
    use gantry_core::workflow::JobDefinition;

    fn make_ctx(executor: Executor, steps: &[&str]) -> JobContext {
        JobContext {
            run_id: RunId::new(),
            workflow: "tests".to_string(),
            instance: "wagon".to_string(),
            branch: "dev".to_string(),
            commit: None,
            job: JobDefinition {
                name: "wagon".to_string(),
                executor,
                steps: steps.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    #[tokio::test]
    async fn test_dry_run_never_executes() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let step = format!("touch {}", marker.display());

        let outcome = DryRunRunner
            .run(&make_ctx(Executor::Shell, &[&step]))
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_machine_executor_runs_on_host() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ExecutorRunner::without_containers(RunnerConfig {
            workspace: dir.path().to_path_buf(),
            ..Default::default()
        });

        let outcome = runner
            .run(&make_ctx(Executor::Machine { image: None }, &["touch built"]))
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(dir.path().join("built").exists());
    }

    #[tokio::test]
    async fn test_docker_executor_without_daemon() {
        let runner = ExecutorRunner::without_containers(RunnerConfig::default());
        let ctx = make_ctx(
            Executor::Docker {
                image: "alpine:3".to_string(),
            },
            &["true"],
        );

        let err = runner.run(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::JobExecution { ref job, .. } if job == "wagon"));
    }
}
