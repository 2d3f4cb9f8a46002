//! Container-based job execution using Docker.

use crate::runner::RunnerConfig;
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use futures::StreamExt;
use gantry_core::ports::{JobContext, JobOutcome, JobRunner};
use gantry_core::workflow::Executor;
use gantry_core::{Error, Result};
use std::path::Path;
use std::time::Instant;
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};

const CONTAINER_WORKSPACE: &str = "/workspace";

/// Runs each step of a `docker` executor job in a fresh container with the
/// workspace bind-mounted.
pub struct ContainerRunner {
    docker: Docker,
    config: RunnerConfig,
}

impl ContainerRunner {
    /// Create a runner against the local Docker daemon.
    pub fn new(config: RunnerConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Internal(format!("Failed to connect to Docker: {}", e)))?;

        Ok(Self { docker, config })
    }

    /// Create with an existing Docker client.
    pub fn with_docker(docker: Docker, config: RunnerConfig) -> Self {
        Self { docker, config }
    }

    fn container_config(
        &self,
        image: &str,
        step: &str,
        ctx: &JobContext,
        workspace: &Path,
    ) -> Config<String> {
        Config {
            image: Some(image.to_string()),
            cmd: Some(vec![
                self.config.shell.clone(),
                "-c".to_string(),
                step.to_string(),
            ]),
            env: Some(step_env(&self.config, ctx)),
            working_dir: Some(CONTAINER_WORKSPACE.to_string()),
            host_config: Some(bollard::models::HostConfig {
                binds: Some(vec![format!(
                    "{}:{}",
                    workspace.display(),
                    CONTAINER_WORKSPACE
                )]),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Run one step in its own container and return the exit code.
    async fn execute_step(
        &self,
        image: &str,
        step: &str,
        ctx: &JobContext,
        workspace: &Path,
    ) -> Result<i32> {
        let container_name = format!("gantry-{}-{}", ctx.instance, uuid::Uuid::new_v4());
        let job_error = |reason: String| Error::JobExecution {
            job: ctx.instance.clone(),
            reason,
        };

        info!(
            job = %ctx.instance,
            image = %image,
            container = %container_name,
            step = %step,
            "Starting container step"
        );

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };
        self.docker
            .create_container(
                Some(create_options),
                self.container_config(image, step, ctx, workspace),
            )
            .await
            .map_err(|e| job_error(format!("failed to create container: {}", e)))?;

        let result = self.wait_for_step(&container_name, ctx).await;

        let remove_options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self
            .docker
            .remove_container(&container_name, Some(remove_options))
            .await
        {
            warn!(container = %container_name, error = %e, "Failed to remove container");
        }

        result
    }

    async fn wait_for_step(&self, container_name: &str, ctx: &JobContext) -> Result<i32> {
        let job_error = |reason: String| Error::JobExecution {
            job: ctx.instance.clone(),
            reason,
        };

        self.docker
            .start_container(container_name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| job_error(format!("failed to start container: {}", e)))?;

        let log_options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut log_stream = self.docker.logs(container_name, Some(log_options));
        let docker = self.docker.clone();
        let name = container_name.to_string();

        let run = async move {
            while let Some(log_result) = log_stream.next().await {
                match log_result {
                    Ok(LogOutput::StdOut { message }) => {
                        let line = String::from_utf8_lossy(&message);
                        info!(target: "gantry::job", job = %ctx.instance, stream = "stdout", "{}", line.trim_end());
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        let line = String::from_utf8_lossy(&message);
                        info!(target: "gantry::job", job = %ctx.instance, stream = "stderr", "{}", line.trim_end());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Error reading container logs");
                        break;
                    }
                }
            }

            let wait_options = WaitContainerOptions {
                condition: "not-running",
            };
            match docker
                .wait_container(&name, Some(wait_options))
                .next()
                .await
            {
                Some(Ok(response)) => Ok(response.status_code as i32),
                // Non-zero exits surface as a wait error carrying the code
                Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code as i32),
                Some(Err(e)) => Err(format!("container wait failed: {}", e)),
                None => Err("container wait returned no result".to_string()),
            }
        };

        let outcome = match self.config.step_timeout_secs {
            Some(secs) => match timeout(Duration::from_secs(secs), run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(job = %ctx.instance, timeout_secs = secs, "Container step timed out");
                    if let Err(e) = self
                        .docker
                        .kill_container::<String>(container_name, None)
                        .await
                    {
                        warn!(container = %container_name, error = %e, "Failed to kill container");
                    }
                    return Err(job_error(format!("step timed out after {}s", secs)));
                }
            },
            None => run.await,
        };

        outcome.map_err(job_error)
    }
}

#[async_trait]
impl JobRunner for ContainerRunner {
    async fn run(&self, ctx: &JobContext) -> Result<JobOutcome> {
        let image = match &ctx.job.executor {
            Executor::Docker { image } => image.clone(),
            other => {
                return Err(Error::JobExecution {
                    job: ctx.instance.clone(),
                    reason: format!("container runner cannot run {} executor", other.kind()),
                });
            }
        };

        let workspace = std::fs::canonicalize(&self.config.workspace)?;
        let start = Instant::now();

        for step in &ctx.job.steps {
            let exit_code = self.execute_step(&image, step, ctx, &workspace).await?;
            if exit_code != 0 {
                return Ok(JobOutcome::failed(
                    Some(exit_code),
                    start.elapsed().as_millis() as u64,
                    Some(step.clone()),
                ));
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(job = %ctx.instance, image = %image, duration_ms, "Container job completed");
        Ok(JobOutcome::succeeded(duration_ms))
    }
}

/// `KEY=VALUE` pairs for the container, run variables taking precedence.
fn step_env(config: &RunnerConfig, ctx: &JobContext) -> Vec<String> {
    let mut vars = config.env.clone();
    vars.extend(ctx.env());
    vars.into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect()
}
