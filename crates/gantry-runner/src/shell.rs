//! Shell-based job execution on the host.

use crate::runner::RunnerConfig;
use async_trait::async_trait;
use gantry_core::ports::{JobContext, JobOutcome, JobRunner};
use gantry_core::{Error, Result};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};

/// Runs each step with `sh -c` in the workspace. Used for `shell` and
/// `machine` executors.
pub struct ShellRunner {
    config: RunnerConfig,
}

impl ShellRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Run a single step, returning its exit code (-1 when killed by a
    /// signal).
    async fn execute_step(&self, step: &str, ctx: &JobContext) -> Result<i32> {
        info!(job = %ctx.instance, step = %step, workspace = %self.config.workspace.display(), "Executing step");

        let mut child = Command::new(&self.config.shell)
            .arg("-c")
            .arg(step)
            .current_dir(&self.config.workspace)
            .envs(self.config.env.iter())
            .envs(ctx.env())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::JobExecution {
                job: ctx.instance.clone(),
                reason: format!("failed to spawn {}: {}", self.config.shell, e),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("child stderr not captured".to_string()))?;

        let stdout_handle = tokio::spawn(forward_lines(stdout, ctx.instance.clone(), "stdout"));
        let stderr_handle = tokio::spawn(forward_lines(stderr, ctx.instance.clone(), "stderr"));

        let status = match self.config.step_timeout_secs {
            Some(secs) => match timeout(Duration::from_secs(secs), child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!(job = %ctx.instance, step = %step, timeout_secs = secs, "Step timed out, killing process");
                    if let Err(e) = child.kill().await {
                        warn!(job = %ctx.instance, error = %e, "Failed to kill timed out step");
                    }
                    return Err(Error::JobExecution {
                        job: ctx.instance.clone(),
                        reason: format!("step timed out after {}s: {}", secs, step),
                    });
                }
            },
            None => child.wait().await,
        };

        for handle in [stdout_handle, stderr_handle] {
            if let Err(e) = handle.await {
                debug!(job = %ctx.instance, error = %e, "Output forwarder ended abnormally");
            }
        }

        let status = status.map_err(|e| Error::JobExecution {
            job: ctx.instance.clone(),
            reason: format!("failed to wait for step: {}", e),
        })?;
        Ok(status.code().unwrap_or(-1))
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

#[async_trait]
impl JobRunner for ShellRunner {
    async fn run(&self, ctx: &JobContext) -> Result<JobOutcome> {
        let start = Instant::now();

        for step in &ctx.job.steps {
            let exit_code = self.execute_step(step, ctx).await?;
            if exit_code != 0 {
                return Ok(JobOutcome::failed(
                    Some(exit_code),
                    start.elapsed().as_millis() as u64,
                    Some(step.clone()),
                ));
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(job = %ctx.instance, duration_ms, "Shell job completed");
        Ok(JobOutcome::succeeded(duration_ms))
    }
}

/// Log every line of a child stream under the job's name.
pub(crate) async fn forward_lines<R>(reader: R, job: String, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "gantry::job", job = %job, stream, "{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::RunId;
    use gantry_core::workflow::{Executor, JobDefinition};

    fn make_ctx(steps: &[&str]) -> JobContext {
        JobContext {
            run_id: RunId::new(),
            workflow: "tests".to_string(),
            instance: "unittests_py27".to_string(),
            branch: "master".to_string(),
            commit: Some("abc123".to_string()),
            job: JobDefinition {
                name: "unittests_py27".to_string(),
                executor: Executor::Shell,
                steps: steps.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    fn runner_in(dir: &std::path::Path) -> ShellRunner {
        ShellRunner::new(RunnerConfig {
            workspace: dir.to_path_buf(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_shell_runner_success() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());

        let outcome = runner
            .run(&make_ctx(&["echo hello", "true"]))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_stops_at_first_failing_step() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());

        let outcome = runner
            .run(&make_ctx(&["exit 3", "touch never"]))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.failed_step.as_deref(), Some("exit 3"));
        assert!(!dir.path().join("never").exists());
    }

    #[tokio::test]
    async fn test_steps_see_run_environment() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());

        let outcome = runner
            .run(&make_ctx(&[
                "echo \"$GANTRY_BRANCH $GANTRY_COMMIT $GANTRY_JOB\" > env.txt",
            ]))
            .await
            .unwrap();
        assert!(outcome.success);

        let written = std::fs::read_to_string(dir.path().join("env.txt")).unwrap();
        assert_eq!(written.trim(), "master abc123 unittests_py27");
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::new(RunnerConfig {
            workspace: dir.path().to_path_buf(),
            step_timeout_secs: Some(1),
            ..Default::default()
        });

        let started = Instant::now();
        let err = runner
            .run(&make_ctx(&["sleep 5 && touch late"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::JobExecution { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!dir.path().join("late").exists());
    }
}
