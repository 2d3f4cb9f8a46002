//! Workflow execution.
//!
//! The scheduler loop is the only writer of an [`ExecutionRun`]. Jobs run on a
//! `JoinSet` and report back through it; independent jobs run concurrently,
//! a job starts once everything it requires has succeeded or been filtered
//! out, and the first failure stops new jobs from being issued while letting
//! in-flight ones finish.

use crate::dag::WorkflowDag;
use chrono::Utc;
use futures::FutureExt;
use gantry_core::events::{
    Event, JobCompletedPayload, JobSkippedPayload, JobStartedPayload, RunCompletedPayload,
    RunStartedPayload,
};
use gantry_core::filter;
use gantry_core::ports::{EventBus, JobContext, JobOutcome, JobRunner};
use gantry_core::run::{ExecutionRun, JobStatus, RunRequest, RunStatus, SkipReason};
use gantry_core::{Error, Result};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Runs workflow DAGs against a [`JobRunner`].
pub struct WorkflowScheduler {
    runner: Arc<dyn JobRunner>,
    events: Option<Arc<dyn EventBus>>,
    max_parallel_jobs: usize,
}

struct Finished {
    name: String,
    result: Result<JobOutcome>,
    elapsed_ms: u64,
}

impl WorkflowScheduler {
    pub fn new(runner: Arc<dyn JobRunner>) -> Self {
        Self {
            runner,
            events: None,
            max_parallel_jobs: 0,
        }
    }

    pub fn with_event_bus(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Bound the number of concurrently running jobs. Zero means unbounded.
    pub fn with_max_parallel_jobs(mut self, max: usize) -> Self {
        self.max_parallel_jobs = max;
        self
    }

    /// Create a run and settle branch filtering without executing anything.
    ///
    /// A job whose own filter rejects the branch is skipped. A job without a
    /// filter whose requirements were all skipped is skipped too, since it
    /// has nothing left to gate on in this run.
    pub fn plan(&self, dag: &WorkflowDag, request: &RunRequest) -> Result<ExecutionRun> {
        let mut run = ExecutionRun::new(request, dag.nodes().iter().map(|n| n.name.clone()));

        for node in dag.topological_order() {
            let reason = if !filter::allows(node.filter.as_ref(), &run.branch) {
                Some(SkipReason::BranchFilter)
            } else if node.filter.is_none() {
                let preds = dag.predecessors(&node.name);
                let all_filtered = !preds.is_empty()
                    && preds
                        .iter()
                        .all(|p| run.status_of(&p.name) == Some(JobStatus::SkippedFiltered));
                all_filtered.then_some(SkipReason::UpstreamFiltered)
            } else {
                None
            };

            if let Some(reason) = reason {
                debug!(job = %node.name, branch = %run.branch, ?reason, "Job filtered out");
                run.skip(&node.name, reason)?;
            }
        }

        Ok(run)
    }

    /// Execute a workflow run to its terminal state.
    ///
    /// Job failures are reported through the returned run, not as errors.
    pub async fn execute(&self, dag: &WorkflowDag, request: RunRequest) -> Result<ExecutionRun> {
        let mut run = self.plan(dag, &request)?;
        run.status = RunStatus::Running;

        info!(
            run_id = %run.id,
            workflow = %run.workflow,
            branch = %run.branch,
            trigger = %run.trigger,
            "Starting workflow run"
        );
        self.publish(Event::RunStarted(RunStartedPayload {
            run_id: run.id,
            workflow: run.workflow.clone(),
            branch: run.branch.clone(),
            commit: run.commit.clone(),
            trigger: run.trigger,
            job_count: run.jobs.len(),
            started_at: Utc::now(),
        }))
        .await;

        for job in run.jobs.iter().filter(|j| j.status == JobStatus::SkippedFiltered) {
            self.publish(Event::JobSkipped(JobSkippedPayload {
                run_id: run.id,
                workflow: run.workflow.clone(),
                job: job.name.clone(),
                reason: job.skip_reason.unwrap_or(SkipReason::BranchFilter),
            }))
            .await;
        }

        let mut in_flight: JoinSet<Finished> = JoinSet::new();
        let mut halted = false;

        loop {
            if !halted {
                self.issue_ready(dag, &mut run, &mut in_flight).await?;
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let finished =
                joined.map_err(|e| Error::Internal(format!("job task failed to join: {}", e)))?;

            let outcome = match finished.result {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(job = %finished.name, error = %e, "Job runner error");
                    JobOutcome::failed(None, finished.elapsed_ms, None)
                }
            };

            run.complete(
                &finished.name,
                outcome.success,
                outcome.exit_code,
                outcome.duration_ms,
            )?;

            if outcome.success {
                info!(job = %finished.name, duration_ms = outcome.duration_ms, "Job succeeded");
            } else {
                warn!(
                    job = %finished.name,
                    exit_code = ?outcome.exit_code,
                    failed_step = ?outcome.failed_step,
                    "Job failed"
                );
                if !halted {
                    halted = true;
                    info!(
                        in_flight = in_flight.len(),
                        "Halting job issuance, waiting for running jobs"
                    );
                }
            }

            self.publish(Event::JobCompleted(JobCompletedPayload {
                run_id: run.id,
                workflow: run.workflow.clone(),
                job: finished.name.clone(),
                success: outcome.success,
                exit_code: outcome.exit_code,
                duration_ms: outcome.duration_ms,
                failed_step: outcome.failed_step.clone(),
                completed_at: Utc::now(),
            }))
            .await;
        }

        run.finalize();

        match run.status {
            RunStatus::Succeeded => info!(run_id = %run.id, workflow = %run.workflow, "Workflow run succeeded"),
            _ => warn!(
                run_id = %run.id,
                workflow = %run.workflow,
                failed_job = ?run.failed_job,
                pending = run.count(JobStatus::Pending),
                "Workflow run failed"
            ),
        }

        self.publish(Event::RunCompleted(RunCompletedPayload {
            run_id: run.id,
            workflow: run.workflow.clone(),
            status: run.status,
            jobs_succeeded: run.count(JobStatus::Succeeded),
            jobs_failed: run.count(JobStatus::Failed),
            jobs_skipped: run.count(JobStatus::SkippedFiltered),
            failed_job: run.failed_job.clone(),
            duration_ms: run.duration_ms().unwrap_or_default(),
            completed_at: Utc::now(),
        }))
        .await;

        Ok(run)
    }

    /// Start every pending job whose requirements are met, up to the
    /// parallelism bound.
    async fn issue_ready(
        &self,
        dag: &WorkflowDag,
        run: &mut ExecutionRun,
        in_flight: &mut JoinSet<Finished>,
    ) -> Result<()> {
        for node in dag.topological_order() {
            if self.max_parallel_jobs > 0 && in_flight.len() >= self.max_parallel_jobs {
                break;
            }
            if run.status_of(&node.name) != Some(JobStatus::Pending) {
                continue;
            }
            let ready = dag.is_ready(&node.name, |pred| {
                run.status_of(pred)
                    .is_some_and(|status| status.satisfies_requires())
            });
            if !ready {
                continue;
            }

            run.transition(&node.name, JobStatus::Eligible)?;
            run.transition(&node.name, JobStatus::Running)?;
            info!(job = %node.name, executor = node.job.executor.kind(), "Starting job");

            self.publish(Event::JobStarted(JobStartedPayload {
                run_id: run.id,
                workflow: run.workflow.clone(),
                job: node.name.clone(),
                executor: node.job.executor.kind().to_string(),
                started_at: Utc::now(),
            }))
            .await;

            let ctx = JobContext {
                run_id: run.id,
                workflow: run.workflow.clone(),
                instance: node.name.clone(),
                branch: run.branch.clone(),
                commit: run.commit.clone(),
                job: node.job.clone(),
            };
            let runner = Arc::clone(&self.runner);

            in_flight.spawn(async move {
                let start = Instant::now();
                let result = AssertUnwindSafe(runner.run(&ctx))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        Err(Error::JobExecution {
                            job: ctx.instance.clone(),
                            reason: "runner panicked".to_string(),
                        })
                    });
                Finished {
                    name: ctx.instance.clone(),
                    result,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                }
            });
        }
        Ok(())
    }

    async fn publish(&self, event: Event) {
        if let Some(events) = &self.events
            && let Err(e) = events.publish(event).await
        {
            warn!(error = %e, "Failed to publish event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Project;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Runner that sleeps briefly, tracks peak concurrency and fails or
    /// panics on request.
    #[derive(Default)]
    struct TestRunner {
        fail: HashSet<String>,
        panic: HashSet<String>,
        error: HashSet<String>,
        running: AtomicUsize,
        peak: AtomicUsize,
        started: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobRunner for TestRunner {
        async fn run(&self, ctx: &JobContext) -> Result<JobOutcome> {
            self.started.lock().unwrap().push(ctx.instance.clone());
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.panic.contains(&ctx.instance) {
                panic!("boom");
            }
            if self.error.contains(&ctx.instance) {
                return Err(Error::JobExecution {
                    job: ctx.instance.clone(),
                    reason: "spawn failed".to_string(),
                });
            }
            if self.fail.contains(&ctx.instance) {
                return Ok(JobOutcome::failed(Some(1), 20, Some("exit 1".to_string())));
            }
            Ok(JobOutcome::succeeded(20))
        }
    }

    const DOC: &str = r#"
jobs:
  a: {}
  b: {}
  c: {}
  d: {}
  gated: {}
  after_gated: {}
workflows:
  wide:
    jobs: [a, b, c, d]
  chain:
    jobs:
      - a
      - b:
          requires: [a]
      - c:
          requires: [b]
  pruned:
    jobs:
      - gated:
          filters:
            branches:
              only: master
      - after_gated:
          requires: [gated]
      - a
      - b:
          requires: [gated, a]
"#;

    #[tokio::test]
    async fn test_parallelism_bound() {
        let project = Project::from_yaml(DOC).unwrap();
        let runner = Arc::new(TestRunner::default());
        let scheduler = WorkflowScheduler::new(runner.clone()).with_max_parallel_jobs(2);

        let run = scheduler
            .execute(project.dag("wide").unwrap(), RunRequest::manual("wide", "dev"))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(runner.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unbounded_runs_all_roots_together() {
        let project = Project::from_yaml(DOC).unwrap();
        let runner = Arc::new(TestRunner::default());
        let scheduler = WorkflowScheduler::new(runner.clone());

        scheduler
            .execute(project.dag("wide").unwrap(), RunRequest::manual("wide", "dev"))
            .await
            .unwrap();

        assert_eq!(runner.peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_upstream_filtered_pruning() {
        let project = Project::from_yaml(DOC).unwrap();
        let scheduler = WorkflowScheduler::new(Arc::new(TestRunner::default()));

        let run = scheduler
            .plan(project.dag("pruned").unwrap(), &RunRequest::manual("pruned", "dev"))
            .unwrap();

        let gated = run.job("gated").unwrap();
        assert_eq!(gated.status, JobStatus::SkippedFiltered);
        assert_eq!(gated.skip_reason, Some(SkipReason::BranchFilter));

        let after = run.job("after_gated").unwrap();
        assert_eq!(after.status, JobStatus::SkippedFiltered);
        assert_eq!(after.skip_reason, Some(SkipReason::UpstreamFiltered));

        // Only some requirements filtered: still part of the run
        assert_eq!(run.status_of("b"), Some(JobStatus::Pending));
    }

    #[tokio::test]
    async fn test_partially_filtered_requirements_are_satisfied() {
        let project = Project::from_yaml(DOC).unwrap();
        let runner = Arc::new(TestRunner::default());
        let scheduler = WorkflowScheduler::new(runner.clone());

        let run = scheduler
            .execute(project.dag("pruned").unwrap(), RunRequest::manual("pruned", "dev"))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.status_of("b"), Some(JobStatus::Succeeded));
        assert_eq!(*runner.started.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failure_stops_chain() {
        let project = Project::from_yaml(DOC).unwrap();
        let runner = Arc::new(TestRunner {
            fail: HashSet::from(["b".to_string()]),
            ..Default::default()
        });
        let scheduler = WorkflowScheduler::new(runner);

        let run = scheduler
            .execute(project.dag("chain").unwrap(), RunRequest::manual("chain", "dev"))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failed_job.as_deref(), Some("b"));
        assert_eq!(run.job("b").unwrap().exit_code, Some(1));
        assert_eq!(run.status_of("c"), Some(JobStatus::Pending));
    }

    #[tokio::test]
    async fn test_runner_error_and_panic_fail_the_job() {
        let project = Project::from_yaml(DOC).unwrap();
        let runner = Arc::new(TestRunner {
            error: HashSet::from(["a".to_string()]),
            panic: HashSet::from(["b".to_string()]),
            ..Default::default()
        });
        let scheduler = WorkflowScheduler::new(runner);

        let run = scheduler
            .execute(project.dag("wide").unwrap(), RunRequest::manual("wide", "dev"))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.status_of("a"), Some(JobStatus::Failed));
        assert_eq!(run.status_of("b"), Some(JobStatus::Failed));
        // Started before the failures landed, allowed to finish
        assert_eq!(run.status_of("c"), Some(JobStatus::Succeeded));
        assert_eq!(run.status_of("d"), Some(JobStatus::Succeeded));
    }
}
