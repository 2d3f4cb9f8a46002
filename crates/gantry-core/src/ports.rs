//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the orchestration core and the
//! adapters that actually run jobs or carry events.

use crate::Result;
use crate::events::Event;
use crate::ids::RunId;
use crate::workflow::JobDefinition;
use async_trait::async_trait;

/// Everything a runner needs to execute one job instance.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub run_id: RunId,
    pub workflow: String,
    /// Instance name inside the workflow.
    pub instance: String,
    pub branch: String,
    pub commit: Option<String>,
    pub job: JobDefinition,
}

impl JobContext {
    /// Environment variables exposed to every step.
    pub fn env(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            ("GANTRY_RUN_ID".to_string(), self.run_id.to_string()),
            ("GANTRY_WORKFLOW".to_string(), self.workflow.clone()),
            ("GANTRY_JOB".to_string(), self.instance.clone()),
            ("GANTRY_BRANCH".to_string(), self.branch.clone()),
        ];
        if let Some(commit) = &self.commit {
            vars.push(("GANTRY_COMMIT".to_string(), commit.clone()));
        }
        vars
    }
}

/// Result of running a job to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    /// First step that did not exit cleanly.
    pub failed_step: Option<String>,
}

impl JobOutcome {
    pub fn succeeded(duration_ms: u64) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            duration_ms,
            failed_step: None,
        }
    }

    pub fn failed(exit_code: Option<i32>, duration_ms: u64, failed_step: Option<String>) -> Self {
        Self {
            success: false,
            exit_code,
            duration_ms,
            failed_step,
        }
    }
}

/// Capability to run a job. Step contents are opaque to the scheduler.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run every step of the job, stopping at the first failure.
    async fn run(&self, ctx: &JobContext) -> Result<JobOutcome>;
}

/// Event bus for publishing run lifecycle events.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: Event) -> Result<()>;
}
