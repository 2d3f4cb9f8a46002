//! Run lifecycle events.

use crate::ids::RunId;
use crate::run::{RunStatus, SkipReason};
use crate::workflow::TriggerKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// All events emitted while executing a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RunStarted(RunStartedPayload),
    JobSkipped(JobSkippedPayload),
    JobStarted(JobStartedPayload),
    JobCompleted(JobCompletedPayload),
    RunCompleted(RunCompletedPayload),
}

impl Event {
    pub fn run_id(&self) -> RunId {
        match self {
            Event::RunStarted(p) => p.run_id,
            Event::JobSkipped(p) => p.run_id,
            Event::JobStarted(p) => p.run_id,
            Event::JobCompleted(p) => p.run_id,
            Event::RunCompleted(p) => p.run_id,
        }
    }

    /// Dotted subject, e.g. `run.job.started.<run_id>`.
    pub fn subject(&self) -> String {
        match self {
            Event::RunStarted(p) => format!("run.started.{}", p.run_id),
            Event::JobSkipped(p) => format!("run.job.skipped.{}", p.run_id),
            Event::JobStarted(p) => format!("run.job.started.{}", p.run_id),
            Event::JobCompleted(p) => format!("run.job.completed.{}", p.run_id),
            Event::RunCompleted(p) => format!("run.completed.{}", p.run_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStartedPayload {
    pub run_id: RunId,
    pub workflow: String,
    pub branch: String,
    pub commit: Option<String>,
    pub trigger: TriggerKind,
    pub job_count: usize,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSkippedPayload {
    pub run_id: RunId,
    pub workflow: String,
    pub job: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStartedPayload {
    pub run_id: RunId,
    pub workflow: String,
    pub job: String,
    pub executor: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCompletedPayload {
    pub run_id: RunId,
    pub workflow: String,
    pub job: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub failed_step: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCompletedPayload {
    pub run_id: RunId,
    pub workflow: String,
    pub status: RunStatus,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub jobs_skipped: usize,
    pub failed_job: Option<String>,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}
