//! Run and execution types.

use crate::ids::RunId;
use crate::workflow::TriggerKind;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Request to instantiate a workflow for a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub workflow: String,
    pub branch: String,
    pub commit: Option<String>,
    pub trigger: TriggerKind,
}

impl RunRequest {
    pub fn manual(workflow: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            workflow: workflow.into(),
            branch: branch.into(),
            commit: None,
            trigger: TriggerKind::Manual,
        }
    }

    pub fn with_commit(mut self, commit: Option<String>) -> Self {
        self.commit = commit;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    SkippedFiltered,
    Eligible,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::SkippedFiltered | JobStatus::Succeeded | JobStatus::Failed
        )
    }

    /// Whether a dependent may treat this predecessor as done.
    pub fn satisfies_requires(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::SkippedFiltered)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::SkippedFiltered)
                | (JobStatus::Pending, JobStatus::Eligible)
                | (JobStatus::Eligible, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::SkippedFiltered => "skipped-filtered",
            JobStatus::Eligible => "eligible",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a job was left out of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The job's own branch filter rejected the branch.
    BranchFilter,
    /// The job has no filter and every job it requires was filtered out.
    UpstreamFiltered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub name: String,
    pub status: JobStatus,
    pub skip_reason: Option<SkipReason>,
    pub exit_code: Option<i32>,
    pub duration_ms: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobState {
    fn new(name: String) -> Self {
        Self {
            name,
            status: JobStatus::Pending,
            skip_reason: None,
            exit_code: None,
            duration_ms: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// One instantiation of a workflow for a branch and commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRun {
    pub id: RunId,
    pub workflow: String,
    pub branch: String,
    pub commit: Option<String>,
    pub trigger: TriggerKind,
    pub status: RunStatus,
    pub jobs: Vec<JobState>,
    pub failed_job: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRun {
    pub fn new<I, S>(request: &RunRequest, job_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: RunId::new(),
            workflow: request.workflow.clone(),
            branch: request.branch.clone(),
            commit: request.commit.clone(),
            trigger: request.trigger,
            status: RunStatus::Pending,
            jobs: job_names
                .into_iter()
                .map(|n| JobState::new(n.into()))
                .collect(),
            failed_job: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn job(&self, name: &str) -> Option<&JobState> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn status_of(&self, name: &str) -> Option<JobStatus> {
        self.job(name).map(|j| j.status)
    }

    /// Move a job to `next`, rejecting transitions the lifecycle forbids.
    pub fn transition(&mut self, name: &str, next: JobStatus) -> Result<()> {
        let state = self
            .jobs
            .iter_mut()
            .find(|j| j.name == name)
            .ok_or_else(|| Error::UnknownJob(name.to_string()))?;

        if !state.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                job: name.to_string(),
                from: state.status,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            JobStatus::Running => state.started_at = Some(now),
            JobStatus::Succeeded | JobStatus::Failed => state.completed_at = Some(now),
            _ => {}
        }
        state.status = next;
        Ok(())
    }

    pub fn skip(&mut self, name: &str, reason: SkipReason) -> Result<()> {
        self.transition(name, JobStatus::SkippedFiltered)?;
        if let Some(state) = self.jobs.iter_mut().find(|j| j.name == name) {
            state.skip_reason = Some(reason);
        }
        Ok(())
    }

    /// Record the result of a finished job.
    pub fn complete(
        &mut self,
        name: &str,
        success: bool,
        exit_code: Option<i32>,
        duration_ms: u64,
    ) -> Result<()> {
        let next = if success {
            JobStatus::Succeeded
        } else {
            JobStatus::Failed
        };
        self.transition(name, next)?;
        if let Some(state) = self.jobs.iter_mut().find(|j| j.name == name) {
            state.exit_code = exit_code;
            state.duration_ms = Some(duration_ms);
        }
        if !success && self.failed_job.is_none() {
            self.failed_job = Some(name.to_string());
        }
        Ok(())
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    /// Settle the run status once nothing more can be issued. A run that is
    /// already settled is left untouched.
    pub fn finalize(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        let all_done = self.jobs.iter().all(|j| j.status.is_terminal());

        self.status = if self.failed_job.is_none() && all_done {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        self.completed_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.completed_at
            .map(|done| (done - self.created_at).num_milliseconds().max(0) as u64)
    }
}
