//! Error types for Gantry.

use crate::run::JobStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Registry errors
    #[error("Job already registered: {0}")]
    DuplicateJob(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Unknown executor \"{executor}\" referenced by job {job}")]
    UnknownExecutor { job: String, executor: String },

    // Workflow errors
    #[error("Workflow not found: {0}")]
    UnknownWorkflow(String),

    #[error("Job {job} in workflow {workflow} requires unknown job {target}")]
    UnknownJobReference {
        workflow: String,
        job: String,
        target: String,
    },

    #[error("Cycle detected in workflow {workflow} involving job {job}")]
    CyclicDependency { workflow: String, job: String },

    #[error("Job {name} appears more than once in workflow {workflow}")]
    DuplicateJobInstance { workflow: String, name: String },

    #[error("Invalid branch filter {pattern}: {reason}")]
    InvalidFilter { pattern: String, reason: String },

    #[error("Invalid cron expression {expression}: {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Invalid workflow definition: {0}")]
    InvalidWorkflow(String),

    // Execution errors
    #[error("Job {job} failed: {reason}")]
    JobExecution { job: String, reason: String },

    #[error("Invalid status transition for job {job}: {from} -> {to}")]
    InvalidTransition {
        job: String,
        from: JobStatus,
        to: JobStatus,
    },

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is raised while loading configuration, before any
    /// job has been issued.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::DuplicateJob(_)
                | Error::UnknownJob(_)
                | Error::UnknownExecutor { .. }
                | Error::UnknownWorkflow(_)
                | Error::UnknownJobReference { .. }
                | Error::CyclicDependency { .. }
                | Error::DuplicateJobInstance { .. }
                | Error::InvalidFilter { .. }
                | Error::InvalidCron { .. }
                | Error::InvalidWorkflow(_)
                | Error::Serialization(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
