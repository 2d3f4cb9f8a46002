//! Loading and validating a workflow document.
//!
//! Every configuration error (unknown references, cycles, bad filters, bad
//! cron expressions) is reported here, before any job executes.

use crate::dag::{DagBuilder, WorkflowDag};
use crate::registry::JobRegistry;
use crate::triggers;
use gantry_core::filter::BranchFilter;
use gantry_core::workflow::{
    Executor, FiltersConfig, JobEntry, JobInstance, Trigger, WorkflowConfig, WorkflowDefinition,
    WorkflowDocument,
};
use gantry_core::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// A loaded, immutable set of jobs and workflows with their built DAGs.
#[derive(Debug)]
pub struct Project {
    registry: JobRegistry,
    workflows: Vec<WorkflowDefinition>,
    dags: HashMap<String, WorkflowDag>,
}

impl Project {
    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml(&source)
    }

    pub fn from_yaml(source: &str) -> Result<Self> {
        Self::from_document(WorkflowDocument::from_yaml(source)?)
    }

    pub fn from_document(document: WorkflowDocument) -> Result<Self> {
        let mut registry = JobRegistry::new();
        for (name, job) in &document.jobs {
            let executor = match &job.executor {
                Some(executor_name) => document
                    .executors
                    .get(executor_name)
                    .cloned()
                    .ok_or_else(|| Error::UnknownExecutor {
                        job: name.clone(),
                        executor: executor_name.clone(),
                    })?,
                None => Executor::Shell,
            };
            registry.register(name.clone(), executor, job.steps.clone())?;
        }

        let mut workflows = Vec::with_capacity(document.workflows.len());
        let mut dags = HashMap::new();
        for (name, config) in &document.workflows {
            let workflow = build_workflow(name, config)?;
            let dag = DagBuilder::new(&registry).build(&workflow)?;
            debug!(workflow = %name, jobs = dag.len(), "Built workflow graph");
            dags.insert(name.clone(), dag);
            workflows.push(workflow);
        }

        Ok(Self {
            registry,
            workflows,
            dags,
        })
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn workflows(&self) -> &[WorkflowDefinition] {
        &self.workflows
    }

    pub fn workflow(&self, name: &str) -> Result<&WorkflowDefinition> {
        self.workflows
            .iter()
            .find(|w| w.name == name)
            .ok_or_else(|| Error::UnknownWorkflow(name.to_string()))
    }

    pub fn dag(&self, name: &str) -> Result<&WorkflowDag> {
        self.dags
            .get(name)
            .ok_or_else(|| Error::UnknownWorkflow(name.to_string()))
    }
}

fn build_workflow(name: &str, config: &WorkflowConfig) -> Result<WorkflowDefinition> {
    let trigger = match config.triggers.as_slice() {
        [] => Trigger::Push { filter: None },
        [only] => {
            let cron = only.schedule.cron.trim().to_string();
            // Surface bad expressions at load time
            triggers::parse_schedule(&cron)?;
            Trigger::Schedule {
                cron,
                filter: compile_filters(only.schedule.filters.as_ref())?,
            }
        }
        _ => {
            return Err(Error::InvalidWorkflow(format!(
                "workflow {} declares more than one trigger",
                name
            )));
        }
    };

    let mut jobs = Vec::with_capacity(config.jobs.len());
    for entry in &config.jobs {
        jobs.push(build_instance(name, entry)?);
    }

    Ok(WorkflowDefinition {
        name: name.to_string(),
        trigger,
        jobs,
    })
}

fn build_instance(workflow: &str, entry: &JobEntry) -> Result<JobInstance> {
    match entry {
        JobEntry::Name(job) => Ok(JobInstance {
            name: job.clone(),
            job: job.clone(),
            requires: Vec::new(),
            filter: None,
        }),
        JobEntry::Configured(map) => {
            let mut entries = map.iter();
            let (job, settings) = match (entries.next(), entries.next()) {
                (Some(first), None) => first,
                _ => {
                    return Err(Error::InvalidWorkflow(format!(
                        "each job entry in workflow {} must name exactly one job",
                        workflow
                    )));
                }
            };
            Ok(JobInstance {
                name: settings.name.clone().unwrap_or_else(|| job.clone()),
                job: job.clone(),
                requires: settings.requires.clone(),
                filter: compile_filters(settings.filters.as_ref())?,
            })
        }
    }
}

fn compile_filters(filters: Option<&FiltersConfig>) -> Result<Option<BranchFilter>> {
    match filters.and_then(|f| f.branches.as_ref()) {
        Some(branches) => BranchFilter::from_config(branches),
        None => Ok(None),
    }
}
