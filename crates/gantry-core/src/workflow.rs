//! Workflow definition types.
//!
//! The `*Config` / `WorkflowDocument` types mirror the user-authored YAML.
//! `JobDefinition`, `WorkflowDefinition` and `JobInstance` are the validated
//! domain model built from it.

use crate::filter::BranchFilter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level workflow source document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDocument {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub executors: BTreeMap<String, Executor>,
    #[serde(default)]
    pub jobs: BTreeMap<String, JobConfig>,
    #[serde(default)]
    pub workflows: BTreeMap<String, WorkflowConfig>,
}

impl WorkflowDocument {
    pub fn from_yaml(source: &str) -> crate::Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }
}

/// Environment a job's steps run in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Executor {
    Docker {
        image: String,
    },
    Machine {
        #[serde(default)]
        image: Option<String>,
    },
    Shell,
}

impl Executor {
    pub fn kind(&self) -> &'static str {
        match self {
            Executor::Docker { .. } => "docker",
            Executor::Machine { .. } => "machine",
            Executor::Shell => "shell",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobConfig {
    /// Name of an entry in `executors`. Host shell when absent.
    #[serde(default)]
    pub executor: Option<String>,
    #[serde(default)]
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub jobs: Vec<JobEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub cron: String,
    #[serde(default)]
    pub filters: Option<FiltersConfig>,
}

/// A job listed in a workflow: either a bare job name or a single-key map
/// carrying `requires` / `filters`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobEntry {
    Name(String),
    Configured(BTreeMap<String, JobEntryConfig>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobEntryConfig {
    /// Instance name, when the same job appears more than once.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub filters: Option<FiltersConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FiltersConfig {
    #[serde(default)]
    pub branches: Option<BranchFilterConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchFilterConfig {
    #[serde(default)]
    pub only: PatternList,
    #[serde(default)]
    pub ignore: PatternList,
}

/// One pattern or a list of patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternList {
    One(String),
    Many(Vec<String>),
}

impl Default for PatternList {
    fn default() -> Self {
        PatternList::Many(Vec::new())
    }
}

impl PatternList {
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        match self {
            PatternList::One(p) => std::slice::from_ref(p).iter(),
            PatternList::Many(ps) => ps.iter(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// A registered unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    pub executor: Executor,
    pub steps: Vec<String>,
}

/// How a workflow gets instantiated.
#[derive(Debug, Clone)]
pub enum Trigger {
    Push {
        filter: Option<BranchFilter>,
    },
    Schedule {
        cron: String,
        filter: Option<BranchFilter>,
    },
}

impl Trigger {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Trigger::Push { .. } => TriggerKind::Push,
            Trigger::Schedule { .. } => TriggerKind::Schedule,
        }
    }

    pub fn filter(&self) -> Option<&BranchFilter> {
        match self {
            Trigger::Push { filter } | Trigger::Schedule { filter, .. } => filter.as_ref(),
        }
    }

    pub fn cron(&self) -> Option<&str> {
        match self {
            Trigger::Schedule { cron, .. } => Some(cron),
            Trigger::Push { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Push,
    Schedule,
    Manual,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerKind::Push => "push",
            TriggerKind::Schedule => "schedule",
            TriggerKind::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// A job's placement inside one workflow.
#[derive(Debug, Clone)]
pub struct JobInstance {
    pub name: String,
    pub job: String,
    pub requires: Vec<String>,
    pub filter: Option<BranchFilter>,
}

#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub name: String,
    pub trigger: Trigger,
    pub jobs: Vec<JobInstance>,
}

impl WorkflowDefinition {
    pub fn instance(&self, name: &str) -> Option<&JobInstance> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_entries() {
        let yaml = r#"
jobs:
  build:
    steps: ["make"]
  deploy:
    executor: py
    steps: ["make deploy"]
executors:
  py:
    type: docker
    image: python:3.12
workflows:
  main:
    jobs:
      - build
      - deploy:
          requires: [build]
          filters:
            branches:
              only: '/([0-9\.]*\-build|master)/'
"#;
        let doc = WorkflowDocument::from_yaml(yaml).unwrap();

        assert_eq!(
            doc.executors["py"],
            Executor::Docker {
                image: "python:3.12".to_string()
            }
        );
        let workflow = &doc.workflows["main"];
        assert!(workflow.triggers.is_empty());
        assert!(matches!(&workflow.jobs[0], JobEntry::Name(n) if n == "build"));

        let JobEntry::Configured(entry) = &workflow.jobs[1] else {
            panic!("expected configured entry");
        };
        let deploy = &entry["deploy"];
        assert_eq!(deploy.requires, vec!["build".to_string()]);
        let branches = deploy.filters.as_ref().unwrap().branches.as_ref().unwrap();
        assert_eq!(
            branches.only.iter().collect::<Vec<_>>(),
            vec![r"/([0-9\.]*\-build|master)/"]
        );
        assert!(branches.ignore.is_empty());
    }

    #[test]
    fn test_parse_schedule_trigger() {
        let yaml = r#"
workflows:
  nightly:
    triggers:
      - schedule:
          cron: "0 1 * * *"
          filters:
            branches:
              only:
                - master
    jobs: [build]
"#;
        let doc = WorkflowDocument::from_yaml(yaml).unwrap();
        let trigger = &doc.workflows["nightly"].triggers[0];

        assert_eq!(trigger.schedule.cron, "0 1 * * *");
        let only = &trigger
            .schedule
            .filters
            .as_ref()
            .unwrap()
            .branches
            .as_ref()
            .unwrap()
            .only;
        assert_eq!(only.iter().collect::<Vec<_>>(), vec!["master"]);
    }

    #[test]
    fn test_machine_executor_image_optional() {
        let doc = WorkflowDocument::from_yaml("executors:\n  vm:\n    type: machine\n").unwrap();
        assert_eq!(doc.executors["vm"], Executor::Machine { image: None });
        assert_eq!(doc.executors["vm"].kind(), "machine");
    }
}
