//! Named job definitions.

use gantry_core::workflow::{Executor, JobDefinition};
use gantry_core::{Error, Result};
use std::collections::BTreeMap;

/// Registry of every job a workflow may reference.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, JobDefinition>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. Names are unique.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        executor: Executor,
        steps: Vec<String>,
    ) -> Result<&JobDefinition> {
        let name = name.into();
        if self.jobs.contains_key(&name) {
            return Err(Error::DuplicateJob(name));
        }

        let definition = JobDefinition {
            name: name.clone(),
            executor,
            steps,
        };
        Ok(self.jobs.entry(name).or_insert(definition))
    }

    pub fn lookup(&self, name: &str) -> Result<&JobDefinition> {
        self.jobs
            .get(name)
            .ok_or_else(|| Error::UnknownJob(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &JobDefinition> {
        self.jobs.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = JobRegistry::new();
        registry
            .register("wagon", Executor::Shell, vec!["wagon create .".to_string()])
            .unwrap();

        let job = registry.lookup("wagon").unwrap();
        assert_eq!(job.name, "wagon");
        assert_eq!(job.steps.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = JobRegistry::new();
        registry.register("wagon", Executor::Shell, vec![]).unwrap();

        let err = registry
            .register(
                "wagon",
                Executor::Docker {
                    image: "centos:7".to_string(),
                },
                vec![],
            )
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateJob(name) if name == "wagon"));
        // The first definition is left untouched
        assert_eq!(registry.lookup("wagon").unwrap().executor, Executor::Shell);
    }

    #[test]
    fn test_unknown_lookup() {
        let registry = JobRegistry::new();
        assert!(matches!(
            registry.lookup("release"),
            Err(Error::UnknownJob(name)) if name == "release"
        ));
    }
}
