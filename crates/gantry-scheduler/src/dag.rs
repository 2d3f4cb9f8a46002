//! DAG resolution for workflow jobs.

use crate::registry::JobRegistry;
use gantry_core::filter::BranchFilter;
use gantry_core::workflow::{JobDefinition, JobInstance, WorkflowDefinition};
use gantry_core::{Error, Result};
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// A node in the workflow DAG.
#[derive(Debug, Clone)]
pub struct DagNode {
    pub name: String,
    pub job: JobDefinition,
    pub filter: Option<BranchFilter>,
}

/// Directed acyclic graph representing `requires` edges of one workflow.
#[derive(Debug)]
pub struct WorkflowDag {
    workflow: String,
    graph: DiGraph<DagNode, ()>,
    name_to_index: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
}

impl WorkflowDag {
    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn node(&self, name: &str) -> Option<&DagNode> {
        self.name_to_index
            .get(name)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    /// Get the root jobs (jobs with no requirements).
    pub fn roots(&self) -> Vec<&DagNode> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count()
                    == 0
            })
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Get jobs that require a given job.
    pub fn successors(&self, name: &str) -> Vec<&DagNode> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Get jobs that must complete before a given job can run.
    pub fn predecessors(&self, name: &str) -> Vec<&DagNode> {
        self.neighbors(name, Direction::Incoming)
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&DagNode> {
        self.name_to_index
            .get(name)
            .map(|&idx| {
                let mut found: Vec<_> = self.graph.neighbors_directed(idx, direction).collect();
                // petgraph yields neighbors newest-edge first
                found.sort();
                found
                    .into_iter()
                    .filter_map(|n| self.graph.node_weight(n))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Jobs in an order where every job follows everything it requires.
    pub fn topological_order(&self) -> Vec<&DagNode> {
        self.order
            .iter()
            .filter_map(|&idx| self.graph.node_weight(idx))
            .collect()
    }

    /// All jobs in declaration order.
    pub fn nodes(&self) -> Vec<&DagNode> {
        self.graph
            .node_indices()
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Check if a job is ready to run given a status lookup for its
    /// predecessors.
    pub fn is_ready<F>(&self, name: &str, satisfied: F) -> bool
    where
        F: Fn(&str) -> bool,
    {
        self.predecessors(name)
            .iter()
            .all(|pred| satisfied(&pred.name))
    }

    /// Edges as `(required, dependent)` pairs.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .filter_map(|(from, to)| {
                let from = self.graph.node_weight(from)?;
                let to = self.graph.node_weight(to)?;
                Some((from.name.as_str(), to.name.as_str()))
            })
            .collect()
    }
}

/// Builder for constructing workflow DAGs.
pub struct DagBuilder<'a> {
    registry: &'a JobRegistry,
}

impl<'a> DagBuilder<'a> {
    pub fn new(registry: &'a JobRegistry) -> Self {
        Self { registry }
    }

    /// Build a DAG from a workflow definition.
    pub fn build(&self, workflow: &WorkflowDefinition) -> Result<WorkflowDag> {
        if workflow.jobs.is_empty() {
            return Err(Error::InvalidWorkflow(format!(
                "workflow {} has no jobs",
                workflow.name
            )));
        }

        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        for instance in &workflow.jobs {
            if name_to_index.contains_key(&instance.name) {
                return Err(Error::DuplicateJobInstance {
                    workflow: workflow.name.clone(),
                    name: instance.name.clone(),
                });
            }
            let node = self.make_node(instance)?;
            let idx = graph.add_node(node);
            name_to_index.insert(instance.name.clone(), idx);
        }

        for instance in &workflow.jobs {
            let idx = name_to_index[&instance.name];
            for target in &instance.requires {
                let dep_idx = name_to_index.get(target).ok_or_else(|| {
                    Error::UnknownJobReference {
                        workflow: workflow.name.clone(),
                        job: instance.name.clone(),
                        target: target.clone(),
                    }
                })?;
                if graph.find_edge(*dep_idx, idx).is_none() {
                    graph.add_edge(*dep_idx, idx, ());
                }
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| Error::CyclicDependency {
            workflow: workflow.name.clone(),
            job: graph[cycle.node_id()].name.clone(),
        })?;

        Ok(WorkflowDag {
            workflow: workflow.name.clone(),
            graph,
            name_to_index,
            order,
        })
    }

    fn make_node(&self, instance: &JobInstance) -> Result<DagNode> {
        let job = self.registry.lookup(&instance.job)?.clone();
        Ok(DagNode {
            name: instance.name.clone(),
            job,
            filter: instance.filter.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::workflow::{Executor, Trigger};

    fn make_registry(names: &[&str]) -> JobRegistry {
        let mut registry = JobRegistry::new();
        for name in names {
            registry
                .register(*name, Executor::Shell, vec![format!("echo {}", name)])
                .unwrap();
        }
        registry
    }

    fn make_instance(name: &str, requires: Vec<&str>) -> JobInstance {
        JobInstance {
            name: name.to_string(),
            job: name.to_string(),
            requires: requires.iter().map(|s| s.to_string()).collect(),
            filter: None,
        }
    }

    fn make_workflow(jobs: Vec<JobInstance>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "tests".to_string(),
            trigger: Trigger::Push { filter: None },
            jobs,
        }
    }

    #[test]
    fn test_fan_in_dag() {
        let registry = make_registry(&["wagon", "rhel_wagon", "build_bundle"]);
        let workflow = make_workflow(vec![
            make_instance("wagon", vec![]),
            make_instance("rhel_wagon", vec![]),
            make_instance("build_bundle", vec!["wagon", "rhel_wagon"]),
        ]);

        let dag = DagBuilder::new(&registry).build(&workflow).unwrap();

        let roots: Vec<_> = dag.roots().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(roots, vec!["wagon", "rhel_wagon"]);

        let preds: Vec<_> = dag
            .predecessors("build_bundle")
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(preds, vec!["wagon", "rhel_wagon"]);
        assert_eq!(dag.successors("wagon")[0].name, "build_bundle");
        assert_eq!(dag.edges().len(), 2);
    }

    #[test]
    fn test_topological_order_respects_requires() {
        let registry = make_registry(&["build", "test", "deploy"]);
        let workflow = make_workflow(vec![
            make_instance("deploy", vec!["test"]),
            make_instance("test", vec!["build"]),
            make_instance("build", vec![]),
        ]);

        let dag = DagBuilder::new(&registry).build(&workflow).unwrap();
        let order: Vec<_> = dag
            .topological_order()
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(order, vec!["build", "test", "deploy"]);
    }

    #[test]
    fn test_cycle_detected() {
        let registry = make_registry(&["a", "b", "c"]);
        let workflow = make_workflow(vec![
            make_instance("a", vec!["c"]),
            make_instance("b", vec!["a"]),
            make_instance("c", vec!["b"]),
        ]);

        let err = DagBuilder::new(&registry).build(&workflow).unwrap_err();
        assert!(matches!(err, Error::CyclicDependency { workflow, .. } if workflow == "tests"));
    }

    #[test]
    fn test_self_requirement_is_a_cycle() {
        let registry = make_registry(&["a"]);
        let workflow = make_workflow(vec![make_instance("a", vec!["a"])]);

        assert!(matches!(
            DagBuilder::new(&registry).build(&workflow),
            Err(Error::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_unknown_reference() {
        let registry = make_registry(&["release"]);
        let workflow = make_workflow(vec![make_instance("release", vec!["wagon"])]);

        let err = DagBuilder::new(&registry).build(&workflow).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownJobReference { job, target, .. } if job == "release" && target == "wagon"
        ));
    }

    #[test]
    fn test_unknown_job_definition() {
        let registry = make_registry(&[]);
        let workflow = make_workflow(vec![make_instance("wagon", vec![])]);

        assert!(matches!(
            DagBuilder::new(&registry).build(&workflow),
            Err(Error::UnknownJob(name)) if name == "wagon"
        ));
    }

    #[test]
    fn test_duplicate_instance() {
        let registry = make_registry(&["wagon"]);
        let workflow = make_workflow(vec![
            make_instance("wagon", vec![]),
            make_instance("wagon", vec![]),
        ]);

        assert!(matches!(
            DagBuilder::new(&registry).build(&workflow),
            Err(Error::DuplicateJobInstance { .. })
        ));
    }

    #[test]
    fn test_empty_workflow() {
        let registry = make_registry(&[]);
        assert!(matches!(
            DagBuilder::new(&registry).build(&make_workflow(vec![])),
            Err(Error::InvalidWorkflow(_))
        ));
    }

    #[test]
    fn test_is_ready() {
        let registry = make_registry(&["wagon", "rhel_wagon", "build_bundle"]);
        let workflow = make_workflow(vec![
            make_instance("wagon", vec![]),
            make_instance("rhel_wagon", vec![]),
            make_instance("build_bundle", vec!["wagon", "rhel_wagon"]),
        ]);
        let dag = DagBuilder::new(&registry).build(&workflow).unwrap();

        assert!(dag.is_ready("wagon", |_| false));
        assert!(!dag.is_ready("build_bundle", |name| name == "wagon"));
        assert!(dag.is_ready("build_bundle", |_| true));
    }
}
