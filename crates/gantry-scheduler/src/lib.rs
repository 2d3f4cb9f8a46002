//! Workflow scheduling and orchestration for Gantry.

pub mod bus;
pub mod dag;
pub mod project;
pub mod registry;
pub mod scheduler;
pub mod triggers;

pub use bus::BroadcastEventBus;
pub use dag::{DagBuilder, DagNode, WorkflowDag};
pub use project::Project;
pub use registry::JobRegistry;
pub use scheduler::WorkflowScheduler;
pub use triggers::{CronSchedule, TriggerDispatcher, TriggerEvent, cron_matches, next_fire};
