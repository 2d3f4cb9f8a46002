//! Job execution backends for Gantry.

pub mod container;
pub mod runner;
pub mod shell;

pub use container::ContainerRunner;
pub use runner::{DryRunRunner, ExecutorRunner, RunnerConfig};
pub use shell::ShellRunner;
