//! CLI command definitions.

use crate::timestamp::parse_timestamp;
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run one workflow for a branch
    RunWorkflow(RunWorkflowArgs),

    /// Dispatch a trigger event and run every workflow it starts
    Trigger {
        #[command(subcommand)]
        command: TriggerCommands,
    },

    /// Show which jobs would run, wait or be skipped
    Plan {
        /// Workflow name
        workflow: String,

        /// Branch to plan for
        #[arg(short, long)]
        branch: String,

        /// Path to workflow file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow file
        path: Option<PathBuf>,
    },

    /// Write a starter gantry.yaml
    Init,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args)]
pub struct RunWorkflowArgs {
    /// Workflow name
    pub workflow: String,

    /// Branch to build
    #[arg(short, long)]
    pub branch: String,

    /// Evaluate schedule triggers at this time instead of now
    #[arg(long, value_parser = parse_timestamp)]
    pub now: Option<DateTime<Utc>>,

    /// Commit being built
    #[arg(short, long)]
    pub commit: Option<String>,

    /// Path to workflow file
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Log steps instead of executing them
    #[arg(long)]
    pub dry_run: bool,

    /// Print the finished run as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum TriggerCommands {
    /// A push to a branch
    Push {
        /// Branch pushed to
        #[arg(short, long)]
        branch: String,

        /// Commit pushed
        #[arg(short, long)]
        commit: Option<String>,

        #[command(flatten)]
        common: TriggerArgs,
    },

    /// A scheduler tick
    Schedule {
        /// Tick time (defaults to now)
        #[arg(long, value_parser = parse_timestamp)]
        now: Option<DateTime<Utc>>,

        /// Branch to build (defaults to the configured default branch)
        #[arg(short, long)]
        branch: Option<String>,

        #[command(flatten)]
        common: TriggerArgs,
    },
}

#[derive(Args)]
pub struct TriggerArgs {
    /// Path to workflow file
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Log steps instead of executing them
    #[arg(long)]
    pub dry_run: bool,

    /// Print finished runs as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
