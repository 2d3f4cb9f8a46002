//! Gantry CLI entrypoint.

use clap::Parser;
use console::style;
use std::process::ExitCode;

mod commands;
mod config;
mod handlers;
mod logging;
mod timestamp;

use commands::{Commands, ConfigCommands, TriggerCommands};
use config::{CliConfig, LogFormat};

#[derive(Parser)]
#[command(name = "gantry")]
#[command(author, version, about = "Run CI workflows locally", long_about = None)]
struct Cli {
    /// Log output format (overrides config)
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match CliConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", style("warning:").yellow(), e);
            CliConfig::default()
        }
    };
    logging::init(cli.log_format.unwrap_or(config.log_format));

    let result = match cli.command {
        Commands::RunWorkflow(args) => handlers::run_workflow(&config, args).await,
        Commands::Trigger { command } => match command {
            TriggerCommands::Push {
                branch,
                commit,
                common,
            } => handlers::trigger_push(&config, &branch, commit, common).await,
            TriggerCommands::Schedule {
                now,
                branch,
                common,
            } => handlers::trigger_schedule(&config, now, branch, common).await,
        },
        Commands::Plan {
            workflow,
            branch,
            file,
        } => handlers::plan(&config, &workflow, &branch, file),
        Commands::Validate { path } => handlers::validate(&config, path),
        Commands::Init => handlers::init(),
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config),
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value),
        },
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            ExitCode::from(error_exit_code(&e))
        }
    }
}

/// Configuration and input problems exit 2; anything else that aborts a
/// command exits 1.
fn error_exit_code(err: &anyhow::Error) -> u8 {
    let configuration = err.chain().any(|cause| {
        if let Some(e) = cause.downcast_ref::<gantry_core::Error>() {
            e.is_configuration() || matches!(e, gantry_core::Error::Io(_))
        } else {
            cause.is::<std::io::Error>() || cause.is::<serde_yaml::Error>()
        }
    });
    if configuration { 2 } else { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_configuration_errors_exit_2() {
        let err = Err::<(), _>(gantry_core::Error::CyclicDependency {
            workflow: "tests".to_string(),
            job: "release".to_string(),
        })
        .context("loading gantry.yaml")
        .unwrap_err();
        assert_eq!(error_exit_code(&err), 2);

        let err = anyhow::Error::from(gantry_core::Error::UnknownWorkflow("deploy".to_string()));
        assert_eq!(error_exit_code(&err), 2);
    }

    #[test]
    fn test_runtime_errors_exit_1() {
        let err = anyhow::Error::from(gantry_core::Error::Internal("join failed".to_string()));
        assert_eq!(error_exit_code(&err), 1);
    }

    #[test]
    fn test_cli_parses_run_workflow() {
        let cli = Cli::try_parse_from([
            "gantry",
            "run-workflow",
            "nightly",
            "--branch",
            "master",
            "--now",
            "2024-05-01 01:00",
            "--dry-run",
        ])
        .unwrap();

        match cli.command {
            Commands::RunWorkflow(args) => {
                assert_eq!(args.workflow, "nightly");
                assert_eq!(args.branch, "master");
                assert!(args.now.is_some());
                assert!(args.dry_run);
            }
            _ => panic!("expected run-workflow"),
        }
    }
}
