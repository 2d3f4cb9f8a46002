//! CLI configuration management.

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Workflow file used when `--file` is not given.
    #[serde(default = "default_workflow_file")]
    pub workflow_file: PathBuf,
    /// Branch for scheduler ticks when `--branch` is not given.
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// Concurrent job limit per run; 0 is unbounded.
    #[serde(default)]
    pub max_parallel_jobs: usize,
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: Option<u64>,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_workflow_file() -> PathBuf {
    PathBuf::from("gantry.yaml")
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_step_timeout() -> Option<u64> {
    Some(3600)
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            workflow_file: default_workflow_file(),
            default_branch: default_branch(),
            max_parallel_jobs: 0,
            step_timeout_secs: default_step_timeout(),
            log_format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => f.write_str("pretty"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

impl CliConfig {
    /// Load configuration from the user config file, or defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_yaml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the user config file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("dev", "gantry", "gantry")
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "workflow_file" => self.workflow_file = PathBuf::from(value),
            "default_branch" => {
                if value.trim().is_empty() {
                    bail!("default_branch cannot be empty");
                }
                self.default_branch = value.to_string();
            }
            "max_parallel_jobs" => {
                self.max_parallel_jobs = value
                    .parse()
                    .with_context(|| format!("Invalid max_parallel_jobs: {}", value))?;
            }
            "step_timeout_secs" => {
                self.step_timeout_secs = match value {
                    "none" | "0" => None,
                    secs => Some(
                        secs.parse()
                            .with_context(|| format!("Invalid step_timeout_secs: {}", secs))?,
                    ),
                };
            }
            "log_format" => {
                self.log_format = match value {
                    "pretty" => LogFormat::Pretty,
                    "json" => LogFormat::Json,
                    _ => bail!("Invalid log format: {}", value),
                };
            }
            _ => bail!("Unknown config key: {}", key),
        }
        Ok(())
    }
}
