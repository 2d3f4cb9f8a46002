//! Branch filter evaluation.
//!
//! A pattern written between slashes (`/master|dev/`) is a regular expression
//! that must match the whole branch name. Anything else is compared literally.

use crate::workflow::BranchFilterConfig;
use crate::{Error, Result};
use regex::Regex;

/// A single compiled branch pattern.
#[derive(Debug, Clone)]
pub enum BranchPattern {
    Exact(String),
    Regex { source: String, regex: Regex },
}

impl BranchPattern {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.len() >= 2 && trimmed.starts_with('/') && trimmed.ends_with('/') {
            let inner = &trimmed[1..trimmed.len() - 1];
            let regex = Regex::new(&format!("^(?:{})$", inner)).map_err(|e| {
                Error::InvalidFilter {
                    pattern: raw.to_string(),
                    reason: e.to_string(),
                }
            })?;
            return Ok(BranchPattern::Regex {
                source: trimmed.to_string(),
                regex,
            });
        }

        if trimmed.is_empty() {
            return Err(Error::InvalidFilter {
                pattern: raw.to_string(),
                reason: "empty pattern".to_string(),
            });
        }

        Ok(BranchPattern::Exact(trimmed.to_string()))
    }

    pub fn matches(&self, branch: &str) -> bool {
        match self {
            BranchPattern::Exact(name) => name == branch,
            BranchPattern::Regex { regex, .. } => regex.is_match(branch),
        }
    }

    /// The pattern as written in the workflow source.
    pub fn as_str(&self) -> &str {
        match self {
            BranchPattern::Exact(name) => name,
            BranchPattern::Regex { source, .. } => source,
        }
    }
}

/// `only` / `ignore` branch restriction attached to a job or trigger.
#[derive(Debug, Clone, Default)]
pub struct BranchFilter {
    only: Vec<BranchPattern>,
    ignore: Vec<BranchPattern>,
}

impl BranchFilter {
    pub fn new(only: Vec<BranchPattern>, ignore: Vec<BranchPattern>) -> Self {
        Self { only, ignore }
    }

    /// Compile a filter from its source form. Returns `None` when the
    /// configuration restricts nothing.
    pub fn from_config(config: &BranchFilterConfig) -> Result<Option<Self>> {
        let only = config
            .only
            .iter()
            .map(|p| BranchPattern::parse(p))
            .collect::<Result<Vec<_>>>()?;
        let ignore = config
            .ignore
            .iter()
            .map(|p| BranchPattern::parse(p))
            .collect::<Result<Vec<_>>>()?;

        if only.is_empty() && ignore.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self::new(only, ignore)))
    }

    pub fn matches(&self, branch: &str) -> bool {
        let included = self.only.is_empty() || self.only.iter().any(|p| p.matches(branch));
        included && !self.ignore.iter().any(|p| p.matches(branch))
    }

    pub fn only(&self) -> &[BranchPattern] {
        &self.only
    }

    pub fn ignore(&self) -> &[BranchPattern] {
        &self.ignore
    }
}

/// Evaluate a single raw pattern against a branch name.
pub fn matches(pattern: &str, branch: &str) -> Result<bool> {
    Ok(BranchPattern::parse(pattern)?.matches(branch))
}

/// No filter means every branch is eligible.
pub fn allows(filter: Option<&BranchFilter>, branch: &str) -> bool {
    filter.is_none_or(|f| f.matches(branch))
}
