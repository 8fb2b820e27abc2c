//! Deploy trigger conditions

use anyhow::{Context, Result};
use regex::Regex;

/// Branch the deploy phase targets when a deploy has no `on` block
pub const DEFAULT_DEPLOY_BRANCH: &str = "master";

/// A single branch pattern (not serializable due to Regex)
#[derive(Debug, Clone)]
pub enum BranchPattern {
    /// Branch name must match exactly
    Exact(String),
    /// `/.../` pattern from the config, matched as a regular expression
    Regex(Regex),
}

impl BranchPattern {
    /// Parse a branch entry; entries wrapped in slashes are regular expressions
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.len() >= 2 && raw.starts_with('/') && raw.ends_with('/') {
            let inner = &raw[1..raw.len() - 1];
            let regex = Regex::new(inner)
                .with_context(|| format!("Invalid branch pattern '{}'", raw))?;
            Ok(BranchPattern::Regex(regex))
        } else {
            Ok(BranchPattern::Exact(raw.to_string()))
        }
    }

    pub fn matches(&self, branch: &str) -> bool {
        match self {
            BranchPattern::Exact(name) => name == branch,
            BranchPattern::Regex(regex) => regex.is_match(branch),
        }
    }

    fn display(&self) -> String {
        match self {
            BranchPattern::Exact(name) => name.clone(),
            BranchPattern::Regex(regex) => format!("/{}/", regex.as_str()),
        }
    }
}

/// When a deploy action is allowed to run
#[derive(Debug, Clone)]
pub enum DeployCondition {
    /// Only on branches matching one of the patterns
    Branches(Vec<BranchPattern>),
    /// On every branch
    AllBranches,
}

impl DeployCondition {
    /// Condition used when the config has no `on` block
    pub fn default_branch() -> Self {
        DeployCondition::Branches(vec![BranchPattern::Exact(
            DEFAULT_DEPLOY_BRANCH.to_string(),
        )])
    }

    /// Check whether the condition allows deploying from `branch`
    pub fn matches(&self, branch: &str) -> bool {
        match self {
            DeployCondition::AllBranches => true,
            DeployCondition::Branches(patterns) => patterns.iter().any(|p| p.matches(branch)),
        }
    }

    /// Human-readable form, e.g. `branch master` or `all branches`
    pub fn describe(&self) -> String {
        match self {
            DeployCondition::AllBranches => "all branches".to_string(),
            DeployCondition::Branches(patterns) => {
                let names: Vec<String> = patterns.iter().map(|p| p.display()).collect();
                format!("branch {}", names.join(", "))
            }
        }
    }
}
