//! Pipeline domain model

use crate::core::{
    condition::DeployCondition,
    config::{PipelineConfig, ProviderKind},
    context::RunContext,
    job::Job,
    state::{ExecutionStatus, RunState},
    step::{Phase, Step, StepDefaults},
};
use anyhow::Result;
use serde_yaml::Value;
use std::collections::BTreeMap;

/// Name used when neither the config nor the caller names the pipeline
pub const DEFAULT_PIPELINE_NAME: &str = "pipeline";

/// A post-success publishing action
#[derive(Debug, Clone)]
pub struct DeployAction {
    /// 1-based position in the config
    pub index: usize,

    pub provider: ProviderKind,

    /// Provider-specific options
    pub options: BTreeMap<String, Value>,

    /// Branch gate
    pub condition: DeployCondition,
}

impl DeployAction {
    /// Option values that must never appear in logs
    pub fn secret_options(&self) -> Vec<String> {
        ["github_token", "api_key", "token"]
            .iter()
            .filter_map(|key| self.options.get(*key))
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect()
    }
}

/// Dependency cache strategy
#[derive(Debug, Clone, Default)]
pub struct CacheStrategy {
    /// Named caches, e.g. `pip`
    pub named: Vec<String>,

    /// Directories relative to the build dir
    pub directories: Vec<String>,
}

impl CacheStrategy {
    pub fn is_empty(&self) -> bool {
        self.named.is_empty() && self.directories.is_empty()
    }
}

/// A pipeline definition
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Environment family
    pub language: String,

    /// Interpreter versions; empty means a single unversioned job
    pub matrix: Vec<String>,

    /// Global environment
    pub env: BTreeMap<String, String>,

    pub cache: CacheStrategy,

    /// Main lifecycle steps, in execution order
    pub steps: Vec<Step>,

    /// Hook steps
    pub hooks: Vec<Step>,

    pub deploys: Vec<DeployAction>,

    /// Per-command timeout, also applied to deploy commands
    pub timeout_secs: u64,

    /// Execution state
    pub state: RunState,
}

impl Pipeline {
    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let defaults = StepDefaults::default();
        let timeout_secs = config.timeout_secs.unwrap_or(defaults.timeout_secs);

        let steps = Self::build_steps(config, &Phase::MAIN, timeout_secs);
        let hooks = Self::build_steps(config, &Phase::HOOKS, timeout_secs);

        let deploys = config
            .deploy
            .iter()
            .enumerate()
            .map(|(i, deploy)| {
                Ok(DeployAction {
                    index: i + 1,
                    provider: deploy.provider,
                    options: deploy.options.clone(),
                    condition: deploy.condition()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let cache = config
            .cache
            .as_ref()
            .map(|c| CacheStrategy {
                named: c.named(),
                directories: c.directories(),
            })
            .unwrap_or_default();

        Ok(Pipeline {
            name: config
                .name
                .clone()
                .unwrap_or_else(|| DEFAULT_PIPELINE_NAME.to_string()),
            language: config.language.clone(),
            matrix: config.matrix()?,
            env: config.env_vars()?,
            cache,
            steps,
            hooks,
            deploys,
            timeout_secs,
            state: RunState::new(),
        })
    }

    fn build_steps(config: &PipelineConfig, phases: &[Phase], timeout_secs: u64) -> Vec<Step> {
        phases
            .iter()
            .flat_map(|&phase| config.commands(phase).iter().map(move |c| (phase, c)))
            .enumerate()
            .map(|(i, (phase, command))| Step::new(i + 1, phase, command.clone(), timeout_secs))
            .collect()
    }

    /// Number of jobs the matrix expands to
    pub fn job_count(&self) -> usize {
        self.matrix.len().max(1)
    }

    /// Expand the matrix into jobs with their environments
    pub fn jobs(&self, context: &RunContext, cache_env: &BTreeMap<String, String>) -> Vec<Job> {
        let versions: Vec<Option<String>> = if self.matrix.is_empty() {
            vec![None]
        } else {
            self.matrix.iter().cloned().map(Some).collect()
        };

        versions
            .into_iter()
            .enumerate()
            .map(|(i, version)| {
                let number = i + 1;
                Job {
                    number,
                    language: self.language.clone(),
                    env: context.job_env(self, number, version.as_deref(), cache_env),
                    version,
                    steps: self.steps.clone(),
                    hooks: self.hooks.clone(),
                    status: ExecutionStatus::Pending,
                    failed_step: None,
                }
            })
            .collect()
    }

    /// Deploy actions whose gate is open for `branch`
    pub fn deploys_for_branch(&self, branch: &str) -> Vec<&DeployAction> {
        self.deploys
            .iter()
            .filter(|d| d.condition.matches(branch))
            .collect()
    }

    /// Raw secret references from deploy options (literal values or `$VAR`)
    pub fn secret_references(&self) -> Vec<String> {
        self.deploys
            .iter()
            .flat_map(|d| d.secret_options())
            .collect()
    }
}
