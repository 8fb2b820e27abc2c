//! Pipeline configuration from YAML

use crate::core::condition::{BranchPattern, DeployCondition};
use crate::core::{Phase, Pipeline};
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Language used when the config does not name one
pub const DEFAULT_LANGUAGE: &str = "generic";

/// Top-level configuration loaded from a Travis-style YAML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name (defaults to the project directory name)
    #[serde(default)]
    pub name: Option<String>,

    /// Execution environment family, e.g. `python`
    #[serde(default = "default_language")]
    pub language: String,

    /// Dependency cache strategy
    #[serde(default)]
    pub cache: Option<CacheConfig>,

    /// Global environment variables
    #[serde(default)]
    pub env: Option<EnvConfig>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub before_install: Vec<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub install: Vec<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub before_script: Vec<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub script: Vec<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub after_success: Vec<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub after_failure: Vec<String>,

    #[serde(default, deserialize_with = "one_or_many")]
    pub after_script: Vec<String>,

    /// Post-success publishing actions
    #[serde(default, deserialize_with = "one_or_many")]
    pub deploy: Vec<DeployConfig>,

    /// Timeout for every step (in seconds)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Remaining keys; the one named after `language` holds the version matrix
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

/// Cache configuration: `pip`, `[pip, npm]`, `false`, or `{directories: [...]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheConfig {
    Enabled(bool),
    Named(String),
    List(Vec<String>),
    Map(CacheMap),
}

/// Mapping form of the cache block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMap {
    #[serde(default)]
    pub directories: Vec<String>,

    /// Named caches toggled on or off, e.g. `pip: true`
    #[serde(flatten)]
    pub named: BTreeMap<String, bool>,
}

/// Environment configuration: `["A=1"]`, `{global: ["A=1"]}` or `{A: 1}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvConfig {
    List(Vec<String>),
    Global { global: Vec<String> },
    Map(BTreeMap<String, Value>),
}

/// Deploy action configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Which provider publishes the artifacts
    pub provider: ProviderKind,

    /// Trigger condition (defaults to the master branch)
    #[serde(default)]
    pub on: Option<OnConfig>,

    /// Provider-specific options
    #[serde(flatten)]
    pub options: BTreeMap<String, Value>,
}

/// Known deploy providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Push a directory to a branch of a git remote
    Pages,
    /// Run an arbitrary shell command
    Script,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Pages => "pages",
            ProviderKind::Script => "script",
        }
    }
}

/// The `on:` block of a deploy action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnConfig {
    #[serde(default, deserialize_with = "one_or_many")]
    pub branch: Vec<String>,

    #[serde(default)]
    pub all_branches: bool,

    /// Keys this runner does not evaluate (e.g. `python`, `tags`)
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

fn one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
    })
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

/// Render a YAML scalar the way it was written (3.6 stays "3.6")
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse a `KEY=VALUE` entry, stripping one layer of matching quotes
pub fn parse_env_entry(entry: &str) -> Result<(String, String)> {
    let (key, value) = entry
        .split_once('=')
        .with_context(|| format!("Invalid env entry '{}': expected KEY=VALUE", entry))?;
    let key = key.trim();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        anyhow::bail!("Invalid env entry '{}': bad variable name", entry);
    }

    let value = value.trim();
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|q| {
            value
                .strip_prefix(*q)
                .and_then(|rest| rest.strip_suffix(*q))
        })
        .unwrap_or(value);

    Ok((key.to_string(), unquoted.to_string()))
}

impl CacheConfig {
    /// Named caches (`pip`, ...) that are switched on
    pub fn named(&self) -> Vec<String> {
        match self {
            CacheConfig::Enabled(_) => Vec::new(),
            CacheConfig::Named(name) => vec![name.clone()],
            CacheConfig::List(names) => names.clone(),
            CacheConfig::Map(map) => map
                .named
                .iter()
                .filter(|(_, enabled)| **enabled)
                .map(|(name, _)| name.clone())
                .collect(),
        }
    }

    /// Extra directories to keep between runs
    pub fn directories(&self) -> Vec<String> {
        match self {
            CacheConfig::Map(map) => map.directories.clone(),
            _ => Vec::new(),
        }
    }
}

impl DeployConfig {
    /// Build the trigger condition of this action
    pub fn condition(&self) -> Result<DeployCondition> {
        let Some(on) = &self.on else {
            return Ok(DeployCondition::default_branch());
        };

        if on.all_branches {
            if !on.branch.is_empty() {
                anyhow::bail!(
                    "Deploy provider '{}' sets both 'all_branches' and 'branch'",
                    self.provider.as_str()
                );
            }
            return Ok(DeployCondition::AllBranches);
        }

        if on.branch.is_empty() {
            return Ok(DeployCondition::default_branch());
        }

        let patterns = on
            .branch
            .iter()
            .map(|b| BranchPattern::parse(b))
            .collect::<Result<Vec<_>>>()?;
        Ok(DeployCondition::Branches(patterns))
    }

    /// String option lookup (numbers and bools are stringified)
    pub fn option_str(&self, key: &str) -> Option<String> {
        self.options.get(key).and_then(scalar_to_string)
    }
}

impl PipelineConfig {
    /// Commands listed under a lifecycle phase key
    pub fn commands(&self, phase: Phase) -> &[String] {
        match phase {
            Phase::BeforeInstall => &self.before_install,
            Phase::Install => &self.install,
            Phase::BeforeScript => &self.before_script,
            Phase::Script => &self.script,
            Phase::AfterSuccess => &self.after_success,
            Phase::AfterFailure => &self.after_failure,
            Phase::AfterScript => &self.after_script,
        }
    }

    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Fill in the name when the file does not set one
    pub fn with_default_name(mut self, name: &str) -> Self {
        if self.name.is_none() {
            self.name = Some(name.to_string());
        }
        self
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.script.is_empty() {
            anyhow::bail!("Pipeline has no 'script' steps");
        }

        if self.timeout_secs == Some(0) {
            anyhow::bail!("'timeout_secs' must be greater than zero");
        }

        let matrix = self.matrix()?;
        let mut seen = HashSet::new();
        for version in &matrix {
            if !seen.insert(version) {
                anyhow::bail!("Duplicate {} version in matrix: {}", self.language, version);
            }
        }

        self.env_vars()?;

        for deploy in &self.deploy {
            deploy.condition()?;
            crate::deploy::provider_for(deploy.provider, &deploy.options).with_context(|| {
                format!("Invalid options for deploy provider '{}'", deploy.provider.as_str())
            })?;
        }

        Ok(())
    }

    /// Interpreter versions listed under the key named after `language`
    pub fn matrix(&self) -> Result<Vec<String>> {
        let Some(value) = self.extra.get(&self.language) else {
            return Ok(Vec::new());
        };

        let entries: Vec<&Value> = match value {
            Value::Sequence(seq) => seq.iter().collect(),
            other => vec![other],
        };

        entries
            .into_iter()
            .map(|v| {
                scalar_to_string(v).with_context(|| {
                    format!("Matrix entry under '{}' must be a scalar version", self.language)
                })
            })
            .collect()
    }

    /// Global environment as an ordered map
    pub fn env_vars(&self) -> Result<BTreeMap<String, String>> {
        let mut vars = BTreeMap::new();

        match &self.env {
            None => {}
            Some(EnvConfig::List(entries)) | Some(EnvConfig::Global { global: entries }) => {
                for entry in entries {
                    let (key, value) = parse_env_entry(entry)?;
                    vars.insert(key, value);
                }
            }
            Some(EnvConfig::Map(map)) => {
                for (key, value) in map {
                    let value = scalar_to_string(value)
                        .with_context(|| format!("Env variable '{}' must be a scalar", key))?;
                    vars.insert(key.clone(), value);
                }
            }
        }

        Ok(vars)
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Result<Pipeline> {
        Pipeline::from_config(self)
    }
}
