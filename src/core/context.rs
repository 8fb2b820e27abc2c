//! Run context - branch, build directory and the environment jobs see

use crate::core::Pipeline;
use crate::execution::executor::{CommandRunner, CommandSpec};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Placeholder written instead of secret values
pub const MASK: &str = "[secure]";

const GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared, read-only context of a single run
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Branch the run was triggered for
    pub branch: String,

    /// Commit being built, when known
    pub commit: Option<String>,

    /// Project directory; steps run here
    pub build_dir: PathBuf,

    /// `--env` overrides, applied last
    pub overrides: BTreeMap<String, String>,

    /// Root for named caches (None disables them)
    pub cache_root: Option<PathBuf>,
}

impl RunContext {
    pub fn new(branch: impl Into<String>, build_dir: PathBuf) -> Self {
        Self {
            branch: branch.into(),
            commit: None,
            build_dir,
            overrides: BTreeMap::new(),
            cache_root: dirs::cache_dir().map(|d| d.join("ci-runner")),
        }
    }

    pub fn with_commit(mut self, commit: Option<String>) -> Self {
        self.commit = commit;
        self
    }

    pub fn with_overrides(mut self, overrides: BTreeMap<String, String>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_cache_root(mut self, cache_root: Option<PathBuf>) -> Self {
        self.cache_root = cache_root;
        self
    }

    /// Build a context, resolving the branch from the flag, `TRAVIS_BRANCH`, or git
    pub async fn detect<R>(runner: &R, build_dir: PathBuf, branch: Option<String>) -> Result<Self>
    where
        R: CommandRunner + ?Sized,
    {
        let env_branch = std::env::var("TRAVIS_BRANCH").ok();
        Self::detect_with(runner, build_dir, branch, env_branch).await
    }

    async fn detect_with<R>(
        runner: &R,
        build_dir: PathBuf,
        branch: Option<String>,
        env_branch: Option<String>,
    ) -> Result<Self>
    where
        R: CommandRunner + ?Sized,
    {
        let branch = match branch
            .filter(|b| !b.is_empty())
            .or_else(|| env_branch.filter(|b| !b.is_empty()))
        {
            Some(branch) => branch,
            None => {
                let branch = git_output(runner, &build_dir, "git rev-parse --abbrev-ref HEAD")
                    .await
                    .context("Could not determine the branch; pass --branch")?;
                if branch == "HEAD" {
                    anyhow::bail!("Detached HEAD; pass --branch to name the branch");
                }
                branch
            }
        };

        let commit = git_output(runner, &build_dir, "git rev-parse HEAD").await.ok();
        debug!("Resolved branch {} (commit {:?})", branch, commit);

        Ok(Self::new(branch, build_dir).with_commit(commit))
    }

    /// Create cache directories and return the variables that point tools at them
    pub fn prepare_cache(&self, pipeline: &Pipeline) -> Result<BTreeMap<String, String>> {
        let mut env = BTreeMap::new();

        for name in &pipeline.cache.named {
            match name.as_str() {
                "pip" => {
                    let Some(root) = &self.cache_root else {
                        warn!("No cache directory available; pip cache disabled");
                        continue;
                    };
                    let dir = root.join(slug(&pipeline.name)).join("pip");
                    std::fs::create_dir_all(&dir)
                        .with_context(|| format!("Failed to create {}", dir.display()))?;
                    env.insert("PIP_CACHE_DIR".to_string(), dir.display().to_string());
                }
                other => warn!("Unsupported cache '{}' ignored", other),
            }
        }

        for dir in &pipeline.cache.directories {
            let path = self.build_dir.join(dir);
            std::fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create cache directory {}", path.display()))?;
        }

        Ok(env)
    }

    /// Variables every command of the run sees, before job specifics
    pub fn base_env(&self, pipeline: &Pipeline) -> BTreeMap<String, String> {
        let mut env = pipeline.env.clone();
        env.insert("CI".to_string(), "true".to_string());
        env.insert("CONTINUOUS_INTEGRATION".to_string(), "true".to_string());
        env.insert("TRAVIS".to_string(), "true".to_string());
        env.insert("TRAVIS_BRANCH".to_string(), self.branch.clone());
        env.insert(
            "TRAVIS_BUILD_DIR".to_string(),
            self.build_dir.display().to_string(),
        );
        if let Some(commit) = &self.commit {
            env.insert("TRAVIS_COMMIT".to_string(), commit.clone());
        }
        env
    }

    /// Environment for one job of the matrix
    pub fn job_env(
        &self,
        pipeline: &Pipeline,
        number: usize,
        version: Option<&str>,
        cache_env: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut env = self.base_env(pipeline);
        env.extend(cache_env.clone());
        env.insert("TRAVIS_JOB_NUMBER".to_string(), number.to_string());
        if let Some(version) = version {
            env.insert(version_env_var(&pipeline.language), version.to_string());
        }
        env.extend(self.overrides.clone());
        env
    }

    /// Environment for deploy actions
    pub fn deploy_env(&self, pipeline: &Pipeline) -> BTreeMap<String, String> {
        let mut env = self.base_env(pipeline);
        env.extend(self.overrides.clone());
        env
    }
}

/// Variable that carries the interpreter version for a language
pub fn version_env_var(language: &str) -> String {
    match language {
        "python" => "TRAVIS_PYTHON_VERSION".to_string(),
        "node_js" => "TRAVIS_NODE_VERSION".to_string(),
        "rust" => "TRAVIS_RUST_VERSION".to_string(),
        other => format!(
            "TRAVIS_{}_VERSION",
            other
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                .collect::<String>()
        ),
    }
}

/// Resolve secret references: `$NAME` / `${NAME}` look up the environment, anything else is literal
pub fn resolve_secrets(references: &[String], env: &BTreeMap<String, String>) -> Vec<String> {
    references
        .iter()
        .filter_map(|reference| match reference.strip_prefix('$') {
            Some(name) => {
                let name = name.trim_start_matches('{').trim_end_matches('}');
                env.get(name)
                    .cloned()
                    .or_else(|| std::env::var(name).ok())
            }
            None => Some(reference.clone()),
        })
        .filter(|secret| !secret.is_empty())
        .collect()
}

/// Replace every occurrence of a secret with [`MASK`]
pub fn mask_secrets(text: &str, secrets: &[String]) -> String {
    secrets
        .iter()
        .filter(|s| !s.is_empty())
        .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), MASK))
}

fn slug(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

async fn git_output<R>(runner: &R, dir: &Path, command: &str) -> Result<String>
where
    R: CommandRunner + ?Sized,
{
    let spec = CommandSpec::new(command, dir.to_path_buf()).with_timeout(GIT_TIMEOUT);
    let output = runner.run(&spec, None).await?;
    if !output.success() {
        anyhow::bail!("'{}' exited with {:?}", command, output.exit_code);
    }
    output
        .tail
        .last()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .with_context(|| format!("'{}' printed nothing", command))
}
