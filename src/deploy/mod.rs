//! Deploy providers - publishing actions that run after every job succeeded

pub mod pages;
pub mod script;

pub use pages::PagesProvider;
pub use script::ScriptProvider;

use crate::core::{config::ProviderKind, mask_secrets};
use crate::execution::executor::{CommandOutput, CommandRunner, CommandSpec, OutputSink, RunnerError};
use async_trait::async_trait;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors raised by deploy providers
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("{provider} provider requires the '{option}' option")]
    MissingOption {
        provider: &'static str,
        option: &'static str,
    },

    #[error("invalid '{option}' option for {provider} provider: {reason}")]
    InvalidOption {
        provider: &'static str,
        option: &'static str,
        reason: String,
    },

    #[error("directory to deploy does not exist: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("'{command}' exited with {}", exit_description(.exit_code))]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        tail: Vec<String>,
    },

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// Output captured from the failing command, if any
    pub fn output_tail(&self) -> &[String] {
        match self {
            DeployError::CommandFailed { tail, .. } => tail,
            DeployError::Runner(RunnerError::Timeout { tail, .. }) => tail,
            _ => &[],
        }
    }
}

fn exit_description(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

/// Everything a provider needs to run its commands
pub struct DeployContext<'a> {
    /// Project directory; commands run here
    pub build_dir: &'a Path,

    /// Environment for deploy commands
    pub env: &'a BTreeMap<String, String>,

    /// Per-command timeout
    pub timeout: Duration,

    /// Receives command output while it runs
    pub sink: Option<&'a dyn OutputSink>,

    /// Values masked wherever a command is logged
    pub secrets: &'a [String],
}

impl DeployContext<'_> {
    /// Run one command in the build directory, failing on a non-zero exit
    pub async fn run(
        &self,
        runner: &dyn CommandRunner,
        command: &str,
    ) -> Result<CommandOutput, DeployError> {
        let spec = CommandSpec::new(command, self.build_dir.to_path_buf())
            .with_env(self.env.clone())
            .with_timeout(self.timeout)
            .with_secrets(self.secrets);
        debug!("Deploy command: {}", spec.display_command());

        let output = runner.run(&spec, self.sink).await?;
        if !output.success() {
            return Err(DeployError::CommandFailed {
                command: spec.display_command(),
                exit_code: output.exit_code,
                tail: output.tail,
            });
        }
        Ok(output)
    }

    pub fn mask(&self, text: &str) -> String {
        mask_secrets(text, self.secrets)
    }
}

/// A deploy provider
#[async_trait]
pub trait DeployProvider: Send + Sync {
    /// Provider name as written in the configuration
    fn name(&self) -> &'static str;

    /// Publish the build
    async fn deploy(
        &self,
        runner: &dyn CommandRunner,
        context: &DeployContext<'_>,
    ) -> Result<(), DeployError>;
}

/// Build the provider for a deploy action, checking its options
pub fn provider_for(
    kind: ProviderKind,
    options: &BTreeMap<String, Value>,
) -> Result<Box<dyn DeployProvider>, DeployError> {
    Ok(match kind {
        ProviderKind::Pages => Box::new(PagesProvider::from_options(options)?),
        ProviderKind::Script => Box::new(ScriptProvider::from_options(options)?),
    })
}

/// Read an optional string option
pub(crate) fn string_option(
    options: &BTreeMap<String, Value>,
    provider: &'static str,
    option: &'static str,
) -> Result<Option<String>, DeployError> {
    match options.get(option) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(_) => Err(DeployError::InvalidOption {
            provider,
            option,
            reason: "expected a string".to_string(),
        }),
    }
}

/// Quote a word for `sh`
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
