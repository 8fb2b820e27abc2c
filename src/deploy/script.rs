//! `script` provider - runs a shell command

use super::{string_option, DeployContext, DeployError, DeployProvider};
use crate::execution::executor::CommandRunner;
use async_trait::async_trait;
use serde_yaml::Value;
use std::collections::BTreeMap;
use tracing::info;

const NAME: &str = "script";

#[derive(Debug, Clone)]
pub struct ScriptProvider {
    pub script: String,
}

impl ScriptProvider {
    pub fn from_options(options: &BTreeMap<String, Value>) -> Result<Self, DeployError> {
        let script = string_option(options, NAME, "script")?
            .filter(|s| !s.trim().is_empty())
            .ok_or(DeployError::MissingOption {
                provider: NAME,
                option: "script",
            })?;
        Ok(Self { script })
    }
}

#[async_trait]
impl DeployProvider for ScriptProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn deploy(
        &self,
        runner: &dyn CommandRunner,
        context: &DeployContext<'_>,
    ) -> Result<(), DeployError> {
        info!("Running deploy script: {}", context.mask(&self.script));
        context.run(runner, &self.script).await?;
        Ok(())
    }
}
