//! Secret masking - deploy tokens never reach the log output

use async_trait::async_trait;
use ci_runner::core::config::PipelineConfig;
use ci_runner::core::{ExecutionStatus, RunContext};
use ci_runner::execution::{
    CommandOutput, CommandRunner, CommandSpec, ExecutionEngine, OutputSink, RunnerError,
    SchedulingStrategy,
};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

/// Shared buffer the test subscriber writes into
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Succeeds every command except the push
struct FailingPushRunner;

#[async_trait]
impl CommandRunner for FailingPushRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        _sink: Option<&dyn OutputSink>,
    ) -> Result<CommandOutput, RunnerError> {
        let code = if spec.command.contains(" push ") { 1 } else { 0 };
        Ok(CommandOutput {
            exit_code: Some(code),
            tail: Vec::new(),
            duration: Duration::from_millis(1),
        })
    }
}

#[tokio::test]
async fn test_literal_token_is_masked_in_logs() {
    let yaml = r#"
script: curl -u bot:hunter2tok https://coverage.invalid/ping
deploy:
  provider: pages
  repo: acme/docs
  github_token: hunter2tok
"#;
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(logs.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let mut pipeline = PipelineConfig::from_yaml(yaml)
        .unwrap()
        .to_pipeline()
        .unwrap();
    let engine = ExecutionEngine::new(FailingPushRunner, SchedulingStrategy::Sequential);
    let context = RunContext::new("master", std::env::temp_dir()).with_cache_root(None);
    let report = engine.execute(&mut pipeline, &context).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(report.deploys[0].status, ExecutionStatus::Failed);

    let output = logs.contents();
    assert!(output.contains("Deploy command: git"));
    assert!(output.contains("x-access-token:[secure]@github.com/acme/docs.git"));
    assert!(output.contains("curl -u bot:[secure]"));
    assert!(!output.contains("hunter2tok"));
}
