//! Test utilities for ci-runner scenarios

use async_trait::async_trait;
use ci_runner::core::config::PipelineConfig;
use ci_runner::core::{ExecutionStatus, Pipeline, RunContext};
use ci_runner::execution::{
    CommandOutput, CommandRunner, CommandSpec, ExecutionEngine, ExecutionEvent, OutputSink,
    OutputStream, RunReport, RunnerError, SchedulingStrategy,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A command the runner was asked to execute
#[derive(Debug, Clone)]
pub struct RecordedCommand {
    pub command: String,
    pub env: BTreeMap<String, String>,
}

impl RecordedCommand {
    pub fn job(&self) -> Option<&str> {
        self.env.get("TRAVIS_JOB_NUMBER").map(String::as_str)
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Exit(i32),
    Timeout,
}

#[derive(Debug, Clone)]
struct Rule {
    command: String,
    when_env: Option<(String, String)>,
    outcome: Outcome,
}

/// Command runner scripted by command line; unmatched commands exit 0
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    delay: Option<Duration>,
    log: Arc<Mutex<Vec<RecordedCommand>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `command` exit with `code` in every job
    pub fn exit(mut self, command: &str, code: i32) -> Self {
        self.rules.push(Rule {
            command: command.to_string(),
            when_env: None,
            outcome: Outcome::Exit(code),
        });
        self
    }

    /// Make `command` exit with `code` only where `key=value` is set
    pub fn exit_when(mut self, command: &str, key: &str, value: &str, code: i32) -> Self {
        self.rules.push(Rule {
            command: command.to_string(),
            when_env: Some((key.to_string(), value.to_string())),
            outcome: Outcome::Exit(code),
        });
        self
    }

    /// Make `command` time out
    pub fn timeout(mut self, command: &str) -> Self {
        self.rules.push(Rule {
            command: command.to_string(),
            when_env: None,
            outcome: Outcome::Timeout,
        });
        self
    }

    /// Sleep before answering, to let parallel jobs overlap
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn log(&self) -> Arc<Mutex<Vec<RecordedCommand>>> {
        self.log.clone()
    }

    fn outcome_for(&self, spec: &CommandSpec) -> Outcome {
        self.rules
            .iter()
            .find(|rule| {
                rule.command == spec.command
                    && rule
                        .when_env
                        .as_ref()
                        .map_or(true, |(k, v)| spec.env.get(k) == Some(v))
            })
            .map(|rule| rule.outcome.clone())
            .unwrap_or(Outcome::Exit(0))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        sink: Option<&dyn OutputSink>,
    ) -> Result<CommandOutput, RunnerError> {
        self.log.lock().unwrap().push(RecordedCommand {
            command: spec.command.clone(),
            env: spec.env.clone(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let line = format!("$ {}", spec.command);
        if let Some(sink) = sink {
            sink.on_line(&line, OutputStream::Stdout);
        }

        match self.outcome_for(spec) {
            Outcome::Exit(code) => Ok(CommandOutput {
                exit_code: Some(code),
                tail: vec![line],
                duration: Duration::from_millis(1),
            }),
            Outcome::Timeout => Err(RunnerError::Timeout {
                secs: spec.timeout.as_secs(),
                tail: vec![line],
            }),
        }
    }
}

/// Everything a scenario run produced
pub struct ScenarioResult {
    pub report: RunReport,
    pub pipeline: Pipeline,
    pub commands: Vec<RecordedCommand>,
    pub events: Vec<ExecutionEvent>,
}

impl ScenarioResult {
    /// All commands in the order they were run
    pub fn command_lines(&self) -> Vec<&str> {
        self.commands.iter().map(|c| c.command.as_str()).collect()
    }

    /// Commands run for job `number`, in order
    pub fn job_commands(&self, number: usize) -> Vec<&str> {
        let number = number.to_string();
        self.commands
            .iter()
            .filter(|c| c.job() == Some(number.as_str()))
            .map(|c| c.command.as_str())
            .collect()
    }

    /// Commands run outside any job (deploy phase)
    pub fn deploy_commands(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter(|c| c.job().is_none())
            .map(|c| c.command.as_str())
            .collect()
    }

    pub fn ran(&self, command: &str) -> bool {
        self.commands.iter().any(|c| c.command == command)
    }

    pub fn deploy_statuses(&self) -> Vec<ExecutionStatus> {
        self.report.deploys.iter().map(|d| d.status).collect()
    }
}

pub fn load(yaml: &str) -> Pipeline {
    PipelineConfig::from_yaml(yaml)
        .expect("valid config")
        .to_pipeline()
        .expect("valid pipeline")
}

pub fn context(branch: &str) -> RunContext {
    RunContext::new(branch, std::env::temp_dir()).with_cache_root(None)
}

/// Run `yaml` on `branch` with a scripted runner
pub async fn run_scenario(
    yaml: &str,
    branch: &str,
    runner: ScriptedRunner,
    strategy: SchedulingStrategy,
) -> ScenarioResult {
    let mut pipeline = load(yaml);
    let log = runner.log();
    let engine = ExecutionEngine::new(runner, strategy);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

    let report = engine
        .execute(&mut pipeline, &context(branch))
        .await
        .expect("run completes");

    let commands = log.lock().unwrap().clone();
    let events = events.lock().unwrap().clone();
    ScenarioResult {
        report,
        pipeline,
        commands,
        events,
    }
}

pub async fn run_sequential(yaml: &str, branch: &str, runner: ScriptedRunner) -> ScenarioResult {
    run_scenario(yaml, branch, runner, SchedulingStrategy::Sequential).await
}

// Assertion helpers

pub fn assert_run_succeeded(result: &ScenarioResult) {
    assert_eq!(
        result.report.status,
        ExecutionStatus::Succeeded,
        "run failed: {:?}",
        result.report
    );
}

pub fn assert_run_failed(result: &ScenarioResult) {
    assert_eq!(result.report.status, ExecutionStatus::Failed);
}

/// Assert every element of `before` ran before any element of `after` in `commands`
pub fn assert_all_before(commands: &[&str], before: &[&str], after: &[&str]) {
    let last_before = commands
        .iter()
        .rposition(|c| before.contains(c))
        .expect("no command of the first group ran");
    let first_after = commands
        .iter()
        .position(|c| after.contains(c))
        .expect("no command of the second group ran");
    assert!(
        last_before < first_after,
        "expected {:?} before {:?} in {:?}",
        before,
        after,
        commands
    );
}

/// A two-version python project publishing docs and coverage
pub const PROJECT_YAML: &str = r#"
name: "docs-project"
language: python
python:
  - "3.6"
  - "3.5"
cache: pip
install:
  - pip install -e .
  - pip install sphinx
script:
  - python setup.py test
  - make -C docs html
deploy:
  - provider: pages
    local_dir: "."
    github_token: $GITHUB_TOKEN
    on:
      branch: master
  - provider: script
    script: coveralls
    on:
      all_branches: true
"#;
