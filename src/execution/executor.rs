//! Step executor - runs shell commands for steps

use crate::core::{mask_secrets, Step};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Lines of output kept per command for failure reports
pub const OUTPUT_TAIL_LINES: usize = 50;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3000);

/// Errors raised while running a command
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {secs} seconds")]
    Timeout { secs: u64, tail: Vec<String> },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which stream a line of output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Receives command output line by line while it runs
pub trait OutputSink: Send + Sync {
    fn on_line(&self, line: &str, stream: OutputStream);
}

/// A command to run through the shell
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub command: String,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    /// Values replaced with `[secure]` wherever the command is logged
    pub secrets: Vec<String>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>, working_dir: PathBuf) -> Self {
        Self {
            command: command.into(),
            working_dir,
            env: BTreeMap::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            secrets: Vec::new(),
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_secrets(mut self, secrets: &[String]) -> Self {
        self.secrets = secrets.to_vec();
        self
    }

    /// The command as it may appear in logs and errors
    pub fn display_command(&self) -> String {
        mask_secrets(&self.command, &self.secrets)
    }
}

/// Result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (None when killed by a signal)
    pub exit_code: Option<i32>,

    /// Last lines of combined output
    pub tail: Vec<String>,

    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Trait for command execution - allows scripted runners in tests
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        spec: &CommandSpec,
        sink: Option<&dyn OutputSink>,
    ) -> Result<CommandOutput, RunnerError>;
}

/// Bounded buffer of the most recent output lines
#[derive(Debug)]
pub struct OutputTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn into_vec(self) -> Vec<String> {
        self.lines.into_iter().collect()
    }
}

/// Runs commands with `sh -c`
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self { shell: shell.into() }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

type LineReader<T> = tokio::io::Split<BufReader<T>>;

async fn next_line<T: AsyncRead + Unpin>(reader: &mut LineReader<T>) -> std::io::Result<Option<String>> {
    Ok(reader.next_segment().await?.map(|bytes| {
        String::from_utf8_lossy(&bytes)
            .trim_end_matches('\r')
            .to_string()
    }))
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        sink: Option<&dyn OutputSink>,
    ) -> Result<CommandOutput, RunnerError> {
        let display_cmd = spec.display_command();
        debug!("Running `{}` in {}", display_cmd, spec.working_dir.display());
        let started = Instant::now();

        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&spec.command)
            .current_dir(&spec.working_dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout reaches everything the shell forked
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            command: display_cmd.clone(),
            source,
        })?;
        let pid = child.id();

        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "stdout was not piped")
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "stderr was not piped")
        })?;

        let mut out_lines = BufReader::new(stdout).split(b'\n');
        let mut err_lines = BufReader::new(stderr).split(b'\n');
        let mut tail = OutputTail::new(OUTPUT_TAIL_LINES);

        let collect = async {
            let (mut out_done, mut err_done) = (false, false);
            while !(out_done && err_done) {
                let (line, stream) = tokio::select! {
                    line = next_line(&mut out_lines), if !out_done => (line?, OutputStream::Stdout),
                    line = next_line(&mut err_lines), if !err_done => (line?, OutputStream::Stderr),
                };
                match line {
                    Some(line) => {
                        if let Some(sink) = sink {
                            sink.on_line(&line, stream);
                        }
                        tail.push(line);
                    }
                    None if stream == OutputStream::Stdout => out_done = true,
                    None => err_done = true,
                }
            }
            child.wait().await
        };

        let finished = timeout(spec.timeout, collect).await;
        let status = match finished {
            Ok(status) => status?,
            Err(_) => {
                error!("`{}` timed out after {}s", display_cmd, spec.timeout.as_secs());
                kill_process_group(pid);
                if let Err(e) = child.kill().await {
                    debug!("Failed to kill timed out command: {}", e);
                }
                return Err(RunnerError::Timeout {
                    secs: spec.timeout.as_secs(),
                    tail: tail.into_vec(),
                });
            }
        };

        Ok(CommandOutput {
            exit_code: status.code(),
            tail: tail.into_vec(),
            duration: started.elapsed(),
        })
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // SAFETY: killpg takes no pointers; the group was created for this child
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        debug!(
            "Failed to kill process group {}: {}",
            pgid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Result of executing a step
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// Command exited zero
    Succeeded {
        duration: Duration,
        tail: Vec<String>,
    },
    /// Command exited non-zero, could not be spawned, or timed out
    Failed {
        error: String,
        exit_code: Option<i32>,
        duration: Duration,
        tail: Vec<String>,
    },
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded { .. })
    }
}

/// Executes a single step
pub struct StepExecutor<R> {
    runner: R,
}

impl<R: CommandRunner> StepExecutor<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Execute a step and return the outcome
    pub async fn execute(
        &self,
        step: &Step,
        env: &BTreeMap<String, String>,
        working_dir: &Path,
        secrets: &[String],
        sink: Option<&dyn OutputSink>,
    ) -> StepOutcome {
        let spec = CommandSpec::new(step.command.clone(), working_dir.to_path_buf())
            .with_env(env.clone())
            .with_timeout(Duration::from_secs(step.timeout_secs))
            .with_secrets(secrets);
        info!(
            "Executing {} step {}: {}",
            step.phase,
            step.index,
            spec.display_command()
        );

        let started = Instant::now();
        match self.runner.run(&spec, sink).await {
            Ok(output) if output.success() => StepOutcome::Succeeded {
                duration: output.duration,
                tail: output.tail,
            },
            Ok(output) => {
                let error = match output.exit_code {
                    Some(code) => format!("exited with code {}", code),
                    None => "terminated by signal".to_string(),
                };
                error!("Step {} ({}) {}", step.index, step.phase, error);
                StepOutcome::Failed {
                    error,
                    exit_code: output.exit_code,
                    duration: output.duration,
                    tail: output.tail,
                }
            }
            Err(e) => {
                error!(
                    "Step {} ({}) failed: {}",
                    step.index,
                    step.phase,
                    mask_secrets(&e.to_string(), secrets)
                );
                let tail = match &e {
                    RunnerError::Timeout { tail, .. } => tail.clone(),
                    _ => Vec::new(),
                };
                StepOutcome::Failed {
                    error: e.to_string(),
                    exit_code: None,
                    duration: started.elapsed(),
                    tail,
                }
            }
        }
    }
}
