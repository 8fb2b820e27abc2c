//! Step domain model

use crate::core::state::StepState;
use serde::{Deserialize, Serialize};

/// Lifecycle phase a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    BeforeInstall,
    Install,
    BeforeScript,
    Script,
    AfterSuccess,
    AfterFailure,
    AfterScript,
}

impl Phase {
    /// Phases whose failure aborts the job, in execution order
    pub const MAIN: [Phase; 4] = [
        Phase::BeforeInstall,
        Phase::Install,
        Phase::BeforeScript,
        Phase::Script,
    ];

    /// Phases run after the main phases; failures never change the job status
    pub const HOOKS: [Phase; 3] = [Phase::AfterSuccess, Phase::AfterFailure, Phase::AfterScript];

    /// Config key of the phase
    pub fn key(&self) -> &'static str {
        match self {
            Phase::BeforeInstall => "before_install",
            Phase::Install => "install",
            Phase::BeforeScript => "before_script",
            Phase::Script => "script",
            Phase::AfterSuccess => "after_success",
            Phase::AfterFailure => "after_failure",
            Phase::AfterScript => "after_script",
        }
    }

    /// Whether a hook of this phase runs for a job with the given outcome
    pub fn runs_after(&self, job_succeeded: bool) -> bool {
        match self {
            Phase::AfterSuccess => job_succeeded,
            Phase::AfterFailure => !job_succeeded,
            Phase::AfterScript => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// A single shell command in a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position within the job's main steps, or within its hooks
    pub index: usize,

    /// Lifecycle phase
    pub phase: Phase,

    /// Shell command line
    pub command: String,

    /// Timeout in seconds
    pub timeout_secs: u64,

    /// Runtime state
    pub state: StepState,

    /// Exit code of the process, when it exited normally
    pub exit_code: Option<i32>,

    /// Wall time of the step
    pub duration_ms: u64,

    /// Last lines of combined stdout/stderr
    pub output_tail: Vec<String>,
}

impl Step {
    pub fn new(index: usize, phase: Phase, command: impl Into<String>, timeout_secs: u64) -> Self {
        Step {
            index,
            phase,
            command: command.into(),
            timeout_secs,
            state: StepState::Pending,
            exit_code: None,
            duration_ms: 0,
            output_tail: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepDefaults {
    pub timeout_secs: u64,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: 3000, // 50 minutes
        }
    }
}
