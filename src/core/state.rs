//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status shared by runs, jobs and deploy actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Not started yet
    Pending,
    /// Currently running
    Running,
    /// Finished with every command exiting zero
    Succeeded,
    /// Finished with a failure
    Failed,
    /// Never started because its gate was closed
    Skipped,
}

impl ExecutionStatus {
    /// Check if the status can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExecutionStatus::Pending),
            "running" => Some(ExecutionStatus::Running),
            "succeeded" => Some(ExecutionStatus::Succeeded),
            "failed" => Some(ExecutionStatus::Failed),
            "skipped" => Some(ExecutionStatus::Skipped),
            _ => None,
        }
    }
}

/// State of a single step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StepState {
    /// Step has not run
    Pending,
    /// Step is currently running
    Running { started_at: DateTime<Utc> },
    /// Step exited zero
    Succeeded {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Step exited non-zero, could not be spawned, or timed out
    Failed {
        error: String,
        exit_code: Option<i32>,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Step never ran because an earlier step of its job failed
    Skipped { reason: String },
}

/// Overall run state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique run ID
    pub run_id: Uuid,

    /// Current run status
    pub status: ExecutionStatus,

    /// When the run started
    pub started_at: Option<DateTime<Utc>>,

    /// When the run finished
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of matrix jobs
    pub total_jobs: usize,

    /// Number of jobs that succeeded
    pub succeeded_jobs: usize,

    /// Number of jobs that failed
    pub failed_jobs: usize,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_jobs: 0,
            succeeded_jobs: 0,
            failed_jobs: 0,
        }
    }

    /// Mark run as started
    pub fn start(&mut self, total_jobs: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_jobs = total_jobs;
    }

    /// Record a finished job
    pub fn record_job(&mut self, status: ExecutionStatus) {
        match status {
            ExecutionStatus::Succeeded => self.succeeded_jobs += 1,
            ExecutionStatus::Failed => self.failed_jobs += 1,
            _ => {}
        }
    }

    /// Whether every job finished and none of them failed
    pub fn all_jobs_succeeded(&self) -> bool {
        self.failed_jobs == 0 && self.succeeded_jobs == self.total_jobs
    }

    pub fn succeed(&mut self) {
        self.status = ExecutionStatus::Succeeded;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
