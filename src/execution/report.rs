//! Run reports - the serializable outcome of a run

use crate::core::{
    config::ProviderKind, mask_secrets, ExecutionStatus, Job, Phase, Step, StepState,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub index: usize,
    pub phase: Phase,
    pub command: String,
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub output_tail: Vec<String>,
}

impl StepReport {
    pub fn from_step(step: &Step, secrets: &[String]) -> Self {
        let (status, error) = match &step.state {
            StepState::Pending => (ExecutionStatus::Pending, None),
            StepState::Running { .. } => (ExecutionStatus::Running, None),
            StepState::Succeeded { .. } => (ExecutionStatus::Succeeded, None),
            StepState::Failed { error, .. } => (ExecutionStatus::Failed, Some(error.clone())),
            StepState::Skipped { reason } => (ExecutionStatus::Skipped, Some(reason.clone())),
        };
        Self {
            index: step.index,
            phase: step.phase,
            command: mask_secrets(&step.command, secrets),
            status,
            exit_code: step.exit_code,
            duration_ms: step.duration_ms,
            error: error.map(|e| mask_secrets(&e, secrets)),
            output_tail: step
                .output_tail
                .iter()
                .map(|line| mask_secrets(line, secrets))
                .collect(),
        }
    }
}

/// Result of one matrix job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub number: usize,
    pub label: String,
    pub version: Option<String>,
    pub status: ExecutionStatus,
    /// 1-based index of the step that failed the job
    pub failed_step: Option<usize>,
    pub steps: Vec<StepReport>,
    pub hooks: Vec<StepReport>,
}

impl JobReport {
    pub fn from_job(job: &Job, secrets: &[String]) -> Self {
        Self {
            number: job.number,
            label: job.label(),
            version: job.version.clone(),
            status: job.status,
            failed_step: job.failed_step,
            steps: job.steps.iter().map(|s| StepReport::from_step(s, secrets)).collect(),
            hooks: job.hooks.iter().map(|s| StepReport::from_step(s, secrets)).collect(),
        }
    }

    pub fn failing_step(&self) -> Option<&StepReport> {
        self.failed_step
            .and_then(|index| self.steps.iter().find(|s| s.index == index))
    }

    /// e.g. `failed at step 3 (python setup.py test): exited with code 1`
    pub fn failure_summary(&self) -> Option<String> {
        let step = self.failing_step()?;
        Some(format!(
            "failed at step {} ({}): {}",
            step.index,
            step.command,
            step.error.as_deref().unwrap_or("failed")
        ))
    }
}

/// Result of one deploy action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployReport {
    pub index: usize,
    pub provider: ProviderKind,
    /// Human-readable gate, e.g. `branch master`
    pub condition: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub output_tail: Vec<String>,
    pub duration_ms: u64,
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub branch: String,
    pub commit: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub jobs: Vec<JobReport>,
    pub deploys: Vec<DeployReport>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }

    pub fn failed_jobs(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs
            .iter()
            .filter(|j| j.status == ExecutionStatus::Failed)
    }

    /// Deploy actions that actually ran
    pub fn executed_deploys(&self) -> impl Iterator<Item = &DeployReport> {
        self.deploys.iter().filter(|d| {
            matches!(
                d.status,
                ExecutionStatus::Succeeded | ExecutionStatus::Failed
            )
        })
    }

    pub fn duration_ms(&self) -> u64 {
        (self.completed_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}
