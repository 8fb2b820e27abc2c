//! Job domain model - one matrix entry's run of the lifecycle

use crate::core::{state::ExecutionStatus, step::Step};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One execution of the full lifecycle under a specific interpreter version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// 1-based position in the matrix
    pub number: usize,

    /// Environment family, e.g. `python`
    pub language: String,

    /// Interpreter version (None when the config has no matrix)
    pub version: Option<String>,

    /// Environment every step of this job sees
    #[serde(skip)]
    pub env: BTreeMap<String, String>,

    /// Main lifecycle steps in execution order
    pub steps: Vec<Step>,

    /// after_success / after_failure / after_script hooks
    pub hooks: Vec<Step>,

    pub status: ExecutionStatus,

    /// Index of the step that failed the job
    pub failed_step: Option<usize>,
}

impl Job {
    /// Short display label, e.g. `#1 python 3.6`
    pub fn label(&self) -> String {
        match &self.version {
            Some(version) => format!("#{} {} {}", self.number, self.language, version),
            None => format!("#{}", self.number),
        }
    }

    /// The step that failed this job, if any
    pub fn failing_step(&self) -> Option<&Step> {
        self.failed_step
            .and_then(|index| self.steps.iter().find(|s| s.index == index))
    }
}
