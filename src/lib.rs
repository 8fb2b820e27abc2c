//! ci-runner - run a Travis-style CI configuration locally
//!
//! A configuration lists interpreter versions, lifecycle commands and deploy
//! actions. Every version becomes a job that runs the commands in order and
//! stops at the first failure; deploy actions run only once every job has
//! succeeded and only on the branches they are gated to.

pub mod cli;
pub mod core;
pub mod deploy;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use core::config::PipelineConfig;
pub use core::{ExecutionStatus, Job, Pipeline, RunContext, Step, StepState};
pub use deploy::{DeployError, DeployProvider};
pub use execution::{
    CommandRunner, ExecutionEngine, ExecutionEvent, RunReport, SchedulingStrategy, ShellRunner,
};
