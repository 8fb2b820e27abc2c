//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod report;
pub mod scheduler;

pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent};
pub use executor::{
    CommandOutput, CommandRunner, CommandSpec, OutputSink, OutputStream, RunnerError,
    ShellRunner, StepExecutor, StepOutcome,
};
pub use report::{DeployReport, JobReport, RunReport, StepReport};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
