//! CLI command definitions

use crate::execution::SchedulingStrategy;
use clap::Args;
use std::path::PathBuf;

/// Default configuration file
pub const DEFAULT_CONFIG_FILE: &str = ".travis.yml";

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to the pipeline YAML file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub file: PathBuf,

    /// Branch to run for (default: $TRAVIS_BRANCH, then the checked-out branch)
    #[arg(long)]
    pub branch: Option<String>,

    /// Environment overrides (KEY=VALUE), applied last
    #[arg(long, value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Scheduling strategy for matrix jobs
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Sequential)]
    pub strategy: SchedulingStrategyArg,

    /// Job limit for the parallel-limited strategy
    #[arg(long, default_value_t = 4)]
    pub max_parallel: usize,

    /// Project directory (default: the directory containing the file)
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunCommand {
    pub fn scheduling_strategy(&self) -> SchedulingStrategy {
        match self.strategy {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => {
                SchedulingStrategy::LimitedParallel(self.max_parallel)
            }
        }
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to the pipeline YAML file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub file: PathBuf,

    /// Branch to evaluate deploy conditions for
    #[arg(long)]
    pub branch: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List pipelines present in history
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show a specific run
    #[arg(long)]
    pub run_id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[value(name = "parallel-limited")]
    ParallelLimited,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Invalid KEY=VALUE pair: {}", s)),
    }
}
