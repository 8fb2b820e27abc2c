//! Execution scheduler - decides how many matrix jobs run at once

/// Strategy for scheduling job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// Execute jobs in matrix order, one at a time
    #[default]
    Sequential,

    /// Execute all jobs at once
    Parallel,

    /// Limited parallelism (max N concurrent jobs)
    LimitedParallel(usize),
}

/// Scheduler for determining job concurrency
#[derive(Debug, Clone, Default)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Number of jobs allowed to run concurrently out of `total`
    pub fn concurrency(&self, total: usize) -> usize {
        let total = total.max(1);
        match self.strategy {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => total,
            SchedulingStrategy::LimitedParallel(max) => max.clamp(1, total),
        }
    }

    /// Whether jobs run one after another in matrix order
    pub fn is_sequential(&self, total: usize) -> bool {
        self.concurrency(total) == 1
    }
}
