//! Test: Parallel matrix - jobs overlap, steps within a job stay ordered

use crate::helpers::*;
use ci_runner::core::ExecutionStatus;
use ci_runner::execution::{ExecutionEvent, SchedulingStrategy};
use std::time::Duration;

const MATRIX_YAML: &str = r#"
language: python
python: ["3.8", "3.9", "3.10", "3.11"]
install: pip install -e .
script:
  - pytest
deploy:
  provider: script
  script: publish
"#;

#[tokio::test]
async fn test_parallel_jobs_keep_step_order() {
    let runner = ScriptedRunner::new().with_delay(Duration::from_millis(20));

    let result = run_scenario(MATRIX_YAML, "master", runner, SchedulingStrategy::Parallel).await;

    assert_run_succeeded(&result);
    assert_eq!(result.report.jobs.len(), 4);
    for job in 1..=4 {
        assert_eq!(result.job_commands(job), vec!["pip install -e .", "pytest"]);
    }
    let numbers: Vec<usize> = result.report.jobs.iter().map(|j| j.number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);

    // Deploys only start once every job has finished
    assert_eq!(result.command_lines().last(), Some(&"publish"));
}

#[tokio::test]
async fn test_parallel_jobs_overlap() {
    let runner = ScriptedRunner::new().with_delay(Duration::from_millis(50));

    let result = run_scenario(MATRIX_YAML, "master", runner, SchedulingStrategy::Parallel).await;

    // Every job starts before the first one finishes
    let first_finish = result
        .events
        .iter()
        .position(|e| matches!(e, ExecutionEvent::JobFinished { .. }))
        .unwrap();
    let starts_before = result.events[..first_finish]
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::JobStarted { .. }))
        .count();
    assert_eq!(starts_before, 4);
}

#[tokio::test]
async fn test_limited_parallelism() {
    let runner = ScriptedRunner::new().with_delay(Duration::from_millis(30));

    let result = run_scenario(
        MATRIX_YAML,
        "master",
        runner,
        SchedulingStrategy::LimitedParallel(2),
    )
    .await;

    assert_run_succeeded(&result);
    let mut running = 0usize;
    let mut peak = 0usize;
    for event in &result.events {
        match event {
            ExecutionEvent::JobStarted { .. } => {
                running += 1;
                peak = peak.max(running);
            }
            ExecutionEvent::JobFinished { .. } => running -= 1,
            _ => {}
        }
    }
    assert_eq!(peak, 2);
}

#[tokio::test]
async fn test_parallel_failure_still_blocks_deploys() {
    let runner = ScriptedRunner::new()
        .with_delay(Duration::from_millis(5))
        .exit_when("pytest", "TRAVIS_PYTHON_VERSION", "3.10", 1);

    let result = run_scenario(MATRIX_YAML, "master", runner, SchedulingStrategy::Parallel).await;

    assert_run_failed(&result);
    assert_eq!(result.report.jobs[2].status, ExecutionStatus::Failed);
    assert_eq!(result.report.jobs[2].version.as_deref(), Some("3.10"));
    assert!(!result.ran("publish"));
}
