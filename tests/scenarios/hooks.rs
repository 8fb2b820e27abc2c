//! Test: Hooks - after_success / after_failure / after_script

use crate::helpers::*;
use ci_runner::core::{ExecutionStatus, Phase};

const YAML: &str = r#"
script: run-tests
after_success: report-success
after_failure: report-failure
after_script: cleanup
deploy:
  provider: script
  script: publish
"#;

#[tokio::test]
async fn test_success_hooks() {
    let result = run_sequential(YAML, "master", ScriptedRunner::new()).await;

    assert_run_succeeded(&result);
    assert_eq!(
        result.job_commands(1),
        vec!["run-tests", "report-success", "cleanup"]
    );
    let hooks = &result.report.jobs[0].hooks;
    assert_eq!(hooks[0].phase, Phase::AfterSuccess);
    assert_eq!(hooks[1].status, ExecutionStatus::Skipped);
}

#[tokio::test]
async fn test_failure_hooks() {
    let runner = ScriptedRunner::new().exit("run-tests", 1);

    let result = run_sequential(YAML, "master", runner).await;

    assert_run_failed(&result);
    assert_eq!(
        result.job_commands(1),
        vec!["run-tests", "report-failure", "cleanup"]
    );
    assert!(!result.ran("publish"));
}

/// Hook failures are reported but never change the job status
#[tokio::test]
async fn test_hook_failure_does_not_fail_job() {
    let runner = ScriptedRunner::new()
        .exit("report-success", 1)
        .exit("cleanup", 1);

    let result = run_sequential(YAML, "master", runner).await;

    assert_run_succeeded(&result);
    let job = &result.report.jobs[0];
    assert_eq!(job.status, ExecutionStatus::Succeeded);
    assert!(job.failed_step.is_none());
    assert_eq!(job.hooks[0].status, ExecutionStatus::Failed);
    assert_eq!(job.hooks[2].status, ExecutionStatus::Failed);
    assert!(result.ran("publish"));
}
