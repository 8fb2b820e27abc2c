//! Test: Failure handling - first non-zero exit aborts the job and blocks deploys

use crate::helpers::*;
use ci_runner::core::ExecutionStatus;

/// A failing script step stops its job and no deploy runs
#[tokio::test]
async fn test_script_failure_stops_job_and_blocks_deploys() {
    let runner = ScriptedRunner::new().exit("python setup.py test", 1);

    let result = run_sequential(PROJECT_YAML, "master", runner).await;

    assert_run_failed(&result);
    assert!(!result.ran("make -C docs html"));
    assert!(result.deploy_commands().is_empty());
    assert_eq!(
        result.deploy_statuses(),
        vec![ExecutionStatus::Skipped, ExecutionStatus::Skipped]
    );
    assert!(result
        .report
        .deploys
        .iter()
        .all(|d| d.reason.as_deref() == Some("2 of 2 job(s) failed")));
}

/// The report names the failing step, its exit code and its output
#[tokio::test]
async fn test_report_names_failing_step() {
    let runner = ScriptedRunner::new().exit("python setup.py test", 2);

    let result = run_sequential(PROJECT_YAML, "master", runner).await;

    let job = &result.report.jobs[0];
    assert_eq!(job.status, ExecutionStatus::Failed);
    assert_eq!(job.failed_step, Some(3));
    let step = job.failing_step().unwrap();
    assert_eq!(step.exit_code, Some(2));
    assert_eq!(step.output_tail, vec!["$ python setup.py test"]);
    assert_eq!(
        job.failure_summary().as_deref(),
        Some("failed at step 3 (python setup.py test): exited with code 2")
    );
    assert_eq!(job.steps[3].status, ExecutionStatus::Skipped);
}

/// One version failing does not stop the other version's job
#[tokio::test]
async fn test_failure_in_one_version_only() {
    let runner = ScriptedRunner::new().exit_when(
        "python setup.py test",
        "TRAVIS_PYTHON_VERSION",
        "3.5",
        1,
    );

    let result = run_sequential(PROJECT_YAML, "master", runner).await;

    assert_run_failed(&result);
    assert_eq!(result.report.jobs[0].status, ExecutionStatus::Succeeded);
    assert_eq!(result.report.jobs[1].status, ExecutionStatus::Failed);
    assert_eq!(result.job_commands(1).len(), 4);
    assert_eq!(
        result.job_commands(2),
        vec!["pip install -e .", "pip install sphinx", "python setup.py test"]
    );
    assert!(result.deploy_commands().is_empty());
    assert_eq!(result.pipeline.state.failed_jobs, 1);
    assert_eq!(result.pipeline.state.succeeded_jobs, 1);
}

/// An install failure means no script step runs at all
#[tokio::test]
async fn test_install_failure_skips_scripts() {
    let runner = ScriptedRunner::new().exit("pip install -e .", 1);

    let result = run_sequential(PROJECT_YAML, "master", runner).await;

    assert_run_failed(&result);
    assert!(!result.ran("pip install sphinx"));
    assert!(!result.ran("python setup.py test"));
    for job in &result.report.jobs {
        assert_eq!(job.failed_step, Some(1));
        assert!(job.steps[1..]
            .iter()
            .all(|s| s.status == ExecutionStatus::Skipped));
    }
}

/// A timed-out step is a step failure
#[tokio::test]
async fn test_timeout_is_step_failure() {
    let yaml = r#"
timeout_secs: 5
script:
  - slow-tests
  - echo after
"#;
    let runner = ScriptedRunner::new().timeout("slow-tests");

    let result = run_sequential(yaml, "master", runner).await;

    assert_run_failed(&result);
    let step = result.report.jobs[0].failing_step().unwrap();
    assert_eq!(step.exit_code, None);
    assert_eq!(step.error.as_deref(), Some("timed out after 5 seconds"));
    assert!(!result.ran("echo after"));
}
