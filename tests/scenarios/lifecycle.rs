//! Test: Lifecycle order - phases run in order, installs before scripts

use crate::helpers::*;
use ci_runner::core::ExecutionStatus;

/// Install steps finish before any script step, for every version
#[tokio::test]
async fn test_install_before_script_for_every_version() {
    let result = run_sequential(PROJECT_YAML, "master", ScriptedRunner::new()).await;

    assert_run_succeeded(&result);
    assert_eq!(result.report.jobs.len(), 2);

    for job in 1..=2 {
        let commands = result.job_commands(job);
        assert_eq!(
            commands,
            vec![
                "pip install -e .",
                "pip install sphinx",
                "python setup.py test",
                "make -C docs html"
            ]
        );
        assert_all_before(
            &commands,
            &["pip install -e .", "pip install sphinx"],
            &["python setup.py test", "make -C docs html"],
        );
    }
}

/// All four main phases run in lifecycle order regardless of key order in the file
#[tokio::test]
async fn test_phase_order() {
    let yaml = r#"
script: run-tests
before_script: prepare
install: install-deps
before_install: update-tools
"#;

    let result = run_sequential(yaml, "master", ScriptedRunner::new()).await;

    assert_run_succeeded(&result);
    assert_eq!(
        result.command_lines(),
        vec!["update-tools", "install-deps", "prepare", "run-tests"]
    );
    let indices: Vec<usize> = result.report.jobs[0].steps.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![1, 2, 3, 4]);
}

/// Jobs run in matrix order and see their own version
#[tokio::test]
async fn test_jobs_follow_matrix_order() {
    let result = run_sequential(PROJECT_YAML, "master", ScriptedRunner::new()).await;

    let versions: Vec<&str> = result
        .commands
        .iter()
        .filter(|c| c.command == "python setup.py test")
        .map(|c| c.env["TRAVIS_PYTHON_VERSION"].as_str())
        .collect();
    assert_eq!(versions, vec!["3.6", "3.5"]);

    let labels: Vec<&str> = result.report.jobs.iter().map(|j| j.label.as_str()).collect();
    assert_eq!(labels, vec!["#1 python 3.6", "#2 python 3.5"]);
}

/// Every step sees the CI environment
#[tokio::test]
async fn test_steps_see_ci_environment() {
    let yaml = r#"
language: node_js
node_js: 18
env:
  global:
    - MODE=ci
script: npm test
"#;

    let result = run_sequential(yaml, "develop", ScriptedRunner::new()).await;

    let env = &result.commands[0].env;
    assert_eq!(env["CI"], "true");
    assert_eq!(env["TRAVIS"], "true");
    assert_eq!(env["TRAVIS_BRANCH"], "develop");
    assert_eq!(env["TRAVIS_JOB_NUMBER"], "1");
    assert_eq!(env["TRAVIS_NODE_VERSION"], "18");
    assert_eq!(env["MODE"], "ci");
    assert!(env.contains_key("TRAVIS_BUILD_DIR"));
}

/// Without a matrix there is exactly one unversioned job
#[tokio::test]
async fn test_single_job_without_matrix() {
    let result = run_sequential("script: make test\n", "master", ScriptedRunner::new()).await;

    assert_run_succeeded(&result);
    assert_eq!(result.report.jobs.len(), 1);
    assert!(result.report.jobs[0].version.is_none());
    assert_eq!(result.report.jobs[0].status, ExecutionStatus::Succeeded);
    assert_eq!(result.pipeline.state.succeeded_jobs, 1);
}
