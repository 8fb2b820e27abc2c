//! Test: Deploy gating - branch conditions and independence of deploy actions

use crate::helpers::*;
use ci_runner::core::config::ProviderKind;
use ci_runner::core::ExecutionStatus;
use ci_runner::execution::ExecutionEvent;

/// On master both the pages deploy and the coverage upload run
#[tokio::test]
async fn test_master_runs_both_deploys() {
    let result = run_sequential(PROJECT_YAML, "master", ScriptedRunner::new()).await;

    assert_run_succeeded(&result);
    assert_eq!(
        result.deploy_statuses(),
        vec![ExecutionStatus::Succeeded, ExecutionStatus::Succeeded]
    );

    let deploys = result.deploy_commands();
    assert!(deploys.iter().any(|c| c.contains("push --force")));
    assert_eq!(deploys.last(), Some(&"coveralls"));
}

/// On a feature branch only the all-branches coverage upload runs
#[tokio::test]
async fn test_feature_branch_runs_only_all_branches_deploy() {
    let result = run_sequential(PROJECT_YAML, "feature-x", ScriptedRunner::new()).await;

    assert_run_succeeded(&result);
    assert_eq!(
        result.deploy_statuses(),
        vec![ExecutionStatus::Skipped, ExecutionStatus::Succeeded]
    );
    assert_eq!(result.deploy_commands(), vec!["coveralls"]);
    assert_eq!(
        result.report.deploys[0].reason.as_deref(),
        Some("branch feature-x does not match branch master")
    );
}

/// Deploys are announced in configuration order
#[tokio::test]
async fn test_deploy_events_in_order() {
    let result = run_sequential(PROJECT_YAML, "feature-x", ScriptedRunner::new()).await;

    let deploy_events: Vec<(usize, &str)> = result
        .events
        .iter()
        .filter_map(|event| match event {
            ExecutionEvent::DeploySkipped { index, .. } => Some((*index, "skipped")),
            ExecutionEvent::DeployStarted { index, .. } => Some((*index, "started")),
            ExecutionEvent::DeployFinished { index, .. } => Some((*index, "finished")),
            _ => None,
        })
        .collect();
    assert_eq!(
        deploy_events,
        vec![(1, "skipped"), (2, "started"), (2, "finished")]
    );
}

/// A failed deploy does not prevent the next one, but fails the run
#[tokio::test]
async fn test_failed_deploy_is_independent() {
    let yaml = r#"
script: make
deploy:
  - provider: script
    script: upload-a
  - provider: script
    script: upload-b
"#;
    let runner = ScriptedRunner::new().exit("upload-a", 3);

    let result = run_sequential(yaml, "master", runner).await;

    assert_run_failed(&result);
    assert_eq!(result.deploy_commands(), vec!["upload-a", "upload-b"]);
    assert_eq!(
        result.deploy_statuses(),
        vec![ExecutionStatus::Failed, ExecutionStatus::Succeeded]
    );
    assert_eq!(
        result.report.deploys[0].error.as_deref(),
        Some("'upload-a' exited with code 3")
    );
    assert_eq!(result.report.jobs[0].status, ExecutionStatus::Succeeded);
}

/// Branch lists and /regex/ entries
#[tokio::test]
async fn test_branch_list_and_regex() {
    let yaml = r#"
script: make
deploy:
  provider: script
  script: publish
  on:
    branch:
      - production
      - /^release-.*$/
"#;

    for (branch, expected) in [
        ("production", ExecutionStatus::Succeeded),
        ("release-1.2", ExecutionStatus::Succeeded),
        ("master", ExecutionStatus::Skipped),
        ("my-release-1", ExecutionStatus::Skipped),
    ] {
        let result = run_sequential(yaml, branch, ScriptedRunner::new()).await;
        assert_eq!(result.deploy_statuses(), vec![expected], "branch {}", branch);
        assert_eq!(result.report.deploys[0].provider, ProviderKind::Script);
    }
}

/// An all-branches deploy runs on every branch once jobs succeed
#[tokio::test]
async fn test_all_branches_runs_everywhere() {
    let yaml = r#"
script: make
deploy:
  provider: script
  script: coveralls
  on:
    all_branches: true
"#;

    for branch in ["master", "develop", "feature/login"] {
        let result = run_sequential(yaml, branch, ScriptedRunner::new()).await;
        assert_run_succeeded(&result);
        assert_eq!(result.deploy_commands(), vec!["coveralls"], "branch {}", branch);
    }
}

/// Deploy commands see the run environment but no job number
#[tokio::test]
async fn test_deploy_environment() {
    let result = run_sequential(PROJECT_YAML, "feature-x", ScriptedRunner::new()).await;

    let upload = result
        .commands
        .iter()
        .find(|c| c.command == "coveralls")
        .unwrap();
    assert_eq!(upload.env["TRAVIS_BRANCH"], "feature-x");
    assert!(!upload.env.contains_key("TRAVIS_JOB_NUMBER"));
    assert!(!upload.env.contains_key("TRAVIS_PYTHON_VERSION"));
}
