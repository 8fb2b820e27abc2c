//! Test: Idempotence - same configuration, same state, same outcome

use crate::helpers::*;

#[tokio::test]
async fn test_rerun_gives_same_outcome() {
    for branch in ["master", "feature-x"] {
        let first = run_sequential(PROJECT_YAML, branch, ScriptedRunner::new()).await;
        let second = run_sequential(PROJECT_YAML, branch, ScriptedRunner::new()).await;

        assert_eq!(first.report.status, second.report.status);
        assert_eq!(first.command_lines().len(), second.command_lines().len());
        assert_eq!(first.deploy_statuses(), second.deploy_statuses());
        assert_ne!(first.report.run_id, second.report.run_id);
    }
}

#[tokio::test]
async fn test_rerun_of_failing_config_fails_again() {
    let make_runner = || ScriptedRunner::new().exit("make -C docs html", 2);

    let first = run_sequential(PROJECT_YAML, "master", make_runner()).await;
    let second = run_sequential(PROJECT_YAML, "master", make_runner()).await;

    assert_run_failed(&first);
    assert_run_failed(&second);
    assert_eq!(first.command_lines(), second.command_lines());
    let failed_steps = |r: &ScenarioResult| -> Vec<Option<usize>> {
        r.report.jobs.iter().map(|j| j.failed_step).collect()
    };
    assert_eq!(failed_steps(&first), failed_steps(&second));
}
