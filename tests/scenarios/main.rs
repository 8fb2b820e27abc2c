//! Scenario-based tests for ci-runner, driven by a scripted command runner

mod helpers;

mod deploy_gating;
mod failure_handling;
mod hooks;
mod idempotence;
mod lifecycle;
mod parallel_matrix;
