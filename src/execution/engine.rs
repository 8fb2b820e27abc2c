//! Main execution engine - runs the job matrix, then the deploy phase

use crate::{
    core::{
        config::ProviderKind, mask_secrets, resolve_secrets, DeployAction, ExecutionStatus, Job,
        Phase, Pipeline, RunContext, Step, StepState,
    },
    deploy::{provider_for, DeployContext},
    execution::{
        executor::{CommandRunner, OutputSink, OutputStream, StepExecutor, StepOutcome},
        report::{DeployReport, JobReport, RunReport},
        scheduler::{ExecutionScheduler, SchedulingStrategy},
    },
};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during a run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        pipeline_name: String,
        branch: String,
        total_jobs: usize,
    },
    JobStarted {
        job: usize,
        label: String,
    },
    StepStarted {
        job: usize,
        step: usize,
        phase: Phase,
        command: String,
    },
    StepOutput {
        job: usize,
        step: usize,
        line: String,
    },
    StepFinished {
        job: usize,
        step: usize,
        phase: Phase,
        status: ExecutionStatus,
        exit_code: Option<i32>,
        duration_ms: u64,
    },
    JobFinished {
        job: usize,
        label: String,
        status: ExecutionStatus,
        failed_step: Option<usize>,
    },
    DeployStarted {
        index: usize,
        provider: ProviderKind,
    },
    DeployOutput {
        index: usize,
        line: String,
    },
    DeploySkipped {
        index: usize,
        provider: ProviderKind,
        reason: String,
    },
    DeployFinished {
        index: usize,
        provider: ProviderKind,
        status: ExecutionStatus,
        error: Option<String>,
    },
    RunFinished {
        run_id: Uuid,
        status: ExecutionStatus,
    },
}

impl ExecutionEvent {
    fn masked(self, secrets: &[String]) -> Self {
        if secrets.is_empty() {
            return self;
        }
        match self {
            ExecutionEvent::StepStarted {
                job,
                step,
                phase,
                command,
            } => ExecutionEvent::StepStarted {
                job,
                step,
                phase,
                command: mask_secrets(&command, secrets),
            },
            ExecutionEvent::StepOutput { job, step, line } => ExecutionEvent::StepOutput {
                job,
                step,
                line: mask_secrets(&line, secrets),
            },
            ExecutionEvent::DeployOutput { index, line } => ExecutionEvent::DeployOutput {
                index,
                line: mask_secrets(&line, secrets),
            },
            ExecutionEvent::DeployFinished {
                index,
                provider,
                status,
                error,
            } => ExecutionEvent::DeployFinished {
                index,
                provider,
                status,
                error: error.map(|e| mask_secrets(&e, secrets)),
            },
            other => other,
        }
    }
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Delivers events of one run, with secrets masked
struct Emitter {
    handlers: Vec<EventHandler>,
    secrets: Vec<String>,
}

impl Emitter {
    fn emit(&self, event: ExecutionEvent) {
        let event = event.masked(&self.secrets);
        for handler in &self.handlers {
            handler(event.clone());
        }
    }

    fn mask(&self, text: &str) -> String {
        mask_secrets(text, &self.secrets)
    }
}

/// Forwards a step's output lines as events
struct StepSink<'a> {
    emitter: &'a Emitter,
    job: usize,
    step: usize,
}

impl OutputSink for StepSink<'_> {
    fn on_line(&self, line: &str, _stream: OutputStream) {
        self.emitter.emit(ExecutionEvent::StepOutput {
            job: self.job,
            step: self.step,
            line: line.to_string(),
        });
    }
}

struct DeploySink<'a> {
    emitter: &'a Emitter,
    index: usize,
}

impl OutputSink for DeploySink<'_> {
    fn on_line(&self, line: &str, _stream: OutputStream) {
        self.emitter.emit(ExecutionEvent::DeployOutput {
            index: self.index,
            line: line.to_string(),
        });
    }
}

/// Main pipeline execution engine
pub struct ExecutionEngine<R> {
    scheduler: ExecutionScheduler,
    executor: Arc<StepExecutor<R>>,
    event_handlers: RwLock<Vec<EventHandler>>,
}

impl<R: CommandRunner + 'static> ExecutionEngine<R> {
    pub fn new(runner: R, strategy: SchedulingStrategy) -> Self {
        Self {
            scheduler: ExecutionScheduler::new(strategy),
            executor: Arc::new(StepExecutor::new(runner)),
            event_handlers: RwLock::new(Vec::new()),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(handler));
    }

    pub fn runner(&self) -> &R {
        self.executor.runner()
    }

    /// Execute every job of the matrix, then the deploy phase
    pub async fn execute(&self, pipeline: &mut Pipeline, context: &RunContext) -> Result<RunReport> {
        let run_id = pipeline.state.run_id;
        let total_jobs = pipeline.job_count();
        let deploy_env = context.deploy_env(pipeline);
        let emitter = Arc::new(Emitter {
            handlers: self
                .event_handlers
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            secrets: resolve_secrets(&pipeline.secret_references(), &deploy_env),
        });

        info!(
            "Starting run {} of {} on branch {} ({} job(s))",
            run_id, pipeline.name, context.branch, total_jobs
        );
        pipeline.state.start(total_jobs);
        emitter.emit(ExecutionEvent::RunStarted {
            run_id,
            pipeline_name: pipeline.name.clone(),
            branch: context.branch.clone(),
            total_jobs,
        });

        let cache_env = context.prepare_cache(pipeline).unwrap_or_else(|e| {
            warn!("Cache setup failed, continuing without it: {:#}", e);
            BTreeMap::new()
        });
        let jobs = pipeline.jobs(context, &cache_env);

        let jobs = self
            .run_jobs(jobs, &context.build_dir, &emitter)
            .await?;
        for job in &jobs {
            pipeline.state.record_job(job.status);
        }

        let deploys = self
            .run_deploys(pipeline, context, &deploy_env, &emitter)
            .await;

        let deploy_failed = deploys
            .iter()
            .any(|d| d.status == ExecutionStatus::Failed);
        if pipeline.state.all_jobs_succeeded() && !deploy_failed {
            pipeline.state.succeed();
        } else {
            pipeline.state.fail();
        }
        let status = pipeline.state.status;

        info!("Run {} finished: {}", run_id, status.as_str());
        emitter.emit(ExecutionEvent::RunFinished { run_id, status });

        let now = Utc::now();
        Ok(RunReport {
            run_id,
            pipeline_name: pipeline.name.clone(),
            branch: context.branch.clone(),
            commit: context.commit.clone(),
            status,
            started_at: pipeline.state.started_at.unwrap_or(now),
            completed_at: pipeline.state.completed_at.unwrap_or(now),
            jobs: jobs
                .iter()
                .map(|job| JobReport::from_job(job, &emitter.secrets))
                .collect(),
            deploys,
        })
    }

    /// Run the jobs with the configured concurrency, returned in matrix order
    async fn run_jobs(
        &self,
        jobs: Vec<Job>,
        build_dir: &Path,
        emitter: &Arc<Emitter>,
    ) -> Result<Vec<Job>> {
        if self.scheduler.is_sequential(jobs.len()) {
            let mut finished = Vec::with_capacity(jobs.len());
            for job in jobs {
                finished.push(run_job(self.executor.as_ref(), emitter.as_ref(), build_dir, job).await);
            }
            return Ok(finished);
        }

        let concurrency = self.scheduler.concurrency(jobs.len());
        debug!(
            "Running {} jobs ({:?}), at most {} at a time",
            jobs.len(),
            self.scheduler.strategy(),
            concurrency
        );
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();
        for job in jobs {
            let semaphore = semaphore.clone();
            let executor = self.executor.clone();
            let emitter = emitter.clone();
            let build_dir: PathBuf = build_dir.to_path_buf();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .context("Job semaphore closed")?;
                Ok::<_, anyhow::Error>(
                    run_job(executor.as_ref(), emitter.as_ref(), &build_dir, job).await,
                )
            });
        }

        let mut finished = Vec::new();
        while let Some(result) = tasks.join_next().await {
            finished.push(result.context("Job task panicked")??);
        }
        finished.sort_by_key(|job| job.number);
        Ok(finished)
    }

    /// Evaluate deploy actions in order, sequentially
    async fn run_deploys(
        &self,
        pipeline: &Pipeline,
        context: &RunContext,
        env: &BTreeMap<String, String>,
        emitter: &Emitter,
    ) -> Vec<DeployReport> {
        let jobs_succeeded = pipeline.state.all_jobs_succeeded();
        let mut reports = Vec::with_capacity(pipeline.deploys.len());

        for action in &pipeline.deploys {
            let skip_reason = if !jobs_succeeded {
                Some(format!(
                    "{} of {} job(s) failed",
                    pipeline.state.failed_jobs, pipeline.state.total_jobs
                ))
            } else if !action.condition.matches(&context.branch) {
                Some(format!(
                    "branch {} does not match {}",
                    context.branch,
                    action.condition.describe()
                ))
            } else {
                None
            };

            let report = match skip_reason {
                Some(reason) => {
                    warn!(
                        "Skipping deploy {} ({}): {}",
                        action.index,
                        action.provider.as_str(),
                        reason
                    );
                    emitter.emit(ExecutionEvent::DeploySkipped {
                        index: action.index,
                        provider: action.provider,
                        reason: reason.clone(),
                    });
                    DeployReport {
                        index: action.index,
                        provider: action.provider,
                        condition: action.condition.describe(),
                        status: ExecutionStatus::Skipped,
                        reason: Some(reason),
                        error: None,
                        output_tail: Vec::new(),
                        duration_ms: 0,
                    }
                }
                None => {
                    self.run_deploy(action, context, env, pipeline.timeout_secs, emitter)
                        .await
                }
            };
            reports.push(report);
        }

        reports
    }

    async fn run_deploy(
        &self,
        action: &DeployAction,
        context: &RunContext,
        env: &BTreeMap<String, String>,
        timeout_secs: u64,
        emitter: &Emitter,
    ) -> DeployReport {
        info!(
            "Running deploy {} ({})",
            action.index,
            action.provider.as_str()
        );
        emitter.emit(ExecutionEvent::DeployStarted {
            index: action.index,
            provider: action.provider,
        });

        let started = Instant::now();
        let sink = DeploySink {
            emitter,
            index: action.index,
        };
        let deploy_context = DeployContext {
            build_dir: &context.build_dir,
            env,
            timeout: Duration::from_secs(timeout_secs),
            sink: Some(&sink),
            secrets: &emitter.secrets,
        };

        let result = match provider_for(action.provider, &action.options) {
            Ok(provider) => provider.deploy(self.executor.runner(), &deploy_context).await,
            Err(e) => Err(e),
        };

        let (status, error, output_tail) = match result {
            Ok(()) => (ExecutionStatus::Succeeded, None, Vec::new()),
            Err(e) => {
                let message = emitter.mask(&e.to_string());
                error!("Deploy {} failed: {}", action.index, message);
                let tail = e.output_tail().iter().map(|l| emitter.mask(l)).collect();
                (ExecutionStatus::Failed, Some(message), tail)
            }
        };

        emitter.emit(ExecutionEvent::DeployFinished {
            index: action.index,
            provider: action.provider,
            status,
            error: error.clone(),
        });

        DeployReport {
            index: action.index,
            provider: action.provider,
            condition: action.condition.describe(),
            status,
            reason: None,
            error,
            output_tail,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Run one job: main steps until the first failure, then the hooks
async fn run_job<R: CommandRunner>(
    executor: &StepExecutor<R>,
    emitter: &Emitter,
    build_dir: &Path,
    mut job: Job,
) -> Job {
    let label = job.label();
    info!("Starting job {}", label);
    job.status = ExecutionStatus::Running;
    emitter.emit(ExecutionEvent::JobStarted {
        job: job.number,
        label: label.clone(),
    });

    let mut failed_step = None;
    for step in job.steps.iter_mut() {
        if let Some(index) = failed_step {
            step.state = StepState::Skipped {
                reason: format!("step {} failed", index),
            };
            continue;
        }
        if !run_step(executor, emitter, build_dir, &job.env, job.number, step).await {
            failed_step = Some(step.index);
        }
    }

    let succeeded = failed_step.is_none();
    for hook in job.hooks.iter_mut() {
        if !hook.phase.runs_after(succeeded) {
            hook.state = StepState::Skipped {
                reason: format!(
                    "job {}",
                    if succeeded { "succeeded" } else { "failed" }
                ),
            };
            continue;
        }
        if !run_step(executor, emitter, build_dir, &job.env, job.number, hook).await {
            warn!(
                "Job {}: {} hook '{}' failed; job status unchanged",
                label,
                hook.phase,
                emitter.mask(&hook.command)
            );
        }
    }

    job.failed_step = failed_step;
    job.status = if succeeded {
        ExecutionStatus::Succeeded
    } else {
        ExecutionStatus::Failed
    };
    info!("Job {} finished: {}", label, job.status.as_str());
    emitter.emit(ExecutionEvent::JobFinished {
        job: job.number,
        label,
        status: job.status,
        failed_step,
    });
    job
}

/// Run a single step, recording its outcome on the step; true on success
async fn run_step<R: CommandRunner>(
    executor: &StepExecutor<R>,
    emitter: &Emitter,
    build_dir: &Path,
    env: &BTreeMap<String, String>,
    job: usize,
    step: &mut Step,
) -> bool {
    let started_at = Utc::now();
    step.state = StepState::Running { started_at };
    emitter.emit(ExecutionEvent::StepStarted {
        job,
        step: step.index,
        phase: step.phase,
        command: step.command.clone(),
    });

    let sink = StepSink {
        emitter,
        job,
        step: step.index,
    };
    let outcome = executor.execute(step, env, build_dir, &emitter.secrets, Some(&sink)).await;
    let success = outcome.is_success();

    match outcome {
        StepOutcome::Succeeded { duration, tail } => {
            step.state = StepState::Succeeded {
                started_at,
                completed_at: Utc::now(),
            };
            step.exit_code = Some(0);
            step.duration_ms = duration.as_millis() as u64;
            step.output_tail = tail.iter().map(|l| emitter.mask(l)).collect();
        }
        StepOutcome::Failed {
            error,
            exit_code,
            duration,
            tail,
        } => {
            step.state = StepState::Failed {
                error: emitter.mask(&error),
                exit_code,
                started_at,
                failed_at: Utc::now(),
            };
            step.exit_code = exit_code;
            step.duration_ms = duration.as_millis() as u64;
            step.output_tail = tail.iter().map(|l| emitter.mask(l)).collect();
        }
    }

    emitter.emit(ExecutionEvent::StepFinished {
        job,
        step: step.index,
        phase: step.phase,
        status: if success {
            ExecutionStatus::Succeeded
        } else {
            ExecutionStatus::Failed
        },
        exit_code: step.exit_code,
        duration_ms: step.duration_ms,
    });
    success
}
