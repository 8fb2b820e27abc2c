use anyhow::{Context, Result};
use ci_runner::cli::commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use ci_runner::cli::output::*;
use ci_runner::cli::{Cli, Command};
use ci_runner::core::config::PipelineConfig;
use ci_runner::core::{
    mask_secrets, resolve_secrets, ExecutionStatus, Pipeline, RunContext, DEFAULT_PIPELINE_NAME,
};
use ci_runner::execution::{ExecutionEngine, ExecutionEvent, ShellRunner};
use ci_runner::persistence::{
    create_summary, open_history, InMemoryPersistence, PersistenceBackend, RunSummary,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, cli.stream).await?,
        Command::Validate(cmd) => validate_pipeline(cmd).await?,
        Command::List(cmd) => list_pipelines(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

/// Project directory: `--dir`, else the directory holding the config file
fn project_dir(file: &Path, dir: Option<&PathBuf>) -> Result<PathBuf> {
    let dir = match dir {
        Some(dir) => dir.clone(),
        None => match file.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent.to_path_buf(),
            None => std::env::current_dir().context("Failed to read the current directory")?,
        },
    };
    dir.canonicalize()
        .with_context(|| format!("Project directory {} does not exist", dir.display()))
}

fn load_pipeline(file: &Path, dir: &Path) -> Result<Pipeline> {
    let default_name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_PIPELINE_NAME);
    PipelineConfig::from_file(file)
        .with_context(|| format!("Failed to load pipeline config {}", file.display()))?
        .with_default_name(default_name)
        .to_pipeline()
}

async fn run_pipeline(cmd: &RunCommand, stream: bool) -> Result<()> {
    let dir = project_dir(&cmd.file, cmd.dir.as_ref())?;
    let mut pipeline = load_pipeline(&cmd.file, &dir)?;

    let runner = ShellRunner::default();
    let context = RunContext::detect(&runner, dir, cmd.branch.clone())
        .await?
        .with_overrides(cmd.env.iter().cloned().collect());

    if !cmd.json {
        println!(
            "{} Loaded pipeline: {} ({} job(s), {} deploy action(s))",
            INFO,
            style(&pipeline.name).bold(),
            pipeline.job_count(),
            pipeline.deploys.len()
        );
        for (key, value) in &context.overrides {
            println!(
                "{} Environment override: {} = {}",
                INFO,
                style(key).cyan(),
                style(value).dim()
            );
        }
    }

    // Set up persistence
    let store: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        open_history().await?
    };

    let engine = ExecutionEngine::new(runner, cmd.scheduling_strategy());

    if !cmd.json {
        if stream {
            engine.add_event_handler(|event| {
                if let Some(line) = format_execution_event(&event) {
                    println!("{}", line);
                }
            });
        } else {
            let progress = create_progress_bar(pipeline.job_count());
            engine.add_event_handler(move |event| {
                if let ExecutionEvent::JobFinished { .. } = &event {
                    progress.inc(1);
                }
                if is_step_detail(&event) {
                    return;
                }
                if let Some(line) = format_execution_event(&event) {
                    progress.println(line);
                }
                if let ExecutionEvent::RunFinished { .. } = &event {
                    progress.finish_and_clear();
                }
            });
        }
    }

    let report = engine.execute(&mut pipeline, &context).await?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", format_report(&report));
    }

    if !cmd.no_history {
        let summary = create_summary(&report);
        store.save_run(&summary).await?;
        debug!("Run {} saved to history", summary.run_id);
        if !cmd.json {
            println!(
                "{} Run saved to history (ID: {})",
                INFO,
                style(short_id(&summary.run_id.to_string())).dim()
            );
        }
    }

    if !report.is_success() {
        error!("Run failed");
        std::process::exit(1);
    }

    Ok(())
}

async fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    let dir = project_dir(&cmd.file, None)?;
    let pipeline = match load_pipeline(&cmd.file, &dir) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    };

    // Deploy gating is only shown when the branch is known
    let branch = match RunContext::detect(&ShellRunner::default(), dir, cmd.branch.clone()).await {
        Ok(context) => Some(context.branch),
        Err(e) => {
            debug!("No branch for deploy evaluation: {:#}", e);
            None
        }
    };
    let secrets = resolve_secrets(&pipeline.secret_references(), &BTreeMap::new());
    let mask = |text: &str| mask_secrets(text, &secrets);
    let would_run = |index: usize| {
        branch.as_ref().map(|b| {
            pipeline
                .deploys_for_branch(b)
                .iter()
                .any(|d| d.index == index)
        })
    };

    if cmd.json {
        let data = serde_json::json!({
            "name": pipeline.name,
            "language": pipeline.language,
            "matrix": pipeline.matrix,
            "branch": branch,
            "steps": pipeline.steps.iter().map(|s| serde_json::json!({
                "index": s.index,
                "phase": s.phase,
                "command": mask(&s.command),
            })).collect::<Vec<_>>(),
            "hooks": pipeline.hooks.iter().map(|s| serde_json::json!({
                "phase": s.phase,
                "command": mask(&s.command),
            })).collect::<Vec<_>>(),
            "deploys": pipeline.deploys.iter().map(|d| serde_json::json!({
                "index": d.index,
                "provider": d.provider,
                "condition": d.condition.describe(),
                "would_run": would_run(d.index),
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Pipeline configuration is valid!", CHECK);
    println!("  Name: {}", style(&pipeline.name).bold());
    println!("  Language: {}", style(&pipeline.language).cyan());
    if pipeline.matrix.is_empty() {
        println!("  Jobs: 1 (no version matrix)");
    } else {
        println!(
            "  Jobs: {} ({})",
            style(pipeline.job_count()).cyan(),
            pipeline.matrix.join(", ")
        );
    }

    println!("  Steps:");
    for step in &pipeline.steps {
        println!("    {}. [{}] {}", step.index, style(step.phase).dim(), mask(&step.command));
    }
    if !pipeline.hooks.is_empty() {
        println!("  Hooks:");
        for hook in &pipeline.hooks {
            println!("    [{}] {}", style(hook.phase).dim(), mask(&hook.command));
        }
    }

    if !pipeline.deploys.is_empty() {
        match &branch {
            Some(branch) => println!("  Deploys (branch {}):", style(branch).cyan()),
            None => println!("  Deploys:"),
        }
        for deploy in &pipeline.deploys {
            let verdict = match would_run(deploy.index) {
                Some(true) => style("would run").green().to_string(),
                Some(false) => style("skipped").dim().to_string(),
                None => style("branch unknown").yellow().to_string(),
            };
            println!(
                "    {}. {} on {} - {}",
                deploy.index,
                deploy.provider.as_str(),
                deploy.condition.describe(),
                verdict
            );
        }
    }

    Ok(())
}

async fn list_pipelines(cmd: &ListCommand) -> Result<()> {
    let store = open_history().await?;
    let pipelines = store.list_pipelines().await?;

    if cmd.json {
        let data = serde_json::json!({
            "pipelines": pipelines.iter().map(|(name, runs)| serde_json::json!({
                "name": name,
                "run_count": runs,
            })).collect::<Vec<_>>()
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(());
    }

    println!("{} Pipelines in history:", INFO);
    for (name, runs) in &pipelines {
        if cmd.with_counts {
            let history = store.list_runs(Some(name), *runs).await?;
            let succeeded = history
                .iter()
                .filter(|r| r.status == ExecutionStatus::Succeeded)
                .count();
            let failed = history
                .iter()
                .filter(|r| r.status == ExecutionStatus::Failed)
                .count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed)",
                style(name).bold(),
                style(runs).cyan(),
                style(succeeded).green(),
                style(failed).red()
            );
        } else {
            println!("  {}", style(name).bold());
        }
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_history().await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) if cmd.json => println!("{}", serde_json::to_string_pretty(&summary)?),
            Some(summary) => print_run_details(&summary),
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let runs = store.list_runs(cmd.pipeline.as_deref(), cmd.limit).await?;

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary) {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Branch: {}", style(&summary.branch).cyan());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Jobs: {} ({} failed)",
        summary.total_jobs, summary.failed_jobs
    );
    println!("  Deploys run: {}", summary.deploys_run);
    if let Some(failure) = &summary.failure {
        println!("  Failure: {}", style(failure).red());
    }
}
