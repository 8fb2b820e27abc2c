//! CLI output formatting

use crate::{
    core::ExecutionStatus,
    execution::{ExecutionEvent, RunReport},
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Lines of a failing step's output shown in the final report
const FAILURE_TAIL_LINES: usize = 20;

/// Create a progress bar counting finished jobs
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} jobs {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Horizontal rule spanning the terminal width
pub fn separator() -> String {
    let width = term_size::dimensions_stdout()
        .map(|(w, _)| w)
        .unwrap_or(80);
    style("─".repeat(width)).dim().to_string()
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Skipped => style("SKIPPED").dim().to_string(),
    }
}

fn status_icon(status: ExecutionStatus) -> Emoji<'static, 'static> {
    match status {
        ExecutionStatus::Succeeded => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Skipped => SKIP,
        ExecutionStatus::Pending => INFO,
    }
}

/// Format a history entry for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let mut line = format!(
        "{} {} - {} - {} - {} ({} job(s), {} failed, {} deploy(s)) - {}",
        status_icon(summary.status),
        style(short_id(&summary.run_id.to_string())).dim(),
        style(&summary.pipeline_name).bold(),
        style(&summary.branch).cyan(),
        format_status(summary.status),
        summary.total_jobs,
        summary.failed_jobs,
        summary.deploys_run,
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim()
    );
    if let Some(failure) = &summary.failure {
        line.push_str(&format!("\n      {}", style(failure).red()));
    }
    line
}

/// Format an execution event for display; `None` for events not worth a line
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::RunStarted {
            run_id,
            pipeline_name,
            branch,
            total_jobs,
        } => format!(
            "{} Running {} on branch {} with {} job(s) ({})",
            ROCKET,
            style(pipeline_name).bold(),
            style(branch).cyan(),
            total_jobs,
            style(short_id(&run_id.to_string())).dim()
        ),
        ExecutionEvent::JobStarted { label, .. } => {
            format!("{} Job {}", SPINNER, style(label).cyan())
        }
        ExecutionEvent::StepStarted {
            job,
            step,
            phase,
            command,
        } => format!(
            "  {} {} {} $ {}",
            style(format!("#{}.{}", job, step)).dim(),
            style(phase).dim(),
            style(">").dim(),
            style(command).bold()
        ),
        ExecutionEvent::StepOutput { line, .. } => format!("    {}", line),
        ExecutionEvent::StepFinished {
            status: ExecutionStatus::Failed,
            job,
            step,
            exit_code,
            ..
        } => format!(
            "  {} step #{}.{} exited with {}",
            CROSS,
            job,
            step,
            exit_code.map_or_else(|| "no code".to_string(), |c| c.to_string())
        ),
        ExecutionEvent::StepFinished { .. } => return None,
        ExecutionEvent::JobFinished {
            label,
            status,
            failed_step,
            ..
        } => match failed_step {
            Some(step) => format!(
                "{} Job {} {} at step {}",
                CROSS,
                style(label).bold(),
                style("failed").red(),
                step
            ),
            None => format!(
                "{} Job {} {}",
                status_icon(*status),
                style(label).bold(),
                format_status(*status)
            ),
        },
        ExecutionEvent::DeployStarted { index, provider } => format!(
            "{} Deploy {} ({})",
            ROCKET,
            index,
            style(provider.as_str()).cyan()
        ),
        ExecutionEvent::DeployOutput { line, .. } => format!("    {}", line),
        ExecutionEvent::DeploySkipped {
            index,
            provider,
            reason,
        } => format!(
            "{} Deploy {} ({}) skipped: {}",
            SKIP,
            index,
            style(provider.as_str()).dim(),
            style(reason).dim()
        ),
        ExecutionEvent::DeployFinished {
            index,
            provider,
            status,
            error,
        } => match error {
            Some(error) => format!(
                "{} Deploy {} ({}) {}: {}",
                CROSS,
                index,
                provider.as_str(),
                style("failed").red(),
                error
            ),
            None => format!(
                "{} Deploy {} ({}) {}",
                status_icon(*status),
                index,
                provider.as_str(),
                format_status(*status)
            ),
        },
        ExecutionEvent::RunFinished { run_id, status } => format!(
            "{} Run {} {}",
            status_icon(*status),
            style(short_id(&run_id.to_string())).dim(),
            format_status(*status)
        ),
    };
    Some(line)
}

/// Whether an event belongs to the step-level detail shown only when streaming
pub fn is_step_detail(event: &ExecutionEvent) -> bool {
    matches!(
        event,
        ExecutionEvent::StepStarted { .. }
            | ExecutionEvent::StepOutput { .. }
            | ExecutionEvent::StepFinished { .. }
            | ExecutionEvent::DeployOutput { .. }
    )
}

/// Final report: one line per job and deploy, plus failure details
pub fn format_report(report: &RunReport) -> String {
    let mut lines = vec![separator()];

    for job in &report.jobs {
        let mut line = format!(
            "{} Job {} {}",
            status_icon(job.status),
            style(&job.label).bold(),
            format_status(job.status)
        );
        if let Some(summary) = job.failure_summary() {
            line.push_str(&format!(" - {}", summary));
        }
        lines.push(line);

        if let Some(step) = job.failing_step() {
            lines.push(format_output(&step.output_tail, FAILURE_TAIL_LINES));
        }
        for hook in job.hooks.iter().filter(|h| h.status == ExecutionStatus::Failed) {
            lines.push(format!(
                "  {} {} hook '{}' failed (ignored)",
                WARN, hook.phase, hook.command
            ));
        }
    }

    for deploy in &report.deploys {
        let detail = deploy
            .error
            .as_deref()
            .or(deploy.reason.as_deref())
            .map(|d| format!(" - {}", d))
            .unwrap_or_default();
        lines.push(format!(
            "{} Deploy {} ({}, {}) {}{}",
            status_icon(deploy.status),
            deploy.index,
            deploy.provider.as_str(),
            deploy.condition,
            format_status(deploy.status),
            detail
        ));
        if deploy.status == ExecutionStatus::Failed && !deploy.output_tail.is_empty() {
            lines.push(format_output(&deploy.output_tail, FAILURE_TAIL_LINES));
        }
    }

    lines.push(separator());
    lines.push(format!(
        "{} {} on {} {} in {}",
        status_icon(report.status),
        style(&report.pipeline_name).bold(),
        style(&report.branch).cyan(),
        format_status(report.status),
        format_duration(Duration::from_millis(report.duration_ms()))
    ));
    lines.join("\n")
}

/// Format output lines, keeping only the last `max_lines`
pub fn format_output(lines: &[String], max_lines: usize) -> String {
    let skipped = lines.len().saturating_sub(max_lines);
    let mut out = Vec::new();
    if skipped > 0 {
        out.push(format!(
            "    {}",
            style(format!("[... {} earlier lines]", skipped)).dim()
        ));
    }
    out.extend(lines[skipped..].iter().map(|l| format!("    {}", l)));
    out.join("\n")
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
