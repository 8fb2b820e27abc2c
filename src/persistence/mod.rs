//! Persistence layer for run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

pub use crate::core::ExecutionStatus;
use crate::execution::RunReport;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Summary of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Branch the run was triggered for
    pub branch: String,

    /// Overall status
    pub status: ExecutionStatus,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Number of matrix jobs
    pub total_jobs: usize,

    /// Number of failed jobs
    pub failed_jobs: usize,

    /// Deploy actions that ran (succeeded or failed)
    pub deploys_run: usize,

    /// First failure, e.g. `#2 python 3.5 failed at step 3 (...)`
    pub failure: Option<String>,
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// List runs, newest first, optionally for one pipeline
    async fn list_runs(&self, pipeline_name: Option<&str>, limit: usize) -> Result<Vec<RunSummary>>;

    /// List all pipeline names with their run counts
    async fn list_pipelines(&self) -> Result<Vec<(String, usize)>>;
}

/// In-memory persistence (for testing or `--no-history`)
pub struct InMemoryPersistence {
    runs: tokio::sync::RwLock<Vec<RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            runs: tokio::sync::RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        let mut runs = self.runs.write().await;
        runs.retain(|r| r.run_id != run.run_id);
        runs.push(run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let runs = self.runs.read().await;
        Ok(runs.iter().find(|r| r.run_id == run_id).cloned())
    }

    async fn list_runs(&self, pipeline_name: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut result: Vec<RunSummary> = runs
            .iter()
            .filter(|r| pipeline_name.map_or(true, |name| r.pipeline_name == name))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        result.truncate(limit);
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<(String, usize)>> {
        let runs = self.runs.read().await;
        let mut counts = std::collections::BTreeMap::new();
        for run in runs.iter() {
            *counts.entry(run.pipeline_name.clone()).or_insert(0) += 1;
        }
        Ok(counts.into_iter().collect())
    }
}

/// Create a summary from a run report
/// Open the run history under the user data directory
#[cfg(feature = "sqlite")]
pub async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    Ok(Arc::new(SqliteRunStore::with_default_path().await?))
}

/// Without SQLite support, history only lives for the current process
#[cfg(not(feature = "sqlite"))]
pub async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    tracing::warn!("Built without the 'sqlite' feature; run history is not kept");
    Ok(Arc::new(InMemoryPersistence::new()))
}

pub fn create_summary(report: &RunReport) -> RunSummary {
    RunSummary {
        run_id: report.run_id,
        pipeline_name: report.pipeline_name.clone(),
        branch: report.branch.clone(),
        status: report.status,
        started_at: report.started_at,
        completed_at: Some(report.completed_at),
        total_jobs: report.jobs.len(),
        failed_jobs: report.failed_jobs().count(),
        deploys_run: report.executed_deploys().count(),
        failure: report.failed_jobs().next().and_then(|job| {
            job.failure_summary()
                .map(|summary| format!("{} {}", job.label, summary))
        }),
    }
}
