//! Pipeline and job persistence.
//!
//! The [`Store`] trait is the record-based contract the orchestrator and the
//! trigger service work against. Every mutation is an independent, atomic
//! update keyed by pipeline or job id, so concurrently running pipelines
//! never need to coordinate.
//!
//! Status changes are checked against the allowed transitions
//! ([`PipelineStatus::predecessors`], [`JobStatus::predecessors`]) inside the
//! UPDATE itself; a rejected change yields [`StoreError::InvalidTransition`].

mod models;
mod sqlite;

pub use models::{
    JobId, JobRun, JobStatus, NewPipeline, PipelineId, PipelineRun, PipelineStatus,
};
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("{entity} {id} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        id: i64,
        from: String,
        to: String,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage contract for pipeline and job records
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Record a new pipeline run; `started_at` is stamped now and again when it starts running
    async fn create_pipeline(&self, pipeline: &NewPipeline) -> StoreResult<PipelineId>;

    async fn get_pipeline(&self, id: PipelineId) -> StoreResult<Option<PipelineRun>>;

    /// Move a pipeline to `status`.
    ///
    /// `Running` restamps `started_at` so queue time is excluded; terminal
    /// statuses stamp `finished_at`.
    async fn update_pipeline_status(&self, id: PipelineId, status: PipelineStatus)
        -> StoreResult<()>;

    /// Most recently started pipelines first
    async fn recent_pipelines(&self, limit: u32) -> StoreResult<Vec<PipelineRun>>;

    /// Record a pending job for a pipeline
    async fn create_job(&self, pipeline_id: PipelineId, job_name: &str) -> StoreResult<JobId>;

    async fn get_job(&self, id: JobId) -> StoreResult<Option<JobRun>>;

    /// Jobs of a pipeline in creation order
    async fn list_jobs(&self, pipeline_id: PipelineId) -> StoreResult<Vec<JobRun>>;

    /// Move a job to `status`, optionally stamping its start time
    async fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        started_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;

    /// Replace the captured log of a job
    async fn set_job_log(&self, id: JobId, log: &str) -> StoreResult<()>;
}
