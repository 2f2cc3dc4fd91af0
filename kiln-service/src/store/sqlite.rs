use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::debug;

use super::{
    JobId, JobRun, JobStatus, NewPipeline, PipelineId, PipelineRun, PipelineStatus, Store,
    StoreError, StoreResult,
};

const PIPELINE_COLUMNS: &str = "id, repo, clone_url, commit_sha, branch, workflow_name, config_path, status, started_at, finished_at";
const JOB_COLUMNS: &str = "id, pipeline_id, job_name, status, started_at, finished_at, log";

/// SQLite-based store implementation.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `url` and run migrations.
    ///
    /// In-memory URLs are pinned to a single long-lived connection so every
    /// caller sees the same database.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self::new(pool);
        store.migrate().await?;
        debug!(url, "SQLite store ready");
        Ok(store)
    }

    /// Open a fresh private in-memory database
    pub async fn in_memory() -> StoreResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn pipeline_status(&self, id: PipelineId) -> StoreResult<Option<PipelineStatus>> {
        let status = sqlx::query_scalar("SELECT status FROM pipelines WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(status)
    }

    async fn job_status(&self, id: JobId) -> StoreResult<Option<JobStatus>> {
        let status = sqlx::query_scalar("SELECT status FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(status)
    }
}

/// `?, ?, ?` for an IN clause
fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn create_pipeline(&self, pipeline: &NewPipeline) -> StoreResult<PipelineId> {
        let now = Utc::now();
        let finished_at = pipeline.status.is_terminal().then_some(now);

        let result = sqlx::query(
            r#"
            INSERT INTO pipelines (repo, clone_url, commit_sha, branch, workflow_name, config_path, status, started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&pipeline.repo)
        .bind(&pipeline.clone_url)
        .bind(&pipeline.commit_sha)
        .bind(&pipeline.branch)
        .bind(&pipeline.workflow_name)
        .bind(&pipeline.config_path)
        .bind(pipeline.status)
        .bind(now)
        .bind(finished_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn get_pipeline(&self, id: PipelineId) -> StoreResult<Option<PipelineRun>> {
        let pipeline = sqlx::query_as::<_, PipelineRun>(&format!(
            "SELECT {} FROM pipelines WHERE id = ?",
            PIPELINE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(pipeline)
    }

    async fn update_pipeline_status(
        &self,
        id: PipelineId,
        status: PipelineStatus,
    ) -> StoreResult<()> {
        let allowed = status.predecessors();
        let mut applied = false;

        if !allowed.is_empty() {
            let now = Utc::now();
            let started_at = (status == PipelineStatus::Running).then_some(now);
            let finished_at = status.is_terminal().then_some(now);
            let sql = format!(
                r#"
                UPDATE pipelines
                   SET status = ?,
                       started_at = COALESCE(?, started_at),
                       finished_at = COALESCE(?, finished_at)
                 WHERE id = ? AND status IN ({})
                "#,
                placeholders(allowed.len())
            );

            let mut query = sqlx::query(&sql)
                .bind(status)
                .bind(started_at)
                .bind(finished_at)
                .bind(id);
            for from in allowed {
                query = query.bind(*from);
            }
            applied = query.execute(&self.pool).await?.rows_affected() > 0;
        }

        if applied {
            return Ok(());
        }

        match self.pipeline_status(id).await? {
            None => Err(StoreError::NotFound {
                entity: "pipeline",
                id,
            }),
            Some(current) => Err(StoreError::InvalidTransition {
                entity: "pipeline",
                id,
                from: current.to_string(),
                to: status.to_string(),
            }),
        }
    }

    async fn recent_pipelines(&self, limit: u32) -> StoreResult<Vec<PipelineRun>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let pipelines = sqlx::query_as::<_, PipelineRun>(&format!(
            "SELECT {} FROM pipelines ORDER BY started_at DESC, id DESC LIMIT ?",
            PIPELINE_COLUMNS
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(pipelines)
    }

    async fn create_job(&self, pipeline_id: PipelineId, job_name: &str) -> StoreResult<JobId> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (pipeline_id, job_name, status)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(pipeline_id)
        .bind(job_name)
        .bind(JobStatus::Pending)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn get_job(&self, id: JobId) -> StoreResult<Option<JobRun>> {
        let job = sqlx::query_as::<_, JobRun>(&format!(
            "SELECT {} FROM jobs WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    async fn list_jobs(&self, pipeline_id: PipelineId) -> StoreResult<Vec<JobRun>> {
        let jobs = sqlx::query_as::<_, JobRun>(&format!(
            "SELECT {} FROM jobs WHERE pipeline_id = ? ORDER BY id",
            JOB_COLUMNS
        ))
        .bind(pipeline_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        started_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let allowed = status.predecessors();
        let mut applied = false;

        if !allowed.is_empty() {
            let finished_at = status.stamps_finish().then(Utc::now);
            let sql = format!(
                r#"
                UPDATE jobs
                   SET status = ?,
                       started_at = COALESCE(?, started_at),
                       finished_at = COALESCE(?, finished_at)
                 WHERE id = ? AND status IN ({})
                "#,
                placeholders(allowed.len())
            );

            let mut query = sqlx::query(&sql)
                .bind(status)
                .bind(started_at)
                .bind(finished_at)
                .bind(id);
            for from in allowed {
                query = query.bind(*from);
            }
            applied = query.execute(&self.pool).await?.rows_affected() > 0;
        }

        if applied {
            return Ok(());
        }

        match self.job_status(id).await? {
            None => Err(StoreError::NotFound { entity: "job", id }),
            Some(current) => Err(StoreError::InvalidTransition {
                entity: "job",
                id,
                from: current.to_string(),
                to: status.to_string(),
            }),
        }
    }

    async fn set_job_log(&self, id: JobId, log: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE jobs SET log = ? WHERE id = ?")
            .bind(log)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "job", id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_pipeline() {
        let store = store().await;
        let id = store
            .create_pipeline(
                &NewPipeline::new("acme/widgets", "abc123", "main")
                    .with_clone_url("https://example.com/acme/widgets.git")
                    .with_workflow("ci", Some(".kiln/ci.yml".to_string())),
            )
            .await
            .unwrap();

        let pipeline = store.get_pipeline(id).await.unwrap().unwrap();
        assert_eq!(pipeline.repo, "acme/widgets");
        assert_eq!(pipeline.workflow_name, "ci");
        assert_eq!(pipeline.config_path.as_deref(), Some(".kiln/ci.yml"));
        assert_eq!(pipeline.status, PipelineStatus::Pending);
        assert!(pipeline.finished_at.is_none());
        assert!(store.get_pipeline(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pipeline_status_transitions() {
        let store = store().await;
        let id = store
            .create_pipeline(&NewPipeline::new("r", "c", "main"))
            .await
            .unwrap();

        let err = store
            .update_pipeline_status(id, PipelineStatus::Success)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        store
            .update_pipeline_status(id, PipelineStatus::Running)
            .await
            .unwrap();
        store
            .update_pipeline_status(id, PipelineStatus::Success)
            .await
            .unwrap();

        let pipeline = store.get_pipeline(id).await.unwrap().unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Success);
        assert!(pipeline.finished_at.is_some());

        let err = store
            .update_pipeline_status(id, PipelineStatus::Failure)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_update_missing_pipeline() {
        let store = store().await;
        let err = store
            .update_pipeline_status(42, PipelineStatus::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "pipeline", id: 42 }));
    }

    #[tokio::test]
    async fn test_job_lifecycle() {
        let store = store().await;
        let pipeline_id = store
            .create_pipeline(&NewPipeline::new("r", "c", "main"))
            .await
            .unwrap();
        let build = store.create_job(pipeline_id, "build").await.unwrap();
        let test = store.create_job(pipeline_id, "test").await.unwrap();

        let started = Utc::now();
        store
            .update_job_status(build, JobStatus::Running, Some(started))
            .await
            .unwrap();
        store.set_job_log(build, "ok\n").await.unwrap();
        store
            .update_job_status(build, JobStatus::Failure, None)
            .await
            .unwrap();
        store
            .update_job_status(test, JobStatus::Skipped, None)
            .await
            .unwrap();

        let jobs = store.list_jobs(pipeline_id).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].job_name, "build");
        assert_eq!(jobs[0].status, JobStatus::Failure);
        assert_eq!(jobs[0].log.as_deref(), Some("ok\n"));
        assert!(jobs[0].started_at.is_some());
        assert!(jobs[0].finished_at.is_some());
        assert_eq!(jobs[1].status, JobStatus::Skipped);
        assert!(jobs[1].log.is_none());

        let err = store
            .update_job_status(test, JobStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_job_name_is_rejected() {
        let store = store().await;
        let pipeline_id = store
            .create_pipeline(&NewPipeline::new("r", "c", "main"))
            .await
            .unwrap();
        store.create_job(pipeline_id, "build").await.unwrap();
        assert!(store.create_job(pipeline_id, "build").await.is_err());
    }

    #[tokio::test]
    async fn test_recent_pipelines_newest_first() {
        let store = store().await;
        let first = store
            .create_pipeline(&NewPipeline::new("r", "c1", "main"))
            .await
            .unwrap();
        let second = store
            .create_pipeline(&NewPipeline::new("r", "c2", "main"))
            .await
            .unwrap();

        let recent = store.recent_pipelines(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, second);
        assert_eq!(recent[1].id, first);
        assert!(store.recent_pipelines(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_setup_failure_can_be_recorded_directly() {
        let store = store().await;
        let id = store
            .create_pipeline(
                &NewPipeline::new("r", "c", "main").with_status(PipelineStatus::Failure),
            )
            .await
            .unwrap();
        let pipeline = store.get_pipeline(id).await.unwrap().unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Failure);
        assert!(pipeline.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_running_restamps_started_at() {
        let store = store().await;
        let id = store
            .create_pipeline(&NewPipeline::new("r", "c", "main"))
            .await
            .unwrap();
        let queued = store.get_pipeline(id).await.unwrap().unwrap().started_at;

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        store
            .update_pipeline_status(id, PipelineStatus::Running)
            .await
            .unwrap();
        let running = store.get_pipeline(id).await.unwrap().unwrap();
        assert!(running.started_at > queued);

        store
            .update_pipeline_status(id, PipelineStatus::Success)
            .await
            .unwrap();
        let finished = store.get_pipeline(id).await.unwrap().unwrap();
        assert_eq!(finished.started_at, running.started_at);
        assert!(finished.finished_at.unwrap() >= finished.started_at);
    }
}
