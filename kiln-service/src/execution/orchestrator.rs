// Pipeline Orchestrator
// Runs the jobs of one pipeline sequentially and records every transition

use crate::config::{JobSpec, WorkflowDefinition};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::notifier::{notify, CommitState, StatusNotifier};
use crate::runners::{Runner, RunnerError, RunnerResult};
use crate::store::{
    JobId, JobStatus, PipelineId, PipelineRun, PipelineStatus, Store, StoreResult,
};

use chrono::Utc;
use futures::FutureExt;
use indexmap::IndexMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Drives pipeline runs through their state machine.
///
/// Job failures are recorded, never returned: only persistence errors
/// escape [`Orchestrator::run`].
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn Store>,
    runner: Arc<dyn Runner>,
    notifier: Option<Arc<dyn StatusNotifier>>,
    event_tx: Option<ProgressSender>,
}

/// How the job loop ended
enum Outcome {
    Succeeded,
    Failed { job: String },
}

impl Orchestrator {
    pub fn new(store: Arc<dyn Store>, runner: Arc<dyn Runner>) -> Self {
        Self {
            store,
            runner,
            notifier: None,
            event_tx: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn StatusNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn notifier(&self) -> Option<&Arc<dyn StatusNotifier>> {
        self.notifier.as_ref()
    }

    /// Execute `workflow` for an existing pipeline record, then remove `workspace`.
    ///
    /// A pipeline id with no record is logged and ignored.
    pub async fn run(
        &self,
        pipeline_id: PipelineId,
        workflow: &WorkflowDefinition,
        workspace: &Path,
    ) -> StoreResult<()> {
        info!(pipeline_id, workflow = workflow.name(), "Starting pipeline");

        let Some(pipeline) = self.store.get_pipeline(pipeline_id).await? else {
            error!(pipeline_id, "Pipeline not found in storage when attempting to run");
            return Ok(());
        };

        let result = self.execute(&pipeline, workflow, workspace).await;
        cleanup_workspace(workspace).await;
        result
    }

    /// Create the pending job records that do not exist yet.
    ///
    /// Returns job ids keyed by name, in execution order.
    pub async fn ensure_job_records(
        &self,
        pipeline_id: PipelineId,
        job_names: &[String],
    ) -> StoreResult<IndexMap<String, JobId>> {
        let existing: IndexMap<String, JobId> = self
            .store
            .list_jobs(pipeline_id)
            .await?
            .into_iter()
            .map(|job| (job.job_name, job.id))
            .collect();

        let mut ids = IndexMap::with_capacity(job_names.len());
        for name in job_names {
            let id = match existing.get(name) {
                Some(id) => *id,
                None => self.store.create_job(pipeline_id, name).await?,
            };
            ids.insert(name.clone(), id);
        }
        Ok(ids)
    }

    async fn execute(
        &self,
        pipeline: &PipelineRun,
        workflow: &WorkflowDefinition,
        workspace: &Path,
    ) -> StoreResult<()> {
        let pipeline_id = pipeline.id;
        let started = Instant::now();

        self.store
            .update_pipeline_status(pipeline_id, PipelineStatus::Running)
            .await?;
        self.report(pipeline, CommitState::Pending, "Pipeline is running")
            .await;

        let order = workflow.execution_order();
        self.event_tx.send_event(ExecutionEvent::pipeline_started(
            pipeline_id,
            workflow.name(),
            order.len(),
        ));

        let job_ids = self.ensure_job_records(pipeline_id, order).await?;

        let mut outcome = Outcome::Succeeded;
        for job in workflow.ordered_jobs() {
            let job_id = job_ids[job.name.as_str()];
            self.store
                .update_job_status(job_id, JobStatus::Running, Some(Utc::now()))
                .await?;
            info!(pipeline_id, job = %job.name, "Running job");
            self.event_tx.send_event(ExecutionEvent::job_started(
                pipeline_id,
                &job.name,
                &job.image,
            ));

            let job_started = Instant::now();
            let result = match self.invoke_runner(job, workspace).await {
                Ok(result) => result,
                Err(e) => {
                    error!(pipeline_id, job = %job.name, error = %e, "Runner raised an error");
                    RunnerResult::failure(format!("Runner raised unexpected error: {}\n", e), None)
                }
            };

            self.store.set_job_log(job_id, &result.output).await?;
            let status = if result.success {
                JobStatus::Success
            } else {
                JobStatus::Failure
            };
            self.store.update_job_status(job_id, status, None).await?;
            self.event_tx.send_event(ExecutionEvent::job_completed(
                pipeline_id,
                &job.name,
                status,
                job_started.elapsed(),
                result.exit_code,
            ));

            if !result.success {
                info!(
                    pipeline_id,
                    job = %job.name,
                    exit_code = ?result.exit_code,
                    "Job failed"
                );
                outcome = Outcome::Failed {
                    job: job.name.clone(),
                };
                break;
            }
        }

        match outcome {
            Outcome::Succeeded => {
                self.store
                    .update_pipeline_status(pipeline_id, PipelineStatus::Success)
                    .await?;
                let summary = format!("Pipeline succeeded ({} jobs)", order.len());
                self.report(pipeline, CommitState::Success, &summary).await;
                self.finish(pipeline_id, PipelineStatus::Success, started.elapsed());
                info!(pipeline_id, "Pipeline completed successfully");
            }
            Outcome::Failed { job: failed } => {
                self.skip_remaining(pipeline_id, &job_ids, &failed).await?;
                self.store
                    .update_pipeline_status(pipeline_id, PipelineStatus::Failure)
                    .await?;
                let description = format!("Job {} failed", failed);
                self.report(pipeline, CommitState::Failure, &description)
                    .await;
                self.finish(pipeline_id, PipelineStatus::Failure, started.elapsed());
                info!(pipeline_id, job = %failed, "Pipeline marked as failure");
            }
        }

        Ok(())
    }

    /// A returned error or a panic both count as a runner fault
    async fn invoke_runner(
        &self,
        job: &JobSpec,
        workspace: &Path,
    ) -> Result<RunnerResult, RunnerError> {
        match AssertUnwindSafe(self.runner.execute(job, workspace))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => Err(RunnerError::Fault("runner panicked".to_string())),
        }
    }

    /// Skip every job still pending once `failed` has failed
    async fn skip_remaining(
        &self,
        pipeline_id: PipelineId,
        job_ids: &IndexMap<String, JobId>,
        failed: &str,
    ) -> StoreResult<()> {
        for (name, job_id) in job_ids {
            let Some(job) = self.store.get_job(*job_id).await? else {
                continue;
            };
            if job.status != JobStatus::Pending {
                continue;
            }
            self.store
                .update_job_status(*job_id, JobStatus::Skipped, None)
                .await?;
            self.event_tx.send_event(ExecutionEvent::job_skipped(
                pipeline_id,
                name,
                format!("job {} failed", failed),
            ));
        }
        Ok(())
    }

    async fn report(&self, pipeline: &PipelineRun, state: CommitState, description: &str) {
        if let Some(notifier) = &self.notifier {
            notify(
                notifier.as_ref(),
                state,
                &pipeline.repo,
                &pipeline.commit_sha,
                pipeline.id,
                description,
            )
            .await;
        }
    }

    fn finish(&self, pipeline_id: PipelineId, status: PipelineStatus, duration: Duration) {
        self.event_tx
            .send_event(ExecutionEvent::pipeline_completed(pipeline_id, status, duration));
    }
}

/// Remove a finished run's workspace; a missing directory is fine
pub async fn cleanup_workspace(workspace: &Path) {
    match tokio::fs::remove_dir_all(workspace).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            workspace = %workspace.display(),
            error = %e,
            "Failed to clean workspace"
        ),
    }
}
