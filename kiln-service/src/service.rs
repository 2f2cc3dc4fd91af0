// Pipeline Service
// Turns push events and retry requests into scheduled pipeline runs

use crate::config::{ConfigError, ConfigParser, WorkflowDefinition};
use crate::error::{ServiceError, ServiceResult};
use crate::execution::Orchestrator;
use crate::fetch::SourceFetcher;
use crate::notifier::{notify, CommitState};
use crate::spawn::TaskSpawner;
use crate::store::{NewPipeline, PipelineId, PipelineStatus, Store};
use crate::workspace;

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// A push to a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    /// `owner/name`
    pub repo: String,
    pub clone_url: String,
    pub commit: String,
    /// Branch name or full `refs/heads/...` ref
    pub branch: String,
}

impl PushEvent {
    pub fn new(
        repo: impl Into<String>,
        clone_url: impl Into<String>,
        commit: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            repo: repo.into(),
            clone_url: clone_url.into(),
            commit: commit.into(),
            branch: branch.into(),
        }
    }

    /// Branch with any `refs/heads/` prefix removed
    pub fn branch_name(&self) -> &str {
        self.branch
            .strip_prefix(BRANCH_REF_PREFIX)
            .unwrap_or(&self.branch)
    }
}

/// Pipelines scheduled by one trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerOutcome {
    pub pipelines: Vec<PipelineId>,
}

/// Commit a pipeline reports against
struct Target<'a> {
    repo: &'a str,
    commit: &'a str,
}

/// Composition of fetcher, store, orchestrator and spawner
pub struct PipelineService {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn SourceFetcher>,
    orchestrator: Arc<Orchestrator>,
    spawner: Arc<dyn TaskSpawner>,
    workspace_root: PathBuf,
}

impl PipelineService {
    pub fn new(
        orchestrator: Orchestrator,
        fetcher: Arc<dyn SourceFetcher>,
        spawner: Arc<dyn TaskSpawner>,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store: Arc::clone(orchestrator.store()),
            fetcher,
            orchestrator: Arc::new(orchestrator),
            spawner,
            workspace_root: workspace_root.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Fetch the pushed commit and schedule one pipeline per workflow.
    ///
    /// A fetch or configuration failure records a single failed pipeline
    /// and is returned as [`ServiceError::Setup`].
    pub async fn trigger(&self, event: PushEvent) -> ServiceResult<TriggerOutcome> {
        let branch = event.branch_name().to_string();
        let target = Target {
            repo: &event.repo,
            commit: &event.commit,
        };
        let staging = workspace::setup_dir(&self.workspace_root, &staging_label(&event.commit));

        info!(repo = %event.repo, commit = %event.commit, branch = %branch, "Received push");

        let workflows = match self
            .fetch_workflows(&event.clone_url, &staging, &event.commit, &branch)
            .await
        {
            Ok(workflows) => workflows,
            Err(err) => {
                discard(&staging).await;
                let record = NewPipeline::new(&event.repo, &event.commit, &branch)
                    .with_clone_url(&event.clone_url)
                    .with_status(PipelineStatus::Failure);
                let pipeline_id = self.store.create_pipeline(&record).await?;
                error!(pipeline_id, error = %err, "Pipeline setup failed");
                self.report(&target, CommitState::Failure, pipeline_id, setup_failure_description(&err))
                    .await;
                return Err(ServiceError::Setup {
                    pipeline_id,
                    source: Box::new(err),
                });
            }
        };

        let mut pipelines = Vec::with_capacity(workflows.len());
        let last = workflows.len().saturating_sub(1);

        for (index, workflow) in workflows.into_iter().enumerate() {
            let record = NewPipeline::new(&event.repo, &event.commit, &branch)
                .with_clone_url(&event.clone_url)
                .with_workflow(
                    workflow.name(),
                    Some(workflow.config_path().to_string_lossy().to_string()),
                );
            let pipeline_id = self.store.create_pipeline(&record).await?;
            let workspace = workspace::pipeline_dir(&self.workspace_root, pipeline_id);

            let placed = if index == last {
                workspace::relocate(&staging, &workspace).await
            } else {
                workspace::duplicate(&staging, &workspace).await
            };
            if let Err(e) = placed {
                discard(&staging).await;
                return Err(self.abort_setup(&target, pipeline_id, &workspace, e.into()).await);
            }

            self.launch(&target, pipeline_id, workflow, workspace).await?;
            pipelines.push(pipeline_id);
        }

        Ok(TriggerOutcome { pipelines })
    }

    /// Run an existing pipeline's workflow again as a new pipeline.
    ///
    /// The original records are never modified.
    pub async fn retry(&self, pipeline_id: PipelineId) -> ServiceResult<PipelineId> {
        let original = self
            .store
            .get_pipeline(pipeline_id)
            .await?
            .ok_or(ServiceError::PipelineNotFound(pipeline_id))?;
        let clone_url = original
            .clone_url
            .clone()
            .ok_or(ServiceError::MissingCloneUrl(pipeline_id))?;

        let retry_id = self
            .store
            .create_pipeline(&NewPipeline::retry_of(&original))
            .await?;
        warn!(
            pipeline_id = retry_id,
            original = pipeline_id,
            commit = %original.commit_sha,
            branch = %original.branch,
            "Retry re-fetches the source; it may differ from the original run if the branch moved"
        );

        let target = Target {
            repo: &original.repo,
            commit: &original.commit_sha,
        };
        let workspace = workspace::pipeline_dir(&self.workspace_root, retry_id);

        let fetched = self
            .fetcher
            .fetch(
                &clone_url,
                &workspace,
                &original.commit_sha,
                Some(original.branch.as_str()).filter(|b| !b.is_empty()),
            )
            .await
            .map_err(ServiceError::from);

        let workflow = fetched.and_then(|()| {
            select_workflow(&workspace, original.config_path.as_deref(), &original.workflow_name)
                .map_err(ServiceError::from)
        });

        match workflow {
            Ok(workflow) => {
                self.launch(&target, retry_id, workflow, workspace).await?;
                Ok(retry_id)
            }
            Err(err) => Err(self.abort_setup(&target, retry_id, &workspace, err).await),
        }
    }

    async fn fetch_workflows(
        &self,
        clone_url: &str,
        destination: &Path,
        commit: &str,
        branch: &str,
    ) -> ServiceResult<Vec<WorkflowDefinition>> {
        let branch = Some(branch).filter(|b| !b.is_empty());
        self.fetcher
            .fetch(clone_url, destination, commit, branch)
            .await?;
        Ok(ConfigParser::discover(destination)?)
    }

    /// Create job records, announce the run and hand it to the spawner
    async fn launch(
        &self,
        target: &Target<'_>,
        pipeline_id: PipelineId,
        workflow: WorkflowDefinition,
        workspace: PathBuf,
    ) -> ServiceResult<()> {
        self.orchestrator
            .ensure_job_records(pipeline_id, workflow.execution_order())
            .await?;
        self.report(target, CommitState::Pending, pipeline_id, "Pipeline queued")
            .await;

        info!(
            pipeline_id,
            workflow = workflow.name(),
            jobs = workflow.execution_order().len(),
            "Pipeline queued"
        );

        let orchestrator = Arc::clone(&self.orchestrator);
        self.spawner.spawn(Box::pin(async move {
            if let Err(e) = orchestrator.run(pipeline_id, &workflow, &workspace).await {
                error!(pipeline_id, error = %e, "Pipeline run aborted by a storage error");
            }
        }));
        Ok(())
    }

    /// Mark a pipeline failed before any job ran
    async fn abort_setup(
        &self,
        target: &Target<'_>,
        pipeline_id: PipelineId,
        workspace: &Path,
        err: ServiceError,
    ) -> ServiceError {
        error!(pipeline_id, error = %err, "Pipeline setup failed");
        discard(workspace).await;

        if let Err(e) = self
            .store
            .update_pipeline_status(pipeline_id, PipelineStatus::Failure)
            .await
        {
            return e.into();
        }
        self.report(target, CommitState::Failure, pipeline_id, setup_failure_description(&err))
            .await;

        ServiceError::Setup {
            pipeline_id,
            source: Box::new(err),
        }
    }

    async fn report(
        &self,
        target: &Target<'_>,
        state: CommitState,
        pipeline_id: PipelineId,
        description: &str,
    ) {
        if let Some(notifier) = self.orchestrator.notifier() {
            notify(
                notifier.as_ref(),
                state,
                target.repo,
                target.commit,
                pipeline_id,
                description,
            )
            .await;
        }
    }
}

/// Pick the workflow a retry should run.
///
/// A stored config path is loaded directly. Otherwise the tree is
/// discovered and matched by name; a lone workflow always matches.
fn select_workflow(
    repo_root: &Path,
    config_path: Option<&str>,
    workflow_name: &str,
) -> Result<WorkflowDefinition, ConfigError> {
    if let Some(path) = config_path {
        return ConfigParser::load(repo_root, Some(Path::new(path)));
    }

    let mut workflows = ConfigParser::discover(repo_root)?;
    if workflows.len() == 1 {
        return Ok(workflows.remove(0));
    }
    workflows
        .into_iter()
        .find(|workflow| workflow.name() == workflow_name)
        .ok_or_else(|| {
            ConfigError::missing(format!(
                "Workflow '{}' is no longer defined in the repository",
                workflow_name
            ))
        })
}

fn setup_failure_description(err: &ServiceError) -> &'static str {
    match err {
        ServiceError::Fetch(_) => "Repository fetch failed",
        ServiceError::Config(_) => "Pipeline configuration invalid",
        _ => "Unexpected pipeline setup error",
    }
}

/// Unique name for a staging directory
fn staging_label(commit: &str) -> String {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);
    let short: String = commit
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(12)
        .collect();
    format!(
        "{}-{}-{}",
        short,
        Utc::now().timestamp_millis(),
        SEQUENCE.fetch_add(1, Ordering::Relaxed)
    )
}

async fn discard(path: &Path) {
    if let Err(e) = workspace::remove(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove workspace");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_name_strips_ref_prefix() {
        let event = PushEvent::new("a/b", "url", "abc", "refs/heads/feature/x");
        assert_eq!(event.branch_name(), "feature/x");

        let event = PushEvent::new("a/b", "url", "abc", "main");
        assert_eq!(event.branch_name(), "main");

        let event = PushEvent::new("a/b", "url", "abc", "refs/tags/v1");
        assert_eq!(event.branch_name(), "refs/tags/v1");
    }

    #[test]
    fn test_staging_labels_are_unique() {
        let a = staging_label("0123456789abcdef0123");
        let b = staging_label("0123456789abcdef0123");
        assert_ne!(a, b);
        assert!(a.starts_with("0123456789ab-"));
    }

    #[test]
    fn test_setup_failure_descriptions() {
        let config = ServiceError::Config(ConfigError::missing("none"));
        assert_eq!(setup_failure_description(&config), "Pipeline configuration invalid");

        let io = ServiceError::Workspace(std::io::Error::other("disk"));
        assert_eq!(setup_failure_description(&io), "Unexpected pipeline setup error");
    }

    #[test]
    fn test_select_workflow_by_stored_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".kiln")).unwrap();
        std::fs::write(
            dir.path().join(".kiln/ci.yml"),
            "jobs:\n  lint:\n    docker:\n      - image: alpine\n    steps:\n      - run: echo lint\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join(".kiln/nightly.yml"),
            "jobs:\n  soak:\n    docker:\n      - image: alpine\n    steps:\n      - run: echo soak\n",
        )
        .unwrap();

        let workflow = select_workflow(dir.path(), Some(".kiln/nightly.yml"), "nightly").unwrap();
        assert_eq!(workflow.execution_order(), ["soak".to_string()]);

        let workflow = select_workflow(dir.path(), None, "ci").unwrap();
        assert_eq!(workflow.name(), "ci");

        let err = select_workflow(dir.path(), None, "release").unwrap_err();
        assert_eq!(err.kind, crate::config::ConfigErrorKind::MissingConfig);
    }
}
