// CLI commands and the composition root they share

pub mod list;
pub mod retry;
pub mod run;
pub mod show;
pub mod validate;

use crate::output;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;

use kiln_service::execution::{progress_channel, ExecutionEvent, ProgressReceiver};
use kiln_service::store::{JobStatus, PipelineId, PipelineStatus, SqliteStore, Store};
use kiln_service::{
    ContainerRunner, EngineSettings, GitFetcher, LogNotifier, Orchestrator, PipelineService,
    TokioSpawner,
};

/// Engine settings shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    /// Run database URL (default: sqlite database in the user data directory)
    #[arg(long, global = true, env = "KILN_DATABASE_URL", value_name = "URL")]
    pub database_url: Option<String>,

    /// Directory for per-pipeline workspaces
    #[arg(long, global = true, env = "KILN_WORKSPACE_ROOT", value_name = "DIR")]
    pub workspace_root: Option<PathBuf>,

    /// Container runtime binary
    #[arg(long, global = true, env = "KILN_DOCKER", value_name = "BIN")]
    pub docker: Option<String>,

    /// Target platform passed to the container runtime (e.g. linux/amd64)
    #[arg(long, global = true, env = "KILN_PLATFORM", value_name = "PLATFORM")]
    pub platform: Option<String>,

    /// Fail a job that runs longer than this many seconds
    #[arg(long = "job-timeout", global = true, env = "KILN_JOB_TIMEOUT_SECS", value_name = "SECS")]
    pub job_timeout_secs: Option<u64>,

    /// Token for cloning private repositories
    #[arg(long, global = true, env = "KILN_GITHUB_TOKEN", hide_env_values = true, value_name = "TOKEN")]
    pub github_token: Option<String>,
}

impl SettingsArgs {
    pub fn resolve(&self) -> EngineSettings {
        let defaults = EngineSettings::default();
        EngineSettings {
            database_url: self.database_url.clone().unwrap_or(defaults.database_url),
            workspace_root: self.workspace_root.clone().unwrap_or(defaults.workspace_root),
            docker_binary: self.docker.clone().unwrap_or(defaults.docker_binary),
            platform: self.platform.clone(),
            job_timeout: self
                .job_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            github_token: self.github_token.clone(),
        }
    }
}

/// Open the run database, creating its directory for file URLs
pub async fn open_store(settings: &EngineSettings) -> Result<Arc<SqliteStore>> {
    if let Some(path) = sqlite_file(&settings.database_url) {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).wrap_err_with(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
    }

    let store = SqliteStore::connect(&settings.database_url)
        .await
        .wrap_err_with(|| format!("Failed to open database {}", settings.database_url))?;
    Ok(Arc::new(store))
}

/// File path behind a sqlite URL, if it names a file
fn sqlite_file(url: &str) -> Option<PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path.contains(":memory:") {
        return None;
    }
    Some(PathBuf::from(path))
}

/// Everything a triggering command needs, wired once
pub struct Engine {
    pub store: Arc<SqliteStore>,
    pub service: PipelineService,
    pub spawner: Arc<TokioSpawner>,
}

impl Engine {
    pub async fn build(settings: &EngineSettings) -> Result<(Self, ProgressReceiver)> {
        let store = open_store(settings).await?;

        let runner = ContainerRunner::with_config(settings.container_config());
        if !runner.is_available().await {
            output::warning(&format!(
                "Container runtime '{}' is not available; jobs will fail",
                settings.docker_binary
            ));
        }

        let (tx, rx) = progress_channel();
        let orchestrator = Orchestrator::new(store.clone(), Arc::new(runner))
            .with_notifier(Arc::new(LogNotifier))
            .with_progress(tx);

        std::fs::create_dir_all(&settings.workspace_root).wrap_err_with(|| {
            format!(
                "Failed to create workspace root {}",
                settings.workspace_root.display()
            )
        })?;

        let spawner = Arc::new(TokioSpawner::new());
        let fetcher = GitFetcher::new().with_token(settings.github_token.clone());
        let service = PipelineService::new(
            orchestrator,
            Arc::new(fetcher),
            spawner.clone(),
            settings.workspace_root.clone(),
        );

        Ok((
            Self {
                store,
                service,
                spawner,
            },
            rx,
        ))
    }

    /// Render progress until every scheduled run finishes.
    ///
    /// Returns whether all `pipelines` succeeded.
    pub async fn follow(self, mut rx: ProgressReceiver, pipelines: &[PipelineId]) -> Result<bool> {
        let renderer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                render_event(&event);
            }
        });

        self.spawner.wait_idle().await;
        let store = self.store.clone();
        // closes the progress channel
        drop(self);
        renderer.await?;

        let mut all_succeeded = true;
        for id in pipelines {
            let Some(pipeline) = store.get_pipeline(*id).await? else {
                continue;
            };
            if pipeline.status == PipelineStatus::Success {
                continue;
            }
            all_succeeded = false;
            for job in store.list_jobs(*id).await? {
                if job.status == JobStatus::Failure {
                    output::header(&format!("Log of job '{}' (pipeline #{})", job.job_name, id));
                    print_log(job.log.as_deref().unwrap_or_default());
                }
            }
        }
        Ok(all_succeeded)
    }
}

fn render_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::PipelineStarted {
            pipeline_id,
            workflow,
            total_jobs,
        } => {
            println!();
            output::header(&format!(
                "Pipeline #{} '{}' ({} jobs)",
                pipeline_id, workflow, total_jobs
            ));
        }

        ExecutionEvent::JobStarted {
            job_name, image, ..
        } => {
            println!("    Job '{}' [{}]", job_name, image);
        }

        ExecutionEvent::JobCompleted {
            job_name,
            status,
            duration,
            exit_code,
            ..
        } => {
            let exit_info = match exit_code {
                Some(code) if *code != 0 => format!(" (exit code: {})", code),
                _ => String::new(),
            };
            let line = format!(
                "    Job '{}' {} ({:.2}s){}",
                job_name,
                if *status == JobStatus::Success { "OK" } else { "FAIL" },
                duration.as_secs_f64(),
                exit_info
            );
            if *status == JobStatus::Success {
                output::dim_success(&line);
            } else {
                output::dim_failure(&line);
            }
        }

        ExecutionEvent::JobSkipped {
            job_name, reason, ..
        } => {
            output::warning(&format!("    Job '{}' skipped: {}", job_name, reason));
        }

        ExecutionEvent::PipelineCompleted {
            pipeline_id,
            status,
            duration,
        } => {
            if *status == PipelineStatus::Success {
                output::success(&format!(
                    "Pipeline #{} succeeded in {:.2}s",
                    pipeline_id,
                    duration.as_secs_f64()
                ));
            } else {
                output::failure(&format!(
                    "Pipeline #{} failed after {:.2}s",
                    pipeline_id,
                    duration.as_secs_f64()
                ));
            }
        }
    }
}

pub fn print_log(log: &str) {
    if log.is_empty() {
        output::dim("        (no output)");
        return;
    }
    for line in log.lines() {
        output::step_output(line);
    }
}

/// Paths are shown relative to the current directory when possible
pub fn display_path(path: &Path) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| path.strip_prefix(cwd).ok().map(Path::to_path_buf))
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}
