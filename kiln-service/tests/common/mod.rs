// Shared test doubles for orchestrator and service tests
#![allow(dead_code)]

use kiln_service::config::{ConfigParser, JobSpec, WorkflowDefinition};
use kiln_service::fetch::{FetchError, SourceFetcher};
use kiln_service::notifier::StatusNotifier;
use kiln_service::runners::{Runner, RunnerError, RunnerResult};
use kiln_service::store::{PipelineId, SqliteStore};
use kiln_service::workspace;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub async fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::in_memory().await.unwrap())
}

pub fn workflow(yaml: &str) -> WorkflowDefinition {
    ConfigParser::parse(yaml, Path::new(".kiln/ci.yml")).unwrap()
}

/// `build` then `test` (requires build)
pub const BUILD_TEST: &str = r#"
jobs:
  build:
    docker:
      - image: rust:1.80
    steps:
      - checkout
      - run: cargo build
  test:
    docker:
      - image: rust:1.80
    steps:
      - checkout
      - run: cargo test
workflows:
  version: 2
  ci:
    jobs:
      - build
      - test:
          requires: [build]
"#;

/// `build`, `test` and `deploy`, chained
pub const THREE_STAGE: &str = r#"
jobs:
  deploy:
    docker: [{image: alpine}]
    steps: [{run: ./deploy.sh}]
  test:
    docker: [{image: alpine}]
    steps: [{run: make test}]
  build:
    docker: [{image: alpine}]
    steps: [checkout, {run: make}]
workflows:
  release:
    jobs:
      - build
      - test:
          requires: [build]
      - deploy:
          requires: [test]
"#;

pub const LINT: &str = r#"
jobs:
  lint:
    docker:
      - image: alpine
    steps:
      - run: echo lint
"#;

/// What the scripted runner does for one job
#[derive(Debug, Clone)]
pub enum Script {
    Pass(String),
    Fail(String, i32),
    Fault(String),
    Panic,
}

/// Runner that replays scripted outcomes and records what it ran
#[derive(Default)]
pub struct ScriptedRunner {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<(String, PathBuf, bool)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, job: &str, script: Script) -> Self {
        self.scripts.insert(job.to_string(), script);
        self
    }

    /// Job names in the order they were executed
    pub fn executed(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _, _)| name.clone())
            .collect()
    }

    /// Whether the workspace existed at each call
    pub fn saw_workspace(&self) -> Vec<bool> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, exists)| *exists)
            .collect()
    }
}

#[async_trait::async_trait]
impl Runner for ScriptedRunner {
    async fn execute(&self, job: &JobSpec, workspace: &Path) -> Result<RunnerResult, RunnerError> {
        self.calls.lock().unwrap().push((
            job.name.clone(),
            workspace.to_path_buf(),
            workspace.exists(),
        ));

        match self.scripts.get(&job.name) {
            None => Ok(RunnerResult::success(format!("[job] {}\nok\n", job.name))),
            Some(Script::Pass(output)) => Ok(RunnerResult::success(output.clone())),
            Some(Script::Fail(output, code)) => {
                Ok(RunnerResult::from_exit(output.clone(), *code))
            }
            Some(Script::Fault(message)) => Err(RunnerError::Fault(message.clone())),
            Some(Script::Panic) => panic!("runner exploded"),
        }
    }
}

/// One received notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub state: &'static str,
    pub repo: String,
    pub commit: String,
    pub pipeline_id: PipelineId,
    pub description: String,
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn for_pipeline(&self, pipeline_id: PipelineId) -> Vec<(&'static str, String)> {
        self.notices()
            .into_iter()
            .filter(|n| n.pipeline_id == pipeline_id)
            .map(|n| (n.state, n.description))
            .collect()
    }

    fn record(&self, state: &'static str, repo: &str, commit: &str, pipeline_id: PipelineId, description: &str) -> bool {
        self.notices.lock().unwrap().push(Notice {
            state,
            repo: repo.to_string(),
            commit: commit.to_string(),
            pipeline_id,
            description: description.to_string(),
        });
        true
    }
}

#[async_trait::async_trait]
impl StatusNotifier for RecordingNotifier {
    async fn report_pending(&self, repo: &str, commit: &str, id: PipelineId, description: &str) -> bool {
        self.record("pending", repo, commit, id, description)
    }

    async fn report_success(&self, repo: &str, commit: &str, id: PipelineId, description: &str) -> bool {
        self.record("success", repo, commit, id, description)
    }

    async fn report_failure(&self, repo: &str, commit: &str, id: PipelineId, description: &str) -> bool {
        self.record("failure", repo, commit, id, description)
    }
}

/// Notifier that rejects pending and panics on terminal statuses
pub struct FailingNotifier;

#[async_trait::async_trait]
impl StatusNotifier for FailingNotifier {
    async fn report_pending(&self, _: &str, _: &str, _: PipelineId, _: &str) -> bool {
        false
    }

    async fn report_success(&self, _: &str, _: &str, _: PipelineId, _: &str) -> bool {
        panic!("status service unavailable")
    }

    async fn report_failure(&self, _: &str, _: &str, _: PipelineId, _: &str) -> bool {
        panic!("status service unavailable")
    }
}

/// Fetcher that copies a local directory; `clone_url` is ignored
pub struct LocalFetcher {
    source: Mutex<PathBuf>,
    fail: Mutex<bool>,
    fetches: Mutex<Vec<(String, PathBuf, String, Option<String>)>>,
}

impl LocalFetcher {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: Mutex::new(source.into()),
            fail: Mutex::new(false),
            fetches: Mutex::new(Vec::new()),
        }
    }

    /// Serve a different tree from now on, as if the branch moved
    pub fn set_source(&self, source: impl Into<PathBuf>) {
        *self.source.lock().unwrap() = source.into();
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    /// `(clone_url, destination, commit, branch)` per call
    pub fn fetches(&self) -> Vec<(String, PathBuf, String, Option<String>)> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SourceFetcher for LocalFetcher {
    async fn fetch(
        &self,
        clone_url: &str,
        destination: &Path,
        commit: &str,
        branch: Option<&str>,
    ) -> Result<(), FetchError> {
        self.fetches.lock().unwrap().push((
            clone_url.to_string(),
            destination.to_path_buf(),
            commit.to_string(),
            branch.map(str::to_string),
        ));

        if *self.fail.lock().unwrap() {
            return Err(FetchError::Command {
                message: "Failed to clone repository".to_string(),
                details: "fatal: repository not found".to_string(),
            });
        }

        let source = self.source.lock().unwrap().clone();
        workspace::duplicate(&source, destination).await?;
        Ok(())
    }
}

/// Write a repository tree with the given `.kiln` files
pub fn repo_with_configs(root: &Path, files: &[(&str, &str)]) -> PathBuf {
    let config_dir = root.join(".kiln");
    std::fs::create_dir_all(&config_dir).unwrap();
    for (name, content) in files {
        std::fs::write(config_dir.join(name), content).unwrap();
    }
    std::fs::write(root.join("README.md"), "# fixture\n").unwrap();
    root.to_path_buf()
}
