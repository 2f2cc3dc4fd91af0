// Engine Settings
// Runtime configuration shared by the service and the CLI

use crate::runners::ContainerConfig;

use std::path::PathBuf;
use std::time::Duration;

const APP_DIRECTORY: &str = "kiln";
const DATABASE_FILENAME: &str = "kiln.db";
const WORKSPACES_DIRECTORY: &str = "workspaces";

/// Runtime configuration of the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// sqlx connection URL of the run database
    pub database_url: String,
    /// Directory holding per-pipeline workspaces
    pub workspace_root: PathBuf,
    pub docker_binary: String,
    /// Target platform hint passed to the container runtime
    pub platform: Option<String>,
    /// Deadline for a single job
    pub job_timeout: Option<Duration>,
    /// Token used to clone private repositories
    pub github_token: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let base = Self::data_dir();
        Self {
            database_url: format!(
                "sqlite://{}",
                base.join(DATABASE_FILENAME).to_string_lossy()
            ),
            workspace_root: base.join(WORKSPACES_DIRECTORY),
            docker_binary: "docker".to_string(),
            platform: None,
            job_timeout: None,
            github_token: None,
        }
    }
}

impl EngineSettings {
    /// `<data_dir>/kiln`, falling back to `./data/kiln`
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("data"))
            .join(APP_DIRECTORY)
    }

    pub fn default_database_url() -> String {
        Self::default().database_url
    }

    pub fn default_workspace_root() -> PathBuf {
        Self::default().workspace_root
    }

    pub fn container_config(&self) -> ContainerConfig {
        ContainerConfig {
            docker_binary: self.docker_binary.clone(),
            platform: self.platform.clone(),
            timeout: self.job_timeout,
        }
    }
}
