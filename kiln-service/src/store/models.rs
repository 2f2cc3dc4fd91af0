use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

pub type PipelineId = i64;
pub type JobId = i64;

/// Status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PipelineStatus {
    Pending,
    Running,
    Success,
    Failure,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Pending => "pending",
            PipelineStatus::Running => "running",
            PipelineStatus::Success => "success",
            PipelineStatus::Failure => "failure",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStatus::Success | PipelineStatus::Failure)
    }

    /// Statuses a pipeline may move to `self` from.
    ///
    /// `pending -> failure` covers runs whose setup (fetch or configuration)
    /// failed before any job started.
    pub fn predecessors(&self) -> &'static [PipelineStatus] {
        match self {
            PipelineStatus::Pending => &[],
            PipelineStatus::Running => &[PipelineStatus::Pending],
            PipelineStatus::Success => &[PipelineStatus::Running],
            PipelineStatus::Failure => &[PipelineStatus::Pending, PipelineStatus::Running],
        }
    }

    pub fn can_transition_to(&self, next: PipelineStatus) -> bool {
        next.predecessors().contains(self)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Status of a job run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failure,
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
            JobStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failure | JobStatus::Skipped
        )
    }

    /// Statuses a job may move to `self` from
    pub fn predecessors(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Pending => &[],
            JobStatus::Running => &[JobStatus::Pending],
            JobStatus::Success | JobStatus::Failure => &[JobStatus::Running],
            JobStatus::Skipped => &[JobStatus::Pending],
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        next.predecessors().contains(self)
    }

    /// Whether reaching this status stamps `finished_at`
    pub fn stamps_finish(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One triggered execution of a workflow against one commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PipelineRun {
    pub id: PipelineId,
    pub repo: String,
    pub clone_url: Option<String>,
    pub commit_sha: String,
    pub branch: String,
    pub workflow_name: String,
    pub config_path: Option<String>,
    pub status: PipelineStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Execution record of one job belonging to a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct JobRun {
    pub id: JobId,
    pub pipeline_id: PipelineId,
    pub job_name: String,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub log: Option<String>,
}

/// Fields supplied when recording a new pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPipeline {
    pub repo: String,
    pub clone_url: Option<String>,
    pub commit_sha: String,
    pub branch: String,
    pub workflow_name: String,
    pub config_path: Option<String>,
    pub status: PipelineStatus,
}

impl NewPipeline {
    pub fn new(
        repo: impl Into<String>,
        commit_sha: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            repo: repo.into(),
            clone_url: None,
            commit_sha: commit_sha.into(),
            branch: branch.into(),
            workflow_name: "default".to_string(),
            config_path: None,
            status: PipelineStatus::Pending,
        }
    }

    pub fn with_clone_url(mut self, clone_url: impl Into<String>) -> Self {
        self.clone_url = Some(clone_url.into());
        self
    }

    pub fn with_workflow(mut self, name: impl Into<String>, config_path: Option<String>) -> Self {
        self.workflow_name = name.into();
        self.config_path = config_path;
        self
    }

    pub fn with_status(mut self, status: PipelineStatus) -> Self {
        self.status = status;
        self
    }

    /// Same repo/commit/branch/workflow identity as an existing run
    pub fn retry_of(run: &PipelineRun) -> Self {
        Self {
            repo: run.repo.clone(),
            clone_url: run.clone_url.clone(),
            commit_sha: run.commit_sha.clone(),
            branch: run.branch.clone(),
            workflow_name: run.workflow_name.clone(),
            config_path: run.config_path.clone(),
            status: PipelineStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_transitions() {
        use PipelineStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Failure));
        assert!(Running.can_transition_to(Success));
        assert!(Running.can_transition_to(Failure));
        assert!(!Pending.can_transition_to(Success));
        assert!(!Success.can_transition_to(Running));
        assert!(!Failure.can_transition_to(Success));
        assert!(!Running.can_transition_to(Pending));
    }

    #[test]
    fn test_job_transitions() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Skipped));
        assert!(Running.can_transition_to(Success));
        assert!(Running.can_transition_to(Failure));
        assert!(!Running.can_transition_to(Skipped));
        assert!(!Pending.can_transition_to(Success));
        assert!(!Skipped.can_transition_to(Running));
        assert!(!Success.can_transition_to(Failure));
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(PipelineStatus::Failure.to_string(), "failure");
        assert_eq!(JobStatus::Skipped.to_string(), "skipped");
        assert!(JobStatus::Skipped.is_terminal());
        assert!(!JobStatus::Skipped.stamps_finish());
    }
}
