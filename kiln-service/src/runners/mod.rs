// Runners Module
// Execution of one job inside an isolated environment

pub mod container;

pub use container::{ContainerConfig, ContainerRunner};

use crate::config::JobSpec;

use std::path::Path;
use thiserror::Error;

/// Outcome of executing one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerResult {
    /// Whether every step succeeded
    pub success: bool,
    /// Combined log: metadata lines interleaved with captured stdout/stderr
    pub output: String,
    /// Exit code of the execution mechanism, when one was produced
    pub exit_code: Option<i32>,
}

impl RunnerResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            exit_code: Some(0),
        }
    }

    pub fn failure(output: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            success: false,
            output: output.into(),
            exit_code,
        }
    }

    pub fn from_exit(output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            success: exit_code == 0,
            output: output.into(),
            exit_code: Some(exit_code),
        }
    }
}

/// The execution mechanism itself faulted (as opposed to a job failing)
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("{0}")]
    Fault(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Executes a job's steps inside a prepared workspace.
///
/// Job failures are reported through [`RunnerResult::success`]; an `Err`
/// means the runner could not execute at all.
#[async_trait::async_trait]
pub trait Runner: Send + Sync {
    async fn execute(&self, job: &JobSpec, workspace: &Path) -> Result<RunnerResult, RunnerError>;
}
