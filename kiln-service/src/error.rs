// Service Errors
// Umbrella error for pipeline setup and retry

use crate::config::ConfigError;
use crate::fetch::FetchError;
use crate::runners::RunnerError;
use crate::store::{PipelineId, StoreError};

use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("pipeline {0} not found")]
    PipelineNotFound(PipelineId),

    #[error("pipeline {0} has no clone URL to fetch from")]
    MissingCloneUrl(PipelineId),

    #[error("workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    /// Setup failed after a pipeline record was written; the record is marked failure
    #[error("pipeline {pipeline_id} setup failed: {source}")]
    Setup {
        pipeline_id: PipelineId,
        source: Box<ServiceError>,
    },
}

impl ServiceError {
    /// Pipeline recorded as failed by this error, if any
    pub fn failed_pipeline(&self) -> Option<PipelineId> {
        match self {
            ServiceError::Setup { pipeline_id, .. } => Some(*pipeline_id),
            _ => None,
        }
    }

    /// Innermost cause, looking through setup wrappers
    pub fn root_cause(&self) -> &ServiceError {
        match self {
            ServiceError::Setup { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
