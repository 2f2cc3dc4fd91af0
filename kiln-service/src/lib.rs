// Kiln Service Library
// Workflow parsing, dependency resolution and pipeline orchestration

pub mod config;
pub mod error;
pub mod execution;
pub mod fetch;
pub mod notifier;
pub mod runners;
pub mod service;
pub mod settings;
pub mod spawn;
pub mod store;
pub mod workspace;

// Re-export commonly used types
pub use error::{ServiceError, ServiceResult};

// Re-export config types
pub use config::{
    resolve_order, ConfigError, ConfigErrorKind, ConfigParser, ConfigResult, JobSpec, StepSpec,
    WorkflowDefinition,
};

// Re-export execution types
pub use execution::{
    progress_channel, ExecutionEvent, Orchestrator, ProgressReceiver, ProgressSender,
};

// Re-export runner types
pub use runners::{ContainerConfig, ContainerRunner, Runner, RunnerError, RunnerResult};

// Re-export collaborator contracts
pub use fetch::{FetchError, GitFetcher, SourceFetcher};
pub use notifier::{LogNotifier, StatusNotifier};
pub use spawn::{TaskSpawner, TokioSpawner};
pub use store::{
    JobRun, JobStatus, NewPipeline, PipelineId, PipelineRun, PipelineStatus, SqliteStore, Store,
    StoreError,
};

pub use service::{PipelineService, PushEvent, TriggerOutcome};
pub use settings::EngineSettings;
