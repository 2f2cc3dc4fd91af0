// Execution Events
// Progress reporting for pipeline runs

use crate::store::{JobStatus, PipelineId, PipelineStatus};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted while a pipeline runs
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Pipeline moved to running
    PipelineStarted {
        pipeline_id: PipelineId,
        workflow: String,
        total_jobs: usize,
    },

    /// Pipeline reached a terminal status
    PipelineCompleted {
        pipeline_id: PipelineId,
        status: PipelineStatus,
        duration: Duration,
    },

    /// Job handed to the runner
    JobStarted {
        pipeline_id: PipelineId,
        job_name: String,
        image: String,
    },

    /// Job finished with success or failure
    JobCompleted {
        pipeline_id: PipelineId,
        job_name: String,
        status: JobStatus,
        duration: Duration,
        exit_code: Option<i32>,
    },

    /// Job was skipped after an earlier failure
    JobSkipped {
        pipeline_id: PipelineId,
        job_name: String,
        reason: String,
    },
}

impl ExecutionEvent {
    pub fn pipeline_started(pipeline_id: PipelineId, workflow: impl Into<String>, total_jobs: usize) -> Self {
        Self::PipelineStarted {
            pipeline_id,
            workflow: workflow.into(),
            total_jobs,
        }
    }

    pub fn pipeline_completed(pipeline_id: PipelineId, status: PipelineStatus, duration: Duration) -> Self {
        Self::PipelineCompleted {
            pipeline_id,
            status,
            duration,
        }
    }

    pub fn job_started(pipeline_id: PipelineId, job_name: impl Into<String>, image: impl Into<String>) -> Self {
        Self::JobStarted {
            pipeline_id,
            job_name: job_name.into(),
            image: image.into(),
        }
    }

    pub fn job_completed(
        pipeline_id: PipelineId,
        job_name: impl Into<String>,
        status: JobStatus,
        duration: Duration,
        exit_code: Option<i32>,
    ) -> Self {
        Self::JobCompleted {
            pipeline_id,
            job_name: job_name.into(),
            status,
            duration,
            exit_code,
        }
    }

    pub fn job_skipped(pipeline_id: PipelineId, job_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::JobSkipped {
            pipeline_id,
            job_name: job_name.into(),
            reason: reason.into(),
        }
    }

    /// Pipeline the event belongs to
    pub fn pipeline_id(&self) -> PipelineId {
        match self {
            Self::PipelineStarted { pipeline_id, .. }
            | Self::PipelineCompleted { pipeline_id, .. }
            | Self::JobStarted { pipeline_id, .. }
            | Self::JobCompleted { pipeline_id, .. }
            | Self::JobSkipped { pipeline_id, .. } => *pipeline_id,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
