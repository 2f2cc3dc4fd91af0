// Status Notifier
// Best-effort commit status reporting for pipeline runs

use crate::store::PipelineId;

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{info, warn};

/// Commit status a notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Pending,
    Success,
    Failure,
}

impl CommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitState::Pending => "pending",
            CommitState::Success => "success",
            CommitState::Failure => "failure",
        }
    }
}

/// Reports pipeline status against a commit.
///
/// Each call returns whether the status was published. Callers treat
/// every call as best-effort.
#[async_trait::async_trait]
pub trait StatusNotifier: Send + Sync {
    async fn report_pending(
        &self,
        repo: &str,
        commit: &str,
        pipeline_id: PipelineId,
        description: &str,
    ) -> bool;

    async fn report_success(
        &self,
        repo: &str,
        commit: &str,
        pipeline_id: PipelineId,
        description: &str,
    ) -> bool;

    async fn report_failure(
        &self,
        repo: &str,
        commit: &str,
        pipeline_id: PipelineId,
        description: &str,
    ) -> bool;
}

/// Notifier that records statuses in the log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl LogNotifier {
    fn record(&self, state: CommitState, repo: &str, commit: &str, pipeline_id: PipelineId, description: &str) -> bool {
        info!(
            repo,
            commit,
            pipeline_id,
            state = state.as_str(),
            "{}",
            description
        );
        true
    }
}

#[async_trait::async_trait]
impl StatusNotifier for LogNotifier {
    async fn report_pending(&self, repo: &str, commit: &str, pipeline_id: PipelineId, description: &str) -> bool {
        self.record(CommitState::Pending, repo, commit, pipeline_id, description)
    }

    async fn report_success(&self, repo: &str, commit: &str, pipeline_id: PipelineId, description: &str) -> bool {
        self.record(CommitState::Success, repo, commit, pipeline_id, description)
    }

    async fn report_failure(&self, repo: &str, commit: &str, pipeline_id: PipelineId, description: &str) -> bool {
        self.record(CommitState::Failure, repo, commit, pipeline_id, description)
    }
}

/// Send one notification, swallowing rejections and panics
pub async fn notify(
    notifier: &dyn StatusNotifier,
    state: CommitState,
    repo: &str,
    commit: &str,
    pipeline_id: PipelineId,
    description: &str,
) {
    let call = async {
        match state {
            CommitState::Pending => notifier.report_pending(repo, commit, pipeline_id, description).await,
            CommitState::Success => notifier.report_success(repo, commit, pipeline_id, description).await,
            CommitState::Failure => notifier.report_failure(repo, commit, pipeline_id, description).await,
        }
    };

    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(true) => {}
        Ok(false) => warn!(
            pipeline_id,
            state = state.as_str(),
            "Status notification was not delivered"
        ),
        Err(_) => warn!(
            pipeline_id,
            state = state.as_str(),
            "Status notifier panicked; continuing"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Panicking;

    #[async_trait::async_trait]
    impl StatusNotifier for Panicking {
        async fn report_pending(&self, _: &str, _: &str, _: PipelineId, _: &str) -> bool {
            panic!("pending exploded")
        }
        async fn report_success(&self, _: &str, _: &str, _: PipelineId, _: &str) -> bool {
            false
        }
        async fn report_failure(&self, _: &str, _: &str, _: PipelineId, _: &str) -> bool {
            panic!("failure exploded")
        }
    }

    struct Counting(AtomicUsize);

    #[async_trait::async_trait]
    impl StatusNotifier for Counting {
        async fn report_pending(&self, _: &str, _: &str, _: PipelineId, _: &str) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
        async fn report_success(&self, _: &str, _: &str, _: PipelineId, _: &str) -> bool {
            self.0.fetch_add(10, Ordering::SeqCst);
            true
        }
        async fn report_failure(&self, _: &str, _: &str, _: PipelineId, _: &str) -> bool {
            self.0.fetch_add(100, Ordering::SeqCst);
            true
        }
    }

    #[tokio::test]
    async fn test_notify_swallows_panics_and_rejections() {
        let notifier = Panicking;
        notify(&notifier, CommitState::Pending, "r", "c", 1, "x").await;
        notify(&notifier, CommitState::Success, "r", "c", 1, "x").await;
        notify(&notifier, CommitState::Failure, "r", "c", 1, "x").await;
    }

    #[tokio::test]
    async fn test_notify_dispatches_by_state() {
        let notifier = Counting(AtomicUsize::new(0));
        notify(&notifier, CommitState::Pending, "r", "c", 1, "x").await;
        notify(&notifier, CommitState::Failure, "r", "c", 1, "x").await;
        assert_eq!(notifier.0.load(Ordering::SeqCst), 101);
    }

    #[tokio::test]
    async fn test_log_notifier_reports_delivered() {
        let notifier = LogNotifier;
        assert!(notifier.report_success("r", "c", 3, "Pipeline succeeded (1 jobs)").await);
    }
}
