// Background Execution
// Submits pipeline runs as independent tasks

use futures::future::BoxFuture;
use tokio_util::task::TaskTracker;

/// Runs submitted work independently of the caller
pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

/// Spawns onto the current tokio runtime and tracks every task
#[derive(Debug, Clone, Default)]
pub struct TokioSpawner {
    tracker: TaskTracker,
}

impl TokioSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of submitted tasks still running
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every submitted task has finished.
    ///
    /// The tracker is reopened afterwards, so the spawner stays usable.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        self.tracker.spawn(task);
    }
}
