// Execution Engine Module
// Pipeline state machine and progress reporting

pub mod events;
pub mod orchestrator;

// Re-export key types
pub use events::{progress_channel, EventSender, ExecutionEvent, ProgressReceiver, ProgressSender};
pub use orchestrator::{cleanup_workspace, Orchestrator};
