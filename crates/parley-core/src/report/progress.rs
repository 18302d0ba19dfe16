//! Run progress, emitted by the runner once per finished test in completion
//! order. The console layer consumes it through a sink.

use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub done: usize,
    pub total: usize,
    pub test_name: String,
    pub passed: bool,
}

/// Called by the runner's aggregation loop, never concurrently.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;
