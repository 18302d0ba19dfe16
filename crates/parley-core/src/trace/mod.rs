//! Per-test audit trail of prompts, completions and judge reasoning.
//!
//! A [`TraceRecorder`] is owned by exactly one evaluation. It is wrapped in a
//! [`TraceGuard`] so the recorded steps reach the [`TraceSink`] once, on every
//! exit path: normal completion, error return, timeout or task abort.

pub mod sink;

pub use sink::{JsonFileTraceSink, MemoryTraceSink, TraceSink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub step_name: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// Flushed form of a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceDocument {
    pub test_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub steps: Vec<TraceStep>,
}

#[derive(Debug)]
pub struct TraceRecorder {
    test_name: String,
    start_time: DateTime<Utc>,
    steps: Vec<TraceStep>,
}

impl TraceRecorder {
    pub fn new(test_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            start_time: Utc::now(),
            steps: Vec::new(),
        }
    }

    pub fn add_step(&mut self, step_name: impl Into<String>, data: serde_json::Value) {
        self.steps.push(TraceStep {
            step_name: step_name.into(),
            timestamp: Utc::now(),
            data,
        });
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub fn into_document(self) -> TraceDocument {
        TraceDocument {
            test_name: self.test_name,
            start_time: self.start_time,
            end_time: Utc::now(),
            steps: self.steps,
        }
    }
}

/// Scoped owner of a recorder; flushes to the sink when finished or dropped.
pub struct TraceGuard {
    recorder: Option<TraceRecorder>,
    sink: Arc<dyn TraceSink>,
}

impl TraceGuard {
    pub fn open(test_name: impl Into<String>, sink: Arc<dyn TraceSink>) -> Self {
        Self {
            recorder: Some(TraceRecorder::new(test_name)),
            sink,
        }
    }

    /// Flush now instead of waiting for drop. On a multi-threaded runtime the
    /// sink's blocking I/O runs via `block_in_place`.
    pub fn finish(mut self) {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.flush());
            }
            _ => self.flush(),
        }
    }

    fn flush(&mut self) {
        let Some(recorder) = self.recorder.take() else {
            return;
        };
        let doc = recorder.into_document();
        if let Err(e) = self.sink.flush(&doc) {
            tracing::warn!(test = %doc.test_name, error = %e, "failed to flush trace");
        }
    }
}

impl Deref for TraceGuard {
    type Target = TraceRecorder;

    fn deref(&self) -> &TraceRecorder {
        // Only `finish`/`drop` take the recorder, and both consume the guard.
        self.recorder
            .as_ref()
            .expect("trace recorder present until the guard is consumed")
    }
}

impl DerefMut for TraceGuard {
    fn deref_mut(&mut self) -> &mut TraceRecorder {
        self.recorder
            .as_mut()
            .expect("trace recorder present until the guard is consumed")
    }
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        self.flush();
    }
}
