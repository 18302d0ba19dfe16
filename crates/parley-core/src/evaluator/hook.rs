//! Optional per-test callbacks around an evaluation.

use crate::errors::ConfigError;
use crate::model::{Test, TestResult, TestSuite};
use crate::trace::TraceRecorder;
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

#[async_trait]
pub trait Hook: Send + Sync {
    /// Runs before the first turn. An error fails the test.
    async fn pre_evaluate(&self, _test: &Test, _trace: &mut TraceRecorder) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs after the verdict. `Some` replaces the result.
    async fn post_evaluate(
        &self,
        _test: &Test,
        _result: &TestResult,
        _trace: &mut TraceRecorder,
    ) -> anyhow::Result<Option<TestResult>> {
        Ok(None)
    }
}

/// Records the final transcript and verdict as a trace step.
pub struct TranscriptHook;

#[async_trait]
impl Hook for TranscriptHook {
    async fn post_evaluate(
        &self,
        _test: &Test,
        result: &TestResult,
        trace: &mut TraceRecorder,
    ) -> anyhow::Result<Option<TestResult>> {
        trace.add_step(
            "transcript",
            json!({
                "passed": result.passed,
                "turns": result.turns(),
                "transcript": result.conversation.transcript(),
            }),
        );
        Ok(None)
    }
}

#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: BTreeMap<String, Arc<dyn Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut r = Self::new();
        r.register("transcript", Arc::new(TranscriptHook));
        r
    }

    pub fn register(&mut self, key: impl Into<String>, hook: Arc<dyn Hook>) {
        self.hooks.insert(key.into(), hook);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Hook>> {
        self.hooks.get(key).cloned()
    }

    /// Hook for `test`, if it names one.
    pub fn resolve(&self, test: &Test) -> Result<Option<Arc<dyn Hook>>, ConfigError> {
        match &test.hook {
            None => Ok(None),
            Some(key) => self
                .get(key)
                .map(Some)
                .ok_or_else(|| ConfigError::UnknownHook {
                    key: key.clone(),
                    test: test.name.clone(),
                }),
        }
    }

    pub fn validate(&self, suite: &TestSuite) -> Result<(), ConfigError> {
        for test in suite.iter() {
            self.resolve(test)?;
        }
        Ok(())
    }
}
