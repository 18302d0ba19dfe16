use crate::conversation::Conversation;
use crate::errors::ConfigError;
use crate::evaluator::{EvaluatorFactory, RunLimits};
use crate::model::{Run, Test, TestResult, TestSuite, TokenUsage};
use crate::providers::target::TargetFactory;
use crate::report::progress::{ProgressEvent, ProgressSink};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;

/// Upper bound on concurrent tests when the caller doesn't pick one.
pub const GLOBAL_MAX_WORKERS: usize = 45;

pub const CANCELLED_FAIL_FAST: &str = "cancelled (fail-fast)";

/// `None` means one worker per test, capped at [`GLOBAL_MAX_WORKERS`].
pub fn resolve_concurrency(requested: Option<usize>, num_tests: usize) -> Result<usize, ConfigError> {
    match requested {
        Some(0) => Err(ConfigError::ZeroConcurrency),
        Some(n) => Ok(n),
        None => Ok(num_tests.clamp(1, GLOBAL_MAX_WORKERS)),
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub concurrency: Option<usize>,
    /// Stop scheduling and cancel in-flight tests after the first failure.
    pub fail_fast: bool,
    pub test_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub results: BTreeMap<String, TestResult>,
    pub fail_count: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl RunOutcome {
    pub fn passed(&self) -> bool {
        self.fail_count == 0
    }

    pub fn into_run(self, suite: &TestSuite) -> Run {
        Run {
            start_time: self.start_time,
            end_time: self.end_time,
            tests: suite.tests().to_vec(),
            results: self.results,
        }
    }
}

pub struct Runner {
    evaluators: EvaluatorFactory,
    targets: TargetFactory,
    options: RunOptions,
    progress: Option<ProgressSink>,
}

impl Runner {
    pub fn new(evaluators: EvaluatorFactory, targets: TargetFactory) -> Self {
        Self {
            evaluators,
            targets,
            options: RunOptions::default(),
            progress: None,
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Run every test in the suite. Each test gets its own target and
    /// evaluator; a failing, erroring or panicking test only affects its own
    /// result. Results are keyed by test name; progress is reported in
    /// completion order.
    pub async fn run(&self, suite: &TestSuite) -> Result<RunOutcome, ConfigError> {
        let total = suite.len();
        let workers = resolve_concurrency(self.options.concurrency, total)?;
        self.evaluators.validate(suite)?;

        let start_time = Utc::now();
        tracing::info!(tests = total, workers, "starting run");

        let sem = Arc::new(Semaphore::new(workers));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut join_set = JoinSet::new();
        let mut names = HashMap::new();

        for test in suite.iter() {
            let test = test.clone();
            let name = test.name.clone();
            let sem = sem.clone();
            let evaluators = self.evaluators.clone();
            let targets = self.targets.clone();
            let limits = RunLimits {
                timeout: self.options.test_timeout,
                cancel: Some(cancel_rx.clone()),
                cancel_reason: Some(CANCELLED_FAIL_FAST.to_string()),
            };
            let span = tracing::info_span!("test", test_name = %name);

            let handle = join_set.spawn(
                async move {
                    let Ok(_permit) = sem.acquire_owned().await else {
                        return cancelled(&test.name);
                    };
                    run_test(test, evaluators, targets, limits).await
                }
                .instrument(span),
            );
            names.insert(handle.id(), name);
        }

        let mut results = BTreeMap::new();
        let mut fail_count = 0;
        let mut stopping = false;

        while let Some(joined) = join_set.join_next_with_id().await {
            let (name, result) = match joined {
                Ok((id, result)) => {
                    let name = names
                        .remove(&id)
                        .unwrap_or_else(|| result.test_name.clone());
                    (name, result)
                }
                Err(e) => {
                    let name = names.remove(&e.id()).unwrap_or_default();
                    (name.clone(), join_error_result(name, e))
                }
            };

            if !result.passed {
                fail_count += 1;
                if self.options.fail_fast && !stopping {
                    tracing::warn!(test = %name, "fail-fast: cancelling remaining tests");
                    stopping = true;
                    sem.close();
                    cancel_tx.send_replace(true);
                }
            }
            tracing::info!(
                test = %name,
                passed = result.passed,
                turns = result.turns(),
                "test finished"
            );

            if let Some(sink) = &self.progress {
                sink(ProgressEvent {
                    done: results.len() + 1,
                    total,
                    test_name: name.clone(),
                    passed: result.passed,
                });
            }
            results.insert(name, result);
        }

        Ok(RunOutcome {
            results,
            fail_count,
            start_time,
            end_time: Utc::now(),
        })
    }
}

async fn run_test(
    test: Test,
    evaluators: EvaluatorFactory,
    targets: TargetFactory,
    limits: RunLimits,
) -> TestResult {
    let start_time = Utc::now();
    let errored = |msg: String| {
        TestResult::errored(
            test.name.clone(),
            msg,
            Conversation::new(),
            TokenUsage::default(),
            start_time,
        )
    };

    let target = match targets() {
        Ok(t) => t,
        Err(e) => return errored(format!("failed to create target: {:#}", e)),
    };
    let evaluator = match evaluators.create(&test, target) {
        Ok(ev) => ev,
        Err(e) => return errored(e.to_string()),
    };

    match evaluator.run_with(limits).await {
        Ok(result) => result,
        Err(e) => {
            let msg = e.to_string();
            tracing::warn!(test = %test.name, error = %msg, "test errored");
            TestResult::errored(test.name.clone(), msg, e.conversation, e.usage, start_time)
        }
    }
}

fn cancelled(test_name: &str) -> TestResult {
    TestResult::errored(
        test_name,
        CANCELLED_FAIL_FAST,
        Conversation::new(),
        TokenUsage::default(),
        Utc::now(),
    )
}

fn join_error_result(test_name: String, err: JoinError) -> TestResult {
    if err.is_cancelled() {
        return cancelled(&test_name);
    }
    let detail = match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string()),
        Err(e) => e.to_string(),
    };
    tracing::error!(test = %test_name, panic = %detail, "test task panicked");
    TestResult::errored(
        test_name,
        format!("panicked: {}", detail),
        Conversation::new(),
        TokenUsage::default(),
        Utc::now(),
    )
}
