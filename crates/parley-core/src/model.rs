use crate::conversation::Conversation;
use crate::errors::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::ops::AddAssign;

pub const DEFAULT_MAX_TURNS: u32 = 2;

/// One scripted conversation test. Immutable once the suite is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Test {
    pub name: String,
    pub steps: Vec<String>,
    pub expected_results: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_prompt: Option<String>,
    pub max_turns: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<String>,
}

impl Test {
    pub fn new(
        name: impl Into<String>,
        steps: Vec<String>,
        expected_results: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            steps,
            expected_results,
            initial_prompt: None,
            max_turns: DEFAULT_MAX_TURNS,
            hook: None,
        }
    }

    pub fn with_initial_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.initial_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_hook(mut self, hook: impl Into<String>) -> Self {
        self.hook = Some(hook.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidTest {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.steps.is_empty() {
            return Err(invalid("at least one step is required"));
        }
        if self.max_turns == 0 {
            return Err(invalid("max_turns must be positive"));
        }
        Ok(())
    }
}

/// Validated collection of uniquely named tests, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSuite {
    tests: Vec<Test>,
}

impl TestSuite {
    pub fn new(tests: Vec<Test>) -> Result<Self, ConfigError> {
        if tests.is_empty() {
            return Err(ConfigError::EmptySuite);
        }
        let mut seen = HashSet::new();
        for test in &tests {
            test.validate()?;
            if !seen.insert(test.name.as_str()) {
                return Err(ConfigError::DuplicateTest(test.name.clone()));
            }
        }
        Ok(Self { tests })
    }

    /// Build a suite and keep only the tests named in a comma-separated `filter`.
    pub fn with_filter(tests: Vec<Test>, filter: Option<&str>) -> Result<Self, ConfigError> {
        let suite = Self::new(tests)?;
        match filter {
            Some(f) => suite.filtered(f),
            None => Ok(suite),
        }
    }

    pub fn filtered(self, filter: &str) -> Result<Self, ConfigError> {
        let names = parse_filter(filter);
        if names.is_empty() {
            return Ok(self);
        }
        for name in &names {
            if self.get(name).is_none() {
                return Err(ConfigError::UnknownTest(name.clone()));
            }
        }
        let tests = self
            .tests
            .into_iter()
            .filter(|t| names.contains(&t.name))
            .collect();
        Self::new(tests)
    }

    pub fn get(&self, name: &str) -> Option<&Test> {
        self.tests.iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Test> {
        self.tests.iter()
    }

    pub fn tests(&self) -> &[Test] {
        &self.tests
    }
}

fn parse_filter(filter: &str) -> Vec<String> {
    filter
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_name: String,
    pub passed: bool,
    pub result: String,
    pub reasoning: String,
    pub conversation: Conversation,
    #[serde(default)]
    pub usage: TokenUsage,
    /// Set when the test could not be judged (remote failure, timeout, panic).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl TestResult {
    pub fn errored(
        test_name: impl Into<String>,
        error: impl Into<String>,
        conversation: Conversation,
        usage: TokenUsage,
        start_time: DateTime<Utc>,
    ) -> Self {
        let error = error.into();
        Self {
            test_name: test_name.into(),
            passed: false,
            result: format!("Test errored: {}", error),
            reasoning: String::new(),
            conversation,
            usage,
            error: Some(error),
            start_time,
            end_time: Utc::now(),
        }
    }

    pub fn turns(&self) -> u32 {
        self.conversation.turns()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Percentage of passing tests, rounded to two decimals.
pub fn pass_rate(pass_count: usize, num_tests: usize) -> f64 {
    if num_tests == 0 {
        return 0.0;
    }
    let pct = pass_count as f64 / num_tests as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

/// One execution of a test suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub tests: Vec<Test>,
    pub results: BTreeMap<String, TestResult>,
}

impl Run {
    pub fn num_tests(&self) -> usize {
        self.results.len()
    }

    pub fn pass_count(&self) -> usize {
        self.results.values().filter(|r| r.passed).count()
    }

    pub fn fail_count(&self) -> usize {
        self.num_tests() - self.pass_count()
    }

    pub fn pass_rate(&self) -> f64 {
        pass_rate(self.pass_count(), self.num_tests())
    }

    pub fn usage(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for r in self.results.values() {
            total += r.usage;
        }
        total
    }
}
