//! Plan file (`parley.yml`): judge settings, target settings and the tests.

use crate::errors::ConfigError;
use crate::model::{Test, TestSuite, DEFAULT_MAX_TURNS};
use crate::providers::llm::{JudgeClient, JudgeSettings};
use crate::providers::target::{TargetFactory, TargetRegistry};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const PLAN_FILE_NAME: &str = "parley.yml";

pub const SAMPLE_PLAN: &str = r#"evaluator:
  provider: openai
  model: gpt-4o-mini
  api_key_env: OPENAI_API_KEY

target:
  type: http
  url: http://localhost:8080/chat
  response_pointer: /response

tests:
  retrieve_missing_documents:
    steps:
      - Ask the agent which documents are still missing for claim 12345.
    expected_results:
      - The agent lists the missing documents for claim 12345.
    max_turns: 2
"#;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PlanConfig {
    pub evaluator: JudgeSettings,
    pub target: TargetSettings,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Test name to definition, in file order.
    pub tests: serde_yaml::Mapping,
}

/// `type` picks the adapter; the remaining keys are its config.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetSettings {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TestConfig {
    steps: Vec<String>,
    #[serde(default)]
    expected_results: Vec<String>,
    #[serde(default)]
    initial_prompt: Option<String>,
    #[serde(default)]
    max_turns: Option<u32>,
    #[serde(default)]
    hook: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub path: PathBuf,
    pub config: PlanConfig,
}

impl Plan {
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(PLAN_FILE_NAME)
    }

    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let path = Self::path_in(dir);
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, path: PathBuf) -> Result<Self, ConfigError> {
        let config = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "plan loaded");
        Ok(Self { path, config })
    }

    /// Write the sample plan into `dir`. Never overwrites.
    pub fn init(dir: &Path) -> Result<PathBuf, ConfigError> {
        let path = Self::path_in(dir);
        if path.exists() {
            return Err(ConfigError::PlanExists(path.display().to_string()));
        }
        let write_err = |source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        };
        std::fs::create_dir_all(dir).map_err(write_err)?;
        std::fs::write(&path, SAMPLE_PLAN).map_err(write_err)?;
        Ok(path)
    }

    pub fn tests(&self) -> Result<Vec<Test>, ConfigError> {
        let mut tests = Vec::with_capacity(self.config.tests.len());
        for (key, value) in &self.config.tests {
            let name = key.as_str().ok_or_else(|| ConfigError::InvalidTest {
                name: format!("{:?}", key),
                reason: "test names must be strings".into(),
            })?;
            let cfg: TestConfig =
                serde_yaml::from_value(value.clone()).map_err(|e| ConfigError::InvalidTest {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
            tests.push(Test {
                name: name.to_string(),
                steps: cfg.steps,
                expected_results: cfg.expected_results,
                initial_prompt: cfg.initial_prompt,
                max_turns: cfg.max_turns.unwrap_or(DEFAULT_MAX_TURNS),
                hook: cfg.hook,
            });
        }
        Ok(tests)
    }

    /// Validated suite, optionally reduced to a comma-separated name filter.
    pub fn test_suite(&self, filter: Option<&str>) -> Result<TestSuite, ConfigError> {
        TestSuite::with_filter(self.tests()?, filter)
    }

    pub fn judge(&self) -> Result<Arc<dyn JudgeClient>, ConfigError> {
        self.config.evaluator.build(&self.config.retry)
    }

    pub fn target_factory(&self, registry: &TargetRegistry) -> Result<TargetFactory, ConfigError> {
        let target = &self.config.target;
        registry.factory(
            &target.kind,
            Value::Object(target.config.clone()),
            self.config.retry.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPTED: &str = r#"
evaluator:
  provider: scripted
target:
  type: scripted
  replies: ["Your balance is 42."]
retry:
  max_attempts: 3
tests:
  zeta:
    steps: [Ask for the balance.]
    expected_results: [A balance is returned.]
  alpha:
    steps: [Ask for the balance.]
    expected_results: [A balance is returned.]
    initial_prompt: What's my balance?
    max_turns: 4
    hook: transcript
"#;

    fn plan(text: &str) -> Plan {
        Plan::parse(text, PathBuf::from(PLAN_FILE_NAME)).unwrap()
    }

    #[test]
    fn tests_keep_file_order_and_defaults() {
        let tests = plan(SCRIPTED).tests().unwrap();
        let names: Vec<_> = tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(tests[0].max_turns, DEFAULT_MAX_TURNS);
        assert_eq!(tests[1].initial_prompt.as_deref(), Some("What's my balance?"));
        assert_eq!(tests[1].max_turns, 4);
        assert_eq!(tests[1].hook.as_deref(), Some("transcript"));
    }

    #[test]
    fn retry_section_overrides_defaults() {
        let p = plan(SCRIPTED);
        assert_eq!(p.config.retry.max_attempts, 3);
        assert_eq!(p.config.retry.max_elapsed_ms, 300_000);
    }

    #[test]
    fn target_keys_pass_through_without_type() {
        let p = plan(SCRIPTED);
        assert_eq!(p.config.target.kind, "scripted");
        assert!(p.config.target.config.contains_key("replies"));
        assert!(!p.config.target.config.contains_key("type"));
        assert!(p.target_factory(&TargetRegistry::with_builtins()).is_ok());
    }

    #[test]
    fn filter_reduces_suite() {
        let suite = plan(SCRIPTED).test_suite(Some(" alpha ,")).unwrap();
        assert_eq!(suite.len(), 1);
        assert!(suite.get("alpha").is_some());
        assert!(matches!(
            plan(SCRIPTED).test_suite(Some("gamma")),
            Err(ConfigError::UnknownTest(_))
        ));
    }

    #[test]
    fn unknown_test_field_is_rejected() {
        let text = SCRIPTED.replace("max_turns: 4", "max_turn: 4");
        assert!(matches!(
            plan(&text).tests(),
            Err(ConfigError::InvalidTest { .. })
        ));
    }

    #[test]
    fn unknown_top_level_field_is_rejected() {
        let text = format!("{}\nworkers: 3\n", SCRIPTED);
        assert!(matches!(
            Plan::parse(&text, PathBuf::from(PLAN_FILE_NAME)),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn empty_steps_are_rejected_at_suite_build() {
        let text = SCRIPTED.replace("steps: [Ask for the balance.]\n    expected_results: [A balance is returned.]\n  alpha", "steps: []\n  alpha");
        assert!(matches!(
            plan(&text).test_suite(None),
            Err(ConfigError::InvalidTest { .. })
        ));
    }

    #[test]
    fn init_writes_sample_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = Plan::init(dir.path()).unwrap();
        let loaded = Plan::load(dir.path()).unwrap();
        assert_eq!(loaded.path, path);
        assert_eq!(loaded.test_suite(None).unwrap().len(), 1);
        assert!(matches!(Plan::init(dir.path()), Err(ConfigError::PlanExists(_))));
    }
}
