pub mod openai;
pub mod scripted;

use crate::errors::{ConfigError, ProviderError};
use crate::model::TokenUsage;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub use openai::OpenAiJudge;
pub use scripted::ScriptedJudge;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// The language model that plays the user and grades the agent.
#[async_trait]
pub trait JudgeClient: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<Completion, ProviderError>;

    fn provider_name(&self) -> &'static str;
}

/// Retries transient judge failures with exponential backoff.
pub struct RetryingJudge {
    inner: Arc<dyn JudgeClient>,
    policy: RetryPolicy,
}

impl RetryingJudge {
    pub fn new(inner: Arc<dyn JudgeClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl JudgeClient for RetryingJudge {
    async fn complete(&self, system: &str, prompt: &str) -> Result<Completion, ProviderError> {
        let mut backoff = self.policy.backoff();
        loop {
            match self.inner.complete(system, prompt).await {
                Ok(c) => return Ok(c),
                Err(e) => tokio::time::sleep(backoff.retry_after(e)?).await,
            }
        }
    }

    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgeProvider {
    OpenAi,
    Scripted,
}

/// The `evaluator` section of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JudgeSettings {
    pub provider: JudgeProvider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Replies per template name, for the scripted provider.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub script: BTreeMap<String, Vec<String>>,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_timeout_secs() -> u64 {
    120
}

impl JudgeSettings {
    pub fn scripted() -> Self {
        Self {
            provider: JudgeProvider::Scripted,
            model: default_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            script: BTreeMap::new(),
        }
    }

    /// Build the configured judge, wrapped in retries.
    pub fn build(&self, retry: &RetryPolicy) -> Result<Arc<dyn JudgeClient>, ConfigError> {
        let inner: Arc<dyn JudgeClient> = match self.provider {
            JudgeProvider::OpenAi => {
                let api_key = std::env::var(&self.api_key_env).map_err(|_| {
                    ConfigError::InvalidEvaluator(format!(
                        "environment variable {} is not set",
                        self.api_key_env
                    ))
                })?;
                Arc::new(OpenAiJudge::new(self, api_key)?)
            }
            JudgeProvider::Scripted => Arc::new(ScriptedJudge::from_script(&self.script)?),
        };
        Ok(Arc::new(RetryingJudge::new(inner, retry.clone())))
    }
}
