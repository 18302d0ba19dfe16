use super::{parse_config, Target, TargetResponse};
use crate::errors::{ConfigError, ProviderError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const PROVIDER: &str = "scripted-target";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ScriptedConfig {
    replies: Vec<String>,
    fail_with: Option<String>,
    delay_ms: u64,
}

/// Offline agent. Cycles through canned replies, or echoes the message when
/// it has none.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTarget {
    replies: Vec<String>,
    calls: usize,
    fail_with: Option<String>,
    transient_failures: u32,
    delay: Duration,
}

impl ScriptedTarget {
    pub fn echo() -> Self {
        Self::default()
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: replies.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Every call fails with a non-retryable error.
    pub fn failing(detail: impl Into<String>) -> Self {
        Self {
            fail_with: Some(detail.into()),
            ..Self::default()
        }
    }

    /// The first `failures` calls fail transiently, then `reply` is returned.
    pub fn transient_then(failures: u32, reply: impl Into<String>) -> Self {
        Self {
            transient_failures: failures,
            ..Self::with_replies([reply.into()])
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn from_config(config: &Value) -> Result<Self, ConfigError> {
        let cfg: ScriptedConfig = parse_config("scripted", config)?;
        Ok(Self {
            replies: cfg.replies,
            fail_with: cfg.fail_with,
            delay: Duration::from_millis(cfg.delay_ms),
            ..Self::default()
        })
    }
}

#[async_trait]
impl Target for ScriptedTarget {
    async fn invoke(&mut self, message: &str) -> Result<TargetResponse, ProviderError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(detail) = &self.fail_with {
            return Err(ProviderError::fatal(PROVIDER, detail.clone()));
        }
        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            return Err(ProviderError::transient(PROVIDER, "temporarily unavailable"));
        }
        let call = self.calls;
        self.calls += 1;
        let response = if self.replies.is_empty() {
            message.to_string()
        } else {
            self.replies[call % self.replies.len()].clone()
        };
        Ok(TargetResponse {
            response,
            data: Some(json!({ "call": call })),
        })
    }
}
