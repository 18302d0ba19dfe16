//! The agent under test and the registry that builds it from plan config.

pub mod http;
pub mod scripted;

use crate::errors::{ConfigError, ProviderError};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub use http::HttpTarget;
pub use scripted::ScriptedTarget;

#[derive(Debug, Clone, PartialEq)]
pub struct TargetResponse {
    pub response: String,
    /// Adapter-specific extras, recorded in the trace.
    pub data: Option<Value>,
}

impl TargetResponse {
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            data: None,
        }
    }
}

/// One conversation with the agent. A fresh instance is built for every test,
/// so implementations may keep session state.
#[async_trait]
pub trait Target: Send + Sync {
    async fn invoke(&mut self, message: &str) -> Result<TargetResponse, ProviderError>;
}

pub struct RetryingTarget {
    inner: Box<dyn Target>,
    policy: RetryPolicy,
}

impl RetryingTarget {
    pub fn new(inner: Box<dyn Target>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Target for RetryingTarget {
    async fn invoke(&mut self, message: &str) -> Result<TargetResponse, ProviderError> {
        let mut backoff = self.policy.backoff();
        loop {
            match self.inner.invoke(message).await {
                Ok(r) => return Ok(r),
                Err(e) => tokio::time::sleep(backoff.retry_after(e)?).await,
            }
        }
    }
}

pub type TargetConstructor =
    Arc<dyn Fn(&Value) -> Result<Box<dyn Target>, ConfigError> + Send + Sync>;

/// Builds a fresh target per test.
pub type TargetFactory = Arc<dyn Fn() -> anyhow::Result<Box<dyn Target>> + Send + Sync>;

/// Maps a plan's `target.type` to a constructor.
#[derive(Clone, Default)]
pub struct TargetRegistry {
    constructors: BTreeMap<String, TargetConstructor>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut r = Self::new();
        r.register("http", |cfg| Ok(Box::new(HttpTarget::from_config(cfg)?) as Box<dyn Target>));
        r.register("scripted", |cfg| {
            Ok(Box::new(ScriptedTarget::from_config(cfg)?) as Box<dyn Target>)
        });
        r
    }

    pub fn register<F>(&mut self, key: impl Into<String>, constructor: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Target>, ConfigError> + Send + Sync + 'static,
    {
        self.constructors.insert(key.into(), Arc::new(constructor));
    }

    pub fn keys(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn create(&self, key: &str, config: &Value) -> Result<Box<dyn Target>, ConfigError> {
        let ctor = self.lookup(key)?;
        ctor(config)
    }

    /// Resolve `key` into a per-test factory whose targets retry transient
    /// failures. One target is built up front so bad config fails the run
    /// before any test starts.
    pub fn factory(
        &self,
        key: &str,
        config: Value,
        retry: RetryPolicy,
    ) -> Result<TargetFactory, ConfigError> {
        let ctor = self.lookup(key)?;
        ctor(&config)?;
        Ok(Arc::new(move || {
            let inner = ctor(&config)?;
            Ok(Box::new(RetryingTarget::new(inner, retry.clone())) as Box<dyn Target>)
        }))
    }

    fn lookup(&self, key: &str) -> Result<TargetConstructor, ConfigError> {
        self.constructors
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownTarget {
                key: key.to_string(),
                known: self.keys().join(", "),
            })
    }
}

/// Deserialize adapter config, mapping failures to [`ConfigError::InvalidTarget`].
pub(crate) fn parse_config<T: serde::de::DeserializeOwned>(
    kind: &str,
    config: &Value,
) -> Result<T, ConfigError> {
    let config = if config.is_null() {
        Value::Object(Default::default())
    } else {
        config.clone()
    };
    serde_json::from_value(config).map_err(|e| ConfigError::InvalidTarget(format!("{}: {}", kind, e)))
}
