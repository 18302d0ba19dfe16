//! Error taxonomy for the engine.
//!
//! Remote collaborators (judge, target) report [`ProviderError`]; only the
//! transient variant is retried. Plan and suite problems are [`ConfigError`]s
//! and are fatal to the whole run before any test starts.

use thiserror::Error;

/// HTTP statuses treated as throttling or momentary unavailability.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 503)
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider}: transient failure: {detail}")]
    Transient {
        provider: String,
        status: Option<u16>,
        detail: String,
    },
    #[error("{provider}: {detail}")]
    Fatal {
        provider: String,
        status: Option<u16>,
        detail: String,
    },
    #[error("{provider}: giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        provider: String,
        attempts: u32,
        last: String,
    },
}

impl ProviderError {
    pub fn transient(provider: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Transient {
            provider: provider.into(),
            status: None,
            detail: detail.into(),
        }
    }

    pub fn fatal(provider: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Fatal {
            provider: provider.into(),
            status: None,
            detail: detail.into(),
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(provider: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        let provider = provider.into();
        let detail = format!("status {}: {}", status, body.into());
        if is_transient_status(status) {
            Self::Transient {
                provider,
                status: Some(status),
                detail,
            }
        } else {
            Self::Fatal {
                provider,
                status: Some(status),
                detail,
            }
        }
    }

    /// Connection and timeout failures are retried; everything else is fatal.
    pub fn from_reqwest(provider: impl Into<String>, err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(provider, status.as_u16(), err.to_string());
        }
        if err.is_timeout() || err.is_connect() {
            Self::transient(provider, err.to_string())
        } else {
            Self::fatal(provider, err.to_string())
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::Transient { provider, .. }
            | Self::Fatal { provider, .. }
            | Self::RetriesExhausted { provider, .. } => provider,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Fatal { status, .. } => *status,
            Self::RetriesExhausted { .. } => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read plan {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse plan {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("plan already exists at {0}")]
    PlanExists(String),
    #[error("test names must be unique: '{0}' is declared more than once")]
    DuplicateTest(String),
    #[error("invalid test '{name}': {reason}")]
    InvalidTest { name: String, reason: String },
    #[error("filter references unknown test '{0}'")]
    UnknownTest(String),
    #[error("test suite is empty")]
    EmptySuite,
    #[error("unknown target type '{key}' (registered: {known})")]
    UnknownTarget { key: String, known: String },
    #[error("invalid target config: {0}")]
    InvalidTarget(String),
    #[error("unknown hook '{key}' referenced by test '{test}'")]
    UnknownHook { key: String, test: String },
    #[error("invalid evaluator config: {0}")]
    InvalidEvaluator(String),
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
}

/// A store query matched nothing.
#[derive(Debug, Error)]
#[error("no record found: {0}")]
pub struct NoRecordFound(pub String);
