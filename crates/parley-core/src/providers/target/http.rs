use super::{parse_config, Target, TargetResponse};
use crate::errors::{ConfigError, ProviderError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

const PROVIDER: &str = "http-target";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpTargetConfig {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_message_field")]
    pub message_field: String,
    /// Request field carrying a per-test session id. `null` disables it.
    #[serde(default = "default_session_field")]
    pub session_field: Option<String>,
    /// JSON pointer to the reply text in the response body.
    #[serde(default = "default_response_pointer")]
    pub response_pointer: String,
    #[serde(default)]
    pub data_pointer: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_message_field() -> String {
    "message".to_string()
}

fn default_session_field() -> Option<String> {
    Some("session_id".to_string())
}

fn default_response_pointer() -> String {
    "/response".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

/// Agent exposed as a JSON-over-HTTP endpoint. Each instance is one session.
pub struct HttpTarget {
    config: HttpTargetConfig,
    session_id: String,
    client: reqwest::Client,
}

impl HttpTarget {
    pub fn from_config(config: &Value) -> Result<Self, ConfigError> {
        Self::new(parse_config("http", config)?)
    }

    pub fn new(config: HttpTargetConfig) -> Result<Self, ConfigError> {
        if !(config.url.starts_with("http://") || config.url.starts_with("https://")) {
            return Err(ConfigError::InvalidTarget(format!(
                "http: url must start with http:// or https://, got '{}'",
                config.url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::InvalidTarget(format!("http: {}", e)))?;
        Ok(Self {
            config,
            session_id: uuid::Uuid::new_v4().to_string(),
            client,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn request_body(&self, message: &str) -> Value {
        let mut body = Map::new();
        body.insert(self.config.message_field.clone(), Value::String(message.to_string()));
        if let Some(field) = &self.config.session_field {
            body.insert(field.clone(), Value::String(self.session_id.clone()));
        }
        Value::Object(body)
    }

    fn parse_response(&self, json: &Value) -> Result<TargetResponse, ProviderError> {
        let response = match json.pointer(&self.config.response_pointer) {
            Some(Value::String(s)) => s.clone(),
            Some(other) if !other.is_null() => other.to_string(),
            _ => {
                return Err(ProviderError::fatal(
                    PROVIDER,
                    format!("response has no value at {}", self.config.response_pointer),
                ))
            }
        };
        let data = self
            .config
            .data_pointer
            .as_deref()
            .and_then(|p| json.pointer(p))
            .cloned();
        Ok(TargetResponse { response, data })
    }
}

#[async_trait]
impl Target for HttpTarget {
    async fn invoke(&mut self, message: &str) -> Result<TargetResponse, ProviderError> {
        let mut req = self.client.post(&self.config.url).json(&self.request_body(message));
        for (k, v) in &self.config.headers {
            req = req.header(k, v);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, &e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(PROVIDER, status.as_u16(), body));
        }
        let json: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::fatal(PROVIDER, format!("invalid response body: {}", e)))?;
        self.parse_response(&json)
    }
}
