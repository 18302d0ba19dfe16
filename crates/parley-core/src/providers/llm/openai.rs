use super::{Completion, JudgeClient, JudgeSettings};
use crate::errors::{ConfigError, ProviderError};
use crate::model::TokenUsage;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

const PROVIDER: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Judge backed by any OpenAI-compatible chat completions endpoint.
pub struct OpenAiJudge {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiJudge {
    pub fn new(settings: &JudgeSettings, api_key: String) -> Result<Self, ConfigError> {
        let base = settings.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| ConfigError::InvalidEvaluator(e.to_string()))?;
        Ok(Self {
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            endpoint: format!("{}/chat/completions", base.trim_end_matches('/')),
            api_key,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(&self, system: &str, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        })
    }
}

fn parse_completion(json: &Value) -> Result<Completion, ProviderError> {
    let text = json
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::fatal(PROVIDER, "response missing choices[0].message.content"))?
        .to_string();
    let tokens = |p: &str| json.pointer(p).and_then(Value::as_u64).unwrap_or(0);
    Ok(Completion {
        text,
        usage: TokenUsage {
            input_tokens: tokens("/usage/prompt_tokens"),
            output_tokens: tokens("/usage/completion_tokens"),
        },
    })
}

#[async_trait]
impl JudgeClient for OpenAiJudge {
    async fn complete(&self, system: &str, prompt: &str) -> Result<Completion, ProviderError> {
        tracing::debug!(model = %self.model, endpoint = %self.endpoint, "judge request");
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(system, prompt))
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
        parse_completion(&json)
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}
