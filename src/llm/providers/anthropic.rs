//! Anthropic Messages API backend.
//!
//! Corresponds to `_call_anthropic` in `providers/__init__.py`: reads
//! `ANTHROPIC_API_KEY`, defaults the model to `LLM_MODEL` or a Claude
//! Sonnet release, and sends the JSON-only instruction as the system prompt.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::llm::{error::LlmError, Provider};

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;

#[derive(Debug)]
pub struct AnthropicProvider {
    client: Client,
}

impl AnthropicProvider {
    pub fn new() -> Self {
        AnthropicProvider { client: Client::new() }
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn call(&self, prompt: &str, model: Option<&str>) -> Result<String, LlmError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| LlmError::NotConfigured {
            provider: "anthropic",
            var: "ANTHROPIC_API_KEY",
        })?;
        let model = model
            .map(str::to_string)
            .or_else(|| std::env::var("LLM_MODEL").ok())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let body = json!({
            "model": model,
            "max_tokens": MAX_TOKENS,
            "system": super::SYSTEM_PROMPT,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .client
            .post(ENDPOINT)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|source| classify(source, "anthropic"))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited { provider: "anthropic", retry_after_ms: None });
        }

        let payload: serde_json::Value = response
            .error_for_status()
            .map_err(|source| classify(source, "anthropic"))?
            .json()
            .await
            .map_err(|source| classify(source, "anthropic"))?;

        payload["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LlmError::UnexpectedResponse {
                provider: "anthropic",
                detail: "missing content[0].text".to_string(),
            })
    }
}

fn classify(source: reqwest::Error, provider: &'static str) -> LlmError {
    if source.is_timeout() {
        LlmError::Timeout { provider }
    } else {
        LlmError::Transport { provider, source }
    }
}
