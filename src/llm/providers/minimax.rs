//! MiniMax backend, OpenAI-compatible chat completions against a different
//! base URL and credential variable.
//!
//! Corresponds to `_call_minimax` in `providers/__init__.py`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::llm::{error::LlmError, Provider};

const DEFAULT_MODEL: &str = "MiniMax-Text-01";
const ENDPOINT: &str = "https://api.minimax.chat/v1/text/chatcompletion_v2";

#[derive(Debug)]
pub struct MiniMaxProvider {
    client: Client,
}

impl MiniMaxProvider {
    pub fn new() -> Self {
        MiniMaxProvider { client: Client::new() }
    }
}

impl Default for MiniMaxProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MiniMaxProvider {
    fn name(&self) -> &'static str {
        "minimax"
    }

    async fn call(&self, prompt: &str, model: Option<&str>) -> Result<String, LlmError> {
        let api_key = std::env::var("MINIMAX_API_KEY").map_err(|_| LlmError::NotConfigured {
            provider: "minimax",
            var: "MINIMAX_API_KEY",
        })?;
        let model = model
            .map(str::to_string)
            .or_else(|| std::env::var("LLM_MODEL").ok())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": "You output only valid JSON matching the required schema. Do not include any text before or after the JSON."},
                {"role": "user", "content": prompt},
            ],
            "temperature": 0.2,
        });

        let response = self
            .client
            .post(ENDPOINT)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|source| classify(source, "minimax"))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited { provider: "minimax", retry_after_ms: None });
        }

        let payload: serde_json::Value = response
            .error_for_status()
            .map_err(|source| classify(source, "minimax"))?
            .json()
            .await
            .map_err(|source| classify(source, "minimax"))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LlmError::UnexpectedResponse {
                provider: "minimax",
                detail: "missing choices[0].message.content".to_string(),
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
