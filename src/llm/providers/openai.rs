//! OpenAI chat-completions backend.
//!
//! Corresponds to `_call_openai` in `providers/__init__.py`: reads
//! `OPENAI_API_KEY`, defaults the model to `LLM_MODEL` or `gpt-4o`, and asks
//! for a JSON-object response.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::llm::{error::LlmError, Provider};

const DEFAULT_MODEL: &str = "gpt-4o";
const ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug)]
pub struct OpenAiProvider {
    client: Client,
}

impl OpenAiProvider {
    pub fn new() -> Self {
        OpenAiProvider { client: Client::new() }
    }
}

impl Default for OpenAiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn call(&self, prompt: &str, model: Option<&str>) -> Result<String, LlmError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| LlmError::NotConfigured {
            provider: "openai",
            var: "OPENAI_API_KEY",
        })?;
        let model = model
            .map(str::to_string)
            .or_else(|| std::env::var("LLM_MODEL").ok())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": super::SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "temperature": 0.2,
            "response_format": {"type": "json_object"},
        });

        let response = self
            .client
            .post(ENDPOINT)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|source| classify(source, "openai"))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            return Err(LlmError::RateLimited { provider: "openai", retry_after_ms });
        }

        let payload: serde_json::Value = response
            .error_for_status()
            .map_err(|source| classify(source, "openai"))?
            .json()
            .await
            .map_err(|source| classify(source, "openai"))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LlmError::UnexpectedResponse {
                provider: "openai",
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
