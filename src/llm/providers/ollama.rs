//! Local Ollama backend.
//!
//! Corresponds to `_call_ollama` in `providers/__init__.py`: posts to
//! `OLLAMA_HOST` (default `http://localhost:11434`) with `format: "json"`
//! and no credential requirement.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::llm::{error::LlmError, Provider};

const DEFAULT_HOST: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.1";

#[derive(Debug)]
pub struct OllamaProvider {
    client: Client,
}

impl OllamaProvider {
    pub fn new() -> Self {
        OllamaProvider { client: Client::new() }
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn call(&self, prompt: &str, model: Option<&str>) -> Result<String, LlmError> {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let model = model
            .map(str::to_string)
            .or_else(|| std::env::var("LLM_MODEL").ok())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let body = json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
            "options": {"temperature": 0.2},
        });

        let response = self
            .client
            .post(format!("{host}/api/generate"))
            .json(&body)
            .send()
            .await
            .map_err(|source| classify(source))?;

        let payload: serde_json::Value = response
            .error_for_status()
            .map_err(|source| classify(source))?
            .json()
            .await
            .map_err(|source| classify(source))?;

        payload["response"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LlmError::UnexpectedResponse {
                provider: "ollama",
                detail: "missing response field".to_string(),
            })
    }
}

fn classify(source: reqwest::Error) -> LlmError {
    if source.is_timeout() {
        LlmError::Timeout { provider: "ollama" }
    } else {
        LlmError::Transport { provider: "ollama", source }
    }
}
