use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{provider}: required environment variable {var} is not set")]
    NotConfigured { provider: &'static str, var: &'static str },

    #[error("{provider}: request failed: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider}: rate limited")]
    RateLimited {
        provider: &'static str,
        retry_after_ms: Option<u64>,
    },

    #[error("{provider}: request timed out")]
    Timeout { provider: &'static str },

    #[error("{provider}: response did not contain the expected field: {detail}")]
    UnexpectedResponse { provider: &'static str, detail: String },
}

impl LlmError {
    /// The error-code string the runner stamps onto a failure envelope.
    pub fn error_code(&self) -> &'static str {
        match self {
            LlmError::RateLimited { .. } => "RATE_LIMITED",
            LlmError::Timeout { .. } => "TIMEOUT",
            _ => "LLM_ERROR",
        }
    }

    pub fn provider(&self) -> &'static str {
        match self {
            LlmError::NotConfigured { provider, .. }
            | LlmError::Transport { provider, .. }
            | LlmError::RateLimited { provider, .. }
            | LlmError::Timeout { provider }
            | LlmError::UnexpectedResponse { provider, .. } => provider,
        }
    }
}
