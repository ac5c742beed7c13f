use thiserror::Error;

/// Failures the runner can hit before it has enough to build an envelope at
/// all (module resolution, or a bug in prompt assembly). Everything past
/// that point — transport, parse, and schema failures — is represented as
/// an `Envelope::Failure` with a matching error code instead of this type,
/// since those are exactly the outcomes the envelope format exists to
/// describe.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("failed to assemble prompt: {0}")]
    PromptAssembly(#[from] crate::prompt::PromptError),
}

impl RunnerError {
    pub fn error_code(&self) -> &'static str {
        match self {
            RunnerError::ModuleNotFound(_) => "MODULE_NOT_FOUND",
            RunnerError::PromptAssembly(_) => "UNKNOWN",
        }
    }
}
