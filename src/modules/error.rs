use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("module not found: {0}")]
    NotFound(String),

    #[error("unrecognized module format at {0}")]
    UnknownFormat(String),
}
