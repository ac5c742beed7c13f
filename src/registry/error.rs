use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("module not found: {0}")]
    NotFound(String),

    #[error("source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("not a valid module (missing module.yaml, MODULE.md, or module.md): {}", .0.display())]
    InvalidModule(PathBuf),

    #[error("invalid GitHub URL: {0}")]
    InvalidGithubUrl(String),

    #[error("module was not installed from GitHub, cannot update: {0}")]
    NotFromGithub(String),

    #[error("refusing to remove a module outside the user-global modules directory: {}", .0.display())]
    OutsideUserRoot(PathBuf),

    #[error("failed to download {ref_}: {source}")]
    Download {
        ref_: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("downloaded archive was empty")]
    EmptyArchive,

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
