//! The `~/.cognitive/installed.json` provenance manifest.
//!
//! Corresponds to `_record_module_source`/`get_installed_module_info` in
//! `registry.py`. Writes are atomic (write to a sibling temp file, then
//! rename), a deliberate hardening over the original's plain `json.dump` —
//! see `DESIGN.md`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::RegistryError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledEntry {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub installed_at: String,
    pub installed_time: String,
}

pub type InstalledManifest = HashMap<String, InstalledEntry>;

pub fn manifest_path(user_root: &Path) -> PathBuf {
    user_root
        .parent()
        .unwrap_or(user_root)
        .join("installed.json")
}

pub fn load(path: &Path) -> InstalledManifest {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|contents| serde_json::from_str(&contents).ok())
        .unwrap_or_default()
}

/// Writes the manifest atomically: serialize to a temp file in the same
/// directory, then rename over the target so a crash mid-write never leaves
/// a truncated `installed.json`.
pub fn save(path: &Path, manifest: &InstalledManifest) -> Result<(), RegistryError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, manifest)?;
    tmp.persist(path).map_err(|e| RegistryError::Io(e.error))?;
    Ok(())
}

pub fn record_source(
    manifest_path: &Path,
    name: &str,
    source: &Path,
    github_url: Option<String>,
    module_path: Option<String>,
    tag: Option<String>,
    branch: Option<String>,
    version: Option<String>,
    installed_at: &Path,
) -> Result<(), RegistryError> {
    let mut manifest = load(manifest_path);
    manifest.insert(
        name.to_string(),
        InstalledEntry {
            source: source.display().to_string(),
            github_url,
            module_path,
            tag,
            branch,
            version,
            installed_at: installed_at.display().to_string(),
            installed_time: chrono::Utc::now().to_rfc3339(),
        },
    );
    save(manifest_path, &manifest)
}
