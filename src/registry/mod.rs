//! Module discovery, installation, and provenance tracking.
//!
//! Grounded on `original_source/src/cognitive/registry.py`. Search order is
//! project-local, then user-global, then (optionally) system-wide, with
//! `COGNITIVE_MODULES_PATH` entries prepended ahead of all of those. Install
//! sources are local paths and GitHub archives (no git binary dependency —
//! tags take priority over branches, and the module path is searched
//! as-given, under `cognitive/modules/`, and under `modules/`). The public
//! catalog is fetched with a short TTL cache and degrades to an empty
//! registry on failure rather than erroring the caller.

mod error;
mod manifest;

pub use error::RegistryError;
pub use manifest::{InstalledEntry, InstalledManifest};

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const SYSTEM_WIDE_PATH: &str = "/usr/local/share/cognitive/modules";
const DEFAULT_REGISTRY_URL: &str =
    "https://raw.githubusercontent.com/ziel-io/cognitive-modules/main/cognitive-registry.json";
const REGISTRY_CACHE_TTL: Duration = Duration::from_secs(3600);

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

/// `~/.cognitive/modules`, the install target for every source kind.
pub fn user_modules_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cognitive")
        .join("modules")
}

fn registry_cache_path() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cognitive")
        .join("registry-cache.json")
}

/// All module search roots, in lookup priority: `COGNITIVE_MODULES_PATH`
/// entries ahead of project-local, user-global, and system-wide — each
/// colon-separated entry is prepended in turn, so (matching the original)
/// the last entry in the list ends up searched first.
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("cognitive")
            .join("modules"),
        user_modules_dir(),
        PathBuf::from(SYSTEM_WIDE_PATH),
    ];

    if let Ok(custom) = std::env::var("COGNITIVE_MODULES_PATH") {
        for entry in custom.split(':') {
            if !entry.is_empty() {
                paths.insert(0, PathBuf::from(entry));
            }
        }
    }

    paths
}

fn is_valid_module(path: &Path) -> bool {
    path.join("module.yaml").exists() || path.join("MODULE.md").exists() || path.join("module.md").exists()
}

fn detected_format(path: &Path) -> Option<&'static str> {
    if path.join("module.yaml").exists() {
        Some("v2")
    } else if path.join("MODULE.md").exists() {
        Some("v1")
    } else if path.join("module.md").exists() {
        Some("v0")
    } else {
        None
    }
}

/// Finds a module by name across all search paths, first match wins.
pub fn find_module(name: &str) -> Option<PathBuf> {
    for base in search_paths() {
        let candidate = base.join(name);
        if is_valid_module(&candidate) {
            return Some(candidate);
        }
    }
    None
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredModule {
    pub name: String,
    pub path: PathBuf,
    pub location: &'static str,
    pub format: &'static str,
}

/// Lists every module visible across search paths, first occurrence by
/// name wins (so a project-local copy shadows a user-global one).
pub fn list_modules() -> Vec<DiscoveredModule> {
    let paths = search_paths();
    let local_root = paths.first().cloned();
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for base in &paths {
        let Ok(entries) = std::fs::read_dir(base) else { continue };
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if seen.contains(&name) {
                continue;
            }
            let Some(format) = detected_format(&dir) else { continue };
            seen.insert(name.clone());
            let location = if Some(base) == local_root.as_ref() { "local" } else { "global" };
            out.push(DiscoveredModule { name, path: dir, location, format });
        }
    }
    out
}

pub fn ensure_user_modules_dir() -> Result<PathBuf, RegistryError> {
    let dir = user_modules_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn copy_dir_recursive(source: &Path, target: &Path) -> Result<(), RegistryError> {
    std::fs::create_dir_all(target)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let from = entry.path();
        let to = target.join(entry.file_name());
        if from.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

fn module_version(path: &Path) -> Option<String> {
    let yaml_path = path.join("module.yaml");
    if yaml_path.exists() {
        let contents = std::fs::read_to_string(&yaml_path).ok()?;
        let value: Value = serde_yaml::from_str(&contents).ok()?;
        return value.get("version").and_then(Value::as_str).map(str::to_string);
    }

    let md_path = if path.join("MODULE.md").exists() {
        path.join("MODULE.md")
    } else {
        path.join("module.md")
    };
    if md_path.exists() {
        let contents = std::fs::read_to_string(&md_path).ok()?;
        if let Some(rest) = contents.strip_prefix("---") {
            if let Some(end) = rest.find("---") {
                let frontmatter = &rest[..end];
                let value: Value = serde_yaml::from_str(frontmatter).ok()?;
                return value.get("version").and_then(Value::as_str).map(str::to_string);
            }
        }
    }
    None
}

/// Per-module-name coarse mutual exclusion so concurrent install/update/
/// uninstall calls against the same module don't race on the filesystem.
static MODULE_LOCKS: Lazy<DashMap<String, Mutex<()>>> = Lazy::new(DashMap::new);

fn lock_module(name: &str) -> dashmap::mapref::one::Ref<'static, String, Mutex<()>> {
    MODULE_LOCKS.entry(name.to_string()).or_insert_with(|| Mutex::new(()));
    MODULE_LOCKS.get(name).unwrap()
}

fn manifest_file() -> PathBuf {
    manifest::manifest_path(&user_modules_dir())
}

/// Installs a module from a local directory into the user-global root.
pub fn install_from_local(source: &Path, name: Option<&str>) -> Result<PathBuf, RegistryError> {
    let source = source
        .canonicalize()
        .map_err(|_| RegistryError::SourceNotFound(source.to_path_buf()))?;
    if !is_valid_module(&source) {
        return Err(RegistryError::InvalidModule(source));
    }

    let module_name = name
        .map(str::to_string)
        .or_else(|| source.file_name().map(|n| n.to_string_lossy().to_string()))
        .ok_or_else(|| RegistryError::InvalidModule(source.clone()))?;

    let guard = lock_module(&module_name);
    let _held = guard.lock();

    let target = ensure_user_modules_dir()?.join(&module_name);
    if target.exists() {
        std::fs::remove_dir_all(&target)?;
    }
    copy_dir_recursive(&source, &target)?;

    manifest::record_source(
        &manifest_file(),
        &module_name,
        &source,
        None,
        None,
        None,
        None,
        module_version(&target),
        &target,
    )?;

    Ok(target)
}

fn parse_github_url(url: &str) -> Result<(String, String), RegistryError> {
    let full = if url.starts_with("http") { url.to_string() } else { format!("https://github.com/{url}") };
    static PATTERN: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^https://github\.com/([^/]+)/([^/]+)/?$").unwrap());
    let caps = PATTERN
        .captures(full.trim_end_matches('/'))
        .ok_or_else(|| RegistryError::InvalidGithubUrl(url.to_string()))?;
    let org = caps[1].to_string();
    let repo = caps[2].trim_end_matches(".git").to_string();
    Ok((org, repo))
}

/// Downloads the ZIP archive for `tag` (if given) or `branch`, extracts it,
/// and installs the module found at `module_path` (searched as-given, under
/// `cognitive/modules/`, and under `modules/`) or the repo root if no
/// `module_path` is given.
pub async fn install_from_github(
    url: &str,
    module_path: Option<&str>,
    name: Option<&str>,
    branch: &str,
    tag: Option<&str>,
) -> Result<PathBuf, RegistryError> {
    let (org, repo) = parse_github_url(url)?;
    let github_url = format!("https://github.com/{org}/{repo}");

    let zip_url = match tag {
        Some(tag) => format!("https://github.com/{org}/{repo}/archive/refs/tags/{tag}.zip"),
        None => format!("https://github.com/{org}/{repo}/archive/refs/heads/{branch}.zip"),
    };

    let client = reqwest::Client::builder().user_agent("cognitive-modules/1.0").build()?;
    let response = client.get(&zip_url).send().await.map_err(|source| RegistryError::Download {
        ref_: tag.map(str::to_string).unwrap_or_else(|| branch.to_string()),
        source,
    })?;
    let response = response.error_for_status().map_err(|source| RegistryError::Download {
        ref_: tag.map(str::to_string).unwrap_or_else(|| branch.to_string()),
        source,
    })?;
    let bytes = response.bytes().await.map_err(|source| RegistryError::Download {
        ref_: tag.map(str::to_string).unwrap_or_else(|| branch.to_string()),
        source,
    })?;

    let extract_dir = tempfile::tempdir()?;
    {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.as_ref()))?;
        archive.extract(extract_dir.path())?;
    }

    let mut top_level_dirs = std::fs::read_dir(extract_dir.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir());
    let repo_root = top_level_dirs.next().ok_or(RegistryError::EmptyArchive)?;

    let source = match module_path {
        Some(rel) => {
            let candidates = [
                repo_root.join(rel),
                repo_root.join("cognitive").join("modules").join(rel),
                repo_root.join("modules").join(rel),
            ];
            candidates
                .into_iter()
                .find(|p| is_valid_module(p))
                .ok_or_else(|| RegistryError::InvalidModule(repo_root.join(rel)))?
        }
        None => {
            if !is_valid_module(&repo_root) {
                return Err(RegistryError::InvalidModule(repo_root));
            }
            repo_root
        }
    };

    let module_name = name
        .map(str::to_string)
        .or_else(|| source.file_name().map(|n| n.to_string_lossy().to_string()))
        .ok_or_else(|| RegistryError::InvalidModule(source.clone()))?;

    let guard = lock_module(&module_name);
    let _held = guard.lock();

    let version = module_version(&source);
    let target = ensure_user_modules_dir()?.join(&module_name);
    if target.exists() {
        std::fs::remove_dir_all(&target)?;
    }
    copy_dir_recursive(&source, &target)?;

    manifest::record_source(
        &manifest_file(),
        &module_name,
        &source,
        Some(github_url),
        module_path.map(str::to_string),
        tag.map(str::to_string),
        Some(branch.to_string()),
        version,
        &target,
    )?;

    Ok(target)
}

/// Re-installs a module from the GitHub source recorded at install time,
/// preferring the recorded tag over the recorded branch.
pub async fn update_module(name: &str) -> Result<(PathBuf, Option<String>, Option<String>), RegistryError> {
    let manifest = manifest::load(&manifest_file());
    let entry = manifest.get(name).ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
    let github_url = entry.github_url.clone().ok_or_else(|| RegistryError::NotFromGithub(name.to_string()))?;

    let current_path = user_modules_dir().join(name);
    let old_version = if current_path.exists() { module_version(&current_path) } else { None };

    let tag = entry.tag.clone();
    let branch = entry.branch.clone().unwrap_or_else(|| "main".to_string());
    let effective_branch = if tag.is_some() { "main".to_string() } else { branch };

    let new_path = install_from_github(
        &github_url,
        entry.module_path.as_deref(),
        Some(name),
        &effective_branch,
        tag.as_deref(),
    )
    .await?;

    let new_version = module_version(&new_path);
    Ok((new_path, old_version, new_version))
}

/// Removes an installed module. Refuses to touch anything outside the
/// user-global modules directory.
pub fn uninstall_module(name: &str) -> Result<bool, RegistryError> {
    let guard = lock_module(name);
    let _held = guard.lock();

    let root = user_modules_dir();
    let target = root.join(name);
    if target.parent() != Some(root.as_path()) {
        return Err(RegistryError::OutsideUserRoot(target));
    }
    if target.exists() {
        std::fs::remove_dir_all(&target)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

pub fn get_installed_module_info(name: &str) -> Option<InstalledEntry> {
    manifest::load(&manifest_file()).get(name).cloned()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PublicRegistry {
    #[serde(default)]
    pub modules: std::collections::HashMap<String, RegistryModuleInfo>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryModuleInfo {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub version: String,
}

/// Fetches the public module catalog, preferring a cache younger than
/// [`REGISTRY_CACHE_TTL`]. A fetch failure degrades to an empty registry
/// with an `error` field rather than propagating, matching the original.
pub async fn fetch_registry(url: Option<&str>) -> PublicRegistry {
    let cache_path = registry_cache_path();
    if let Ok(metadata) = std::fs::metadata(&cache_path) {
        if let Ok(modified) = metadata.modified() {
            if SystemTime::now().duration_since(modified).unwrap_or(Duration::MAX) < REGISTRY_CACHE_TTL {
                if let Ok(contents) = std::fs::read_to_string(&cache_path) {
                    if let Ok(registry) = serde_json::from_str(&contents) {
                        return registry;
                    }
                }
            }
        }
    }

    let url = url
        .map(str::to_string)
        .or_else(|| std::env::var("COGNITIVE_REGISTRY_URL").ok())
        .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string());

    match fetch_and_cache(&url, &cache_path).await {
        Ok(registry) => registry,
        Err(e) => PublicRegistry { modules: Default::default(), error: Some(e.to_string()) },
    }
}

async fn fetch_and_cache(url: &str, cache_path: &Path) -> Result<PublicRegistry, RegistryError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    let text = client.get(url).send().await?.error_for_status()?.text().await?;
    let registry: PublicRegistry = serde_json::from_str(&text)?;
    if let Some(dir) = cache_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(cache_path, &text)?;
    Ok(registry)
}

pub async fn search_registry(query: &str) -> Vec<RegistryModuleInfo> {
    let registry = fetch_registry(None).await;
    let query = query.to_lowercase();
    registry
        .modules
        .into_values()
        .filter(|info| info.description.to_lowercase().contains(&query))
        .collect()
}

#[derive(Debug, Deserialize)]
struct GithubTag {
    name: String,
}

/// Lists up to `limit` tag names from the GitHub API, newest first. Returns
/// an empty list (rather than erroring) on any network failure.
pub async fn list_github_tags(url: &str, limit: usize) -> Vec<String> {
    let Ok((org, repo)) = parse_github_url(url) else { return Vec::new() };
    let api_url = format!("https://api.github.com/repos/{org}/{repo}/tags?per_page={limit}");

    let Ok(client) = reqwest::Client::builder()
        .user_agent("cognitive-modules/1.0")
        .timeout(Duration::from_secs(10))
        .build()
    else {
        return Vec::new();
    };

    let Ok(response) = client
        .get(&api_url)
        .header("Accept", "application/vnd.github.v3+json")
        .send()
        .await
    else {
        return Vec::new();
    };

    let Ok(tags) = response.json::<Vec<GithubTag>>().await else { return Vec::new() };
    tags.into_iter().map(|t| t.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shorthand_github_url() {
        let (org, repo) = parse_github_url("ziel-io/cognitive-modules").unwrap();
        assert_eq!(org, "ziel-io");
        assert_eq!(repo, "cognitive-modules");
    }

    #[test]
    fn parses_full_github_url_with_git_suffix() {
        let (org, repo) = parse_github_url("https://github.com/ziel-io/cognitive-modules.git").unwrap();
        assert_eq!(org, "ziel-io");
        assert_eq!(repo, "cognitive-modules");
    }

    #[test]
    fn rejects_non_github_url() {
        assert!(parse_github_url("https://example.com/foo/bar").is_err());
    }

    #[test]
    fn search_paths_honors_custom_env_prefix() {
        let _guard = crate::TEST_ENV_GUARD.lock();
        std::env::set_var("COGNITIVE_MODULES_PATH", "/tmp/custom-a:/tmp/custom-b");
        let paths = search_paths();
        assert_eq!(paths[0], PathBuf::from("/tmp/custom-b"));
        assert_eq!(paths[1], PathBuf::from("/tmp/custom-a"));
        std::env::remove_var("COGNITIVE_MODULES_PATH");
    }
}
