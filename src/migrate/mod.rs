//! Mechanical migration of v0/v1/v2.0/v2.1 modules to the v2.2 format.
//!
//! Grounded on `original_source/tests/test_migrate.py`, which pins the exact
//! shape of every generated document. A module already detected as v2.2 is
//! treated as a no-op success with a warning rather than re-migrated —
//! migration here is idempotent by construction.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::modules::{self, FormatVersion};

const DEFAULT_VERSION: &str = "1.0.0";

/// Builds a complete v2.2 manifest (the `module.yaml` document) from a v0/v1
/// frontmatter map, filling in every field the format requires with its
/// documented default and preserving anything the source already declared.
pub fn create_v22_manifest(frontmatter: &Value) -> Value {
    let get = |key: &str| frontmatter.get(key).cloned();

    let mut manifest = json!({
        "name": get("name").unwrap_or(Value::String(String::new())),
        "version": get("version").unwrap_or(Value::String(DEFAULT_VERSION.to_string())),
        "responsibility": get("responsibility").unwrap_or(Value::String(String::new())),
        "tier": "decision",
        "schema_strictness": "medium",
        "excludes": get("excludes").unwrap_or(Value::Array(Vec::new())),
        "overflow": {
            "enabled": true,
            "recoverable": true,
            "max_items": 5,
            "require_suggested_mapping": true,
        },
        "enums": {
            "strategy": "extensible",
        },
        "compat": {
            "accepts_v21_payload": true,
            "runtime_auto_wrap": true,
            "schema_output_alias": "data",
        },
        "io": {},
        "policies": get("policies").unwrap_or(Value::Object(Default::default())),
        "tools": {},
        "failure": {},
        "runtime_requirements": {},
    });

    if let Some(constraints) = get("constraints") {
        manifest["constraints"] = constraints;
    }
    if let Some(context) = get("context") {
        manifest["context"] = context;
    }

    manifest
}

pub fn create_meta_schema() -> Value {
    json!({
        "type": "object",
        "required": ["confidence", "risk", "explain"],
        "properties": {
            "confidence": {"type": "number", "minimum": 0, "maximum": 1},
            "risk": {"type": "string", "enum": ["none", "low", "medium", "high"]},
            "explain": {"type": "string", "maxLength": 280},
            "trace_id": {"type": "string"},
            "model": {"type": "string"},
            "latency_ms": {"type": "number"},
        }
    })
}

pub fn create_extensions_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "insights": {
                "type": "array",
                "maxItems": 5,
                "items": {
                    "type": "object",
                    "required": ["text", "suggested_mapping"],
                    "properties": {
                        "text": {"type": "string"},
                        "suggested_mapping": {"type": "string"},
                        "evidence": {"type": "string"},
                    }
                }
            }
        }
    })
}

/// Adds the `rationale` property/requirement and the `extensions` reference
/// to an existing data/output schema, without duplicating either if the
/// schema already declares them.
pub fn add_rationale_to_output(output: &Value) -> Value {
    let mut result = if output.is_object() { output.clone() } else { json!({"type": "object"}) };

    let required = result
        .get("required")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut required: Vec<Value> = required;
    if !required.iter().any(|v| v.as_str() == Some("rationale")) {
        required.push(Value::String("rationale".to_string()));
    }
    result["required"] = Value::Array(required);

    if result.get("properties").is_none() {
        result["properties"] = Value::Object(Default::default());
    }
    let properties = result["properties"].as_object_mut().unwrap();
    properties
        .entry("rationale")
        .or_insert_with(|| json!({"type": "string"}));
    properties
        .entry("extensions")
        .or_insert_with(|| json!({"$ref": "#/$defs/extensions"}));

    result
}

/// Builds the full `schema.json` document: meta/input/data/error plus
/// `$defs.extensions`, with `rationale` folded into the data schema.
pub fn create_v22_schema(input_schema: &Value, output_schema: &Value) -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "meta": create_meta_schema(),
        "input": input_schema,
        "data": add_rationale_to_output(output_schema),
        "error": {
            "type": "object",
            "required": ["code", "message"],
            "properties": {
                "code": {"type": "string"},
                "message": {"type": "string"},
            }
        },
        "$defs": {
            "extensions": create_extensions_schema(),
        }
    })
}

fn copy_dir_recursive(source: &Path, target: &Path) -> std::io::Result<()> {
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

fn backup_dir_name(module_dir: &Path) -> String {
    let name = module_dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    format!("{name}-backup-{}", chrono::Utc::now().format("%Y%m%d%H%M%S"))
}

fn split_frontmatter(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix("---")?;
    let end = rest.find("\n---")?;
    Some((&rest[..end], &rest[end + 4..]))
}

fn read_json_or_default(path: &Path) -> Value {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_else(|| Value::Object(Default::default()))
}

/// Migrates the module rooted at `path` to v2.2 in place. Returns `(success,
/// changes, warnings)`: `changes` lists what was (or, under `dry_run`,
/// would be) written; `warnings` carries non-fatal notices such as "already
/// v2.2" or "module not found".
pub fn migrate_module(path: &Path, dry_run: bool, backup: bool) -> (bool, Vec<String>, Vec<String>) {
    if !path.exists() {
        return (false, Vec::new(), vec![format!("module not found: {}", path.display())]);
    }

    let Some(format) = modules::detect_format(path) else {
        return (false, Vec::new(), vec![format!("module not found: {}", path.display())]);
    };

    if format == FormatVersion::V22 {
        return (true, Vec::new(), vec!["module is already v2.2; nothing to migrate".to_string()]);
    }

    let mut changes = Vec::new();
    let mut warnings = Vec::new();

    let (frontmatter, prompt_body, existing_schema): (Value, Option<String>, Value) = match format {
        FormatVersion::V1 => {
            let text = match std::fs::read_to_string(path.join("MODULE.md")) {
                Ok(t) => t,
                Err(e) => return (false, changes, vec![e.to_string()]),
            };
            let Some((raw_frontmatter, body)) = split_frontmatter(&text) else {
                return (false, changes, vec!["MODULE.md is missing a YAML frontmatter block".to_string()]);
            };
            let frontmatter: Value = match serde_yaml::from_str(raw_frontmatter) {
                Ok(v) => v,
                Err(e) => return (false, changes, vec![e.to_string()]),
            };
            let schema = read_json_or_default(&path.join("schema.json"));
            (frontmatter, Some(body.trim().to_string()), schema)
        }
        FormatVersion::V0 => {
            let description = std::fs::read_to_string(path.join("module.md")).unwrap_or_default();
            let prompt = std::fs::read_to_string(path.join("prompt.txt")).unwrap_or_default();
            let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            let responsibility = description.lines().next().unwrap_or("").trim().to_string();
            let frontmatter = json!({"name": name, "responsibility": responsibility});
            let schema = json!({
                "input": read_json_or_default(&path.join("input.schema.json")),
                "output": read_json_or_default(&path.join("output.schema.json")),
            });
            (frontmatter, Some(prompt), schema)
        }
        FormatVersion::V20 | FormatVersion::V21 => {
            let manifest_text = match std::fs::read_to_string(path.join("module.yaml")) {
                Ok(t) => t,
                Err(e) => return (false, changes, vec![e.to_string()]),
            };
            let frontmatter: Value = match serde_yaml::from_str(&manifest_text) {
                Ok(v) => v,
                Err(e) => return (false, changes, vec![e.to_string()]),
            };
            let schema = read_json_or_default(&path.join("schema.json"));
            (frontmatter, None, schema)
        }
        FormatVersion::V22 => unreachable!(),
    };

    let manifest = create_v22_manifest(&frontmatter);
    let input_schema = existing_schema.get("input").cloned().unwrap_or_else(|| json!({}));
    let output_schema = existing_schema
        .get("output")
        .or_else(|| existing_schema.get("data"))
        .cloned()
        .unwrap_or_else(|| json!({}));
    let new_schema = create_v22_schema(&input_schema, &output_schema);

    if backup {
        match std::fs::canonicalize(path) {
            Ok(canonical) => {
                let Some(parent) = canonical.parent().map(Path::to_path_buf) else {
                    return (false, changes, vec!["module has no parent directory to back up into".to_string()]);
                };
                let backup_path = parent.join(backup_dir_name(&canonical));
                if dry_run {
                    changes.push(format!("[DRY RUN] would create backup at {}", backup_path.display()));
                } else if let Err(e) = copy_dir_recursive(&canonical, &backup_path) {
                    return (false, changes, vec![format!("failed to create backup: {e}")]);
                } else {
                    changes.push(format!("created backup at {}", backup_path.display()));
                }
            }
            Err(e) => return (false, changes, vec![e.to_string()]),
        }
    }

    let module_yaml_text = match serde_yaml::to_string(&manifest) {
        Ok(t) => t,
        Err(e) => return (false, changes, vec![e.to_string()]),
    };
    let schema_json_text = match serde_json::to_string_pretty(&new_schema) {
        Ok(t) => t,
        Err(e) => return (false, changes, vec![e.to_string()]),
    };

    if dry_run {
        changes.push("[DRY RUN] would write module.yaml".to_string());
        changes.push("[DRY RUN] would write schema.json".to_string());
        if let Some(ref body) = prompt_body {
            if !body.is_empty() {
                changes.push("[DRY RUN] would write prompt.md".to_string());
            }
        }
        return (true, changes, warnings);
    }

    if let Err(e) = std::fs::write(path.join("module.yaml"), &module_yaml_text) {
        return (false, changes, vec![e.to_string()]);
    }
    changes.push("wrote module.yaml".to_string());

    if let Err(e) = std::fs::write(path.join("schema.json"), &schema_json_text) {
        return (false, changes, vec![e.to_string()]);
    }
    changes.push("wrote schema.json".to_string());

    if let Some(body) = prompt_body {
        if let Err(e) = std::fs::write(path.join("prompt.md"), &body) {
            return (false, changes, vec![e.to_string()]);
        }
        changes.push("wrote prompt.md".to_string());
    }

    if format == FormatVersion::V1 {
        if let Err(e) = std::fs::remove_file(path.join("MODULE.md")) {
            warnings.push(format!("could not remove legacy MODULE.md: {e}"));
        }
    }

    (true, changes, warnings)
}

/// Migrates every module discovered by [`crate::registry::list_modules`],
/// returning `(name, success, changes, warnings)` per module.
pub fn migrate_all_modules(dry_run: bool, backup: bool) -> Vec<(String, bool, Vec<String>, Vec<String>)> {
    crate::registry::list_modules()
        .into_iter()
        .map(|module| {
            let (success, changes, warnings) = migrate_module(&module.path, dry_run, backup);
            (module.name, success, changes, warnings)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn manifest_has_required_v22_fields() {
        let manifest = create_v22_manifest(&json!({"name": "test"}));
        for field in [
            "tier",
            "schema_strictness",
            "overflow",
            "enums",
            "compat",
            "io",
            "policies",
            "tools",
            "failure",
            "runtime_requirements",
        ] {
            assert!(manifest.get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn manifest_preserves_constraints_and_context() {
        let frontmatter = json!({
            "name": "test",
            "constraints": {"behavior_equivalence_false_max_confidence": 0.7},
            "context": "fork",
        });
        let manifest = create_v22_manifest(&frontmatter);
        assert_eq!(manifest["constraints"]["behavior_equivalence_false_max_confidence"], 0.7);
        assert_eq!(manifest["context"], "fork");
    }

    #[test]
    fn add_rationale_does_not_duplicate() {
        let output = json!({
            "type": "object",
            "required": ["rationale"],
            "properties": {"rationale": {"type": "string", "description": "existing"}}
        });
        let result = add_rationale_to_output(&output);
        let required = result["required"].as_array().unwrap();
        assert_eq!(required.iter().filter(|v| v.as_str() == Some("rationale")).count(), 1);
    }

    #[test]
    fn migrate_dry_run_does_not_write_files() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("MODULE.md"),
            "---\nname: test-module\nversion: 1.0.0\nresponsibility: Test\nexcludes: []\n---\n# Test\n",
        )
        .unwrap();
        fs::write(dir.path().join("schema.json"), json!({"input": {}, "output": {}}).to_string()).unwrap();

        let (success, changes, _) = migrate_module(dir.path(), true, false);
        assert!(success);
        assert!(changes.iter().any(|c| c.contains("[DRY RUN]")));
        assert!(!dir.path().join("module.yaml").exists());
        assert!(!dir.path().join("prompt.md").exists());
    }

    #[test]
    fn migrate_v1_module_writes_v22_files() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("MODULE.md"),
            "---\nname: v1-module\nversion: 1.0.0\nresponsibility: Test v1 module\nexcludes:\n  - bad things\n---\n\n# V1 Module Instructions\n\nDo something useful.\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("schema.json"),
            json!({"input": {"type": "object"}, "output": {"type": "object", "properties": {"result": {"type": "string"}}}}).to_string(),
        )
        .unwrap();

        let (success, changes, _) = migrate_module(dir.path(), false, false);
        assert!(success);
        assert!(!changes.is_empty());
        assert!(dir.path().join("module.yaml").exists());
        assert!(dir.path().join("prompt.md").exists());

        let manifest_text = fs::read_to_string(dir.path().join("module.yaml")).unwrap();
        let manifest: Value = serde_yaml::from_str(&manifest_text).unwrap();
        assert_eq!(manifest["name"], "v1-module");
        assert_eq!(manifest["tier"], "decision");
        assert!(manifest.get("overflow").is_some());
        assert!(manifest.get("compat").is_some());
    }

    #[test]
    fn migrate_already_v22_is_a_warned_no_op() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("module.yaml"),
            "name: v22-module\nversion: 2.2.0\nresponsibility: Already v2.2\ntier: decision\n",
        )
        .unwrap();
        fs::write(dir.path().join("prompt.md"), "# V2.2 Module").unwrap();
        fs::write(
            dir.path().join("schema.json"),
            json!({"meta": {"type": "object", "required": ["confidence", "risk", "explain"]}, "input": {}, "data": {}}).to_string(),
        )
        .unwrap();

        let (success, _, warnings) = migrate_module(dir.path(), false, false);
        assert!(success);
        assert!(warnings.iter().any(|w| w.to_lowercase().contains("v2.2")));
    }

    #[test]
    fn migrate_nonexistent_module_fails() {
        let (success, _, warnings) = migrate_module(Path::new("nonexistent-module-xyz"), true, false);
        assert!(!success);
        assert!(warnings.iter().any(|w| w.to_lowercase().contains("not found")));
    }

    #[test]
    fn migrate_creates_sibling_backup_directory() {
        let tmp = tempdir().unwrap();
        let module_dir = tmp.path().join("my_module");
        fs::create_dir(&module_dir).unwrap();
        fs::write(
            module_dir.join("MODULE.md"),
            "---\nname: backup-test\nversion: 1.0.0\nresponsibility: Test backup\nexcludes: []\n---\n# Test\n",
        )
        .unwrap();
        fs::write(module_dir.join("schema.json"), json!({"input": {}, "output": {}}).to_string()).unwrap();

        let (success, changes, _) = migrate_module(&module_dir, false, true);
        assert!(success);
        assert!(changes.iter().any(|c| c.to_lowercase().contains("backup")));

        let backup_dirs: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .flatten()
            .filter(|e| e.path().is_dir() && e.file_name().to_string_lossy().contains("backup"))
            .collect();
        assert_eq!(backup_dirs.len(), 1);
    }
}
