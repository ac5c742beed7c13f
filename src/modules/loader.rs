//! Format detection and parsing: turns a module directory, in whichever of
//! the four on-disk formats it was authored in, into a normalized
//! [`Module`] record.
//!
//! Format precedence mirrors the original loader
//! (`cognitive.loader.detect_format`): a directory is checked for
//! `module.yaml`, then `MODULE.md`, then `module.md`, in that order, and the
//! first hit wins.

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde_json::Value;
use serde_yaml::Value as YamlValue;

use super::error::ModuleError;
use super::model::*;

/// Detects which format a module directory is authored in, without fully
/// parsing it.
pub fn detect_format(dir: &Path) -> Option<FormatVersion> {
    if dir.join("module.yaml").is_file() {
        let manifest = fs::read_to_string(dir.join("module.yaml")).ok()?;
        let value: YamlValue = serde_yaml::from_str(&manifest).ok()?;
        return Some(detect_v2_subversion(&value));
    }
    if dir.join("MODULE.md").is_file() {
        return Some(FormatVersion::V1);
    }
    if dir.join("module.md").is_file() {
        return Some(FormatVersion::V0);
    }
    None
}

fn detect_v2_subversion(manifest: &YamlValue) -> FormatVersion {
    let has = |key: &str| manifest.get(key).is_some();
    if has("tier") || has("overflow") || has("enums") || has("compat") {
        return FormatVersion::V22;
    }
    match manifest.get("format_version").and_then(YamlValue::as_str) {
        Some("2.1") => FormatVersion::V21,
        Some("2.0") => FormatVersion::V20,
        _ => FormatVersion::V20,
    }
}

/// Loads and normalizes the module rooted at `dir`.
pub fn load_dir(dir: &Path) -> Result<Module, ModuleError> {
    let format_version = detect_format(dir)
        .ok_or_else(|| ModuleError::UnknownFormat(dir.display().to_string()))?;
    match format_version {
        FormatVersion::V22 => load_v22(dir),
        FormatVersion::V21 | FormatVersion::V20 => load_v2x(dir, format_version),
        FormatVersion::V1 => load_v1(dir),
        FormatVersion::V0 => load_v0(dir),
    }
}

fn yaml_to_json(value: YamlValue) -> Result<Value, ModuleError> {
    serde_json::to_value(value).map_err(ModuleError::from)
}

fn read_yaml_manifest(dir: &Path) -> Result<YamlValue, ModuleError> {
    let text = fs::read_to_string(dir.join("module.yaml"))?;
    Ok(serde_yaml::from_str(&text)?)
}

fn read_prompt(dir: &Path) -> Result<String, ModuleError> {
    Ok(fs::read_to_string(dir.join("prompt.md"))?)
}

fn read_schema_json(dir: &Path) -> Result<Value, ModuleError> {
    let text = fs::read_to_string(dir.join("schema.json"))?;
    Ok(serde_json::from_str(&text)?)
}

fn string_field(manifest: &YamlValue, key: &str, default: &str) -> String {
    manifest
        .get(key)
        .and_then(YamlValue::as_str)
        .unwrap_or(default)
        .to_string()
}

fn string_list(manifest: &YamlValue, key: &str) -> Vec<String> {
    manifest
        .get(key)
        .and_then(YamlValue::as_sequence)
        .map(|seq| {
            seq.iter()
                .filter_map(YamlValue::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn load_v22(dir: &Path) -> Result<Module, ModuleError> {
    let manifest = read_yaml_manifest(dir)?;
    let prompt = read_prompt(dir)?;
    let schema = read_schema_json(dir)?;

    let name = string_field(&manifest, "name", "");
    let version = string_field(&manifest, "version", "0.0.0");
    let responsibility = string_field(&manifest, "responsibility", "");
    if name.is_empty() || responsibility.is_empty() {
        return Err(ModuleError::Validation(
            "module manifest must declare `name` and `responsibility`".to_string(),
        ));
    }

    let tier = parse_enum_field(&manifest, "tier").unwrap_or_default();
    let schema_strictness = parse_enum_field(&manifest, "schema_strictness").unwrap_or_default();
    let excludes = string_list(&manifest, "excludes");

    let overflow_value = manifest.get("overflow").cloned();
    let overflow = match overflow_value {
        Some(v) => serde_yaml::from_value(v)?,
        None => Overflow::for_strictness(schema_strictness),
    };

    let enums = match manifest.get("enums").cloned() {
        Some(v) => serde_yaml::from_value(v)?,
        None => EnumsConfig::for_tier(tier),
    };

    let compat: Compat = match manifest.get("compat").cloned() {
        Some(v) => serde_yaml::from_value(v)?,
        None => Compat::default(),
    };

    let constraints: Constraints = match manifest.get("constraints").cloned() {
        Some(v) => serde_yaml::from_value(v)?,
        None => Constraints::default(),
    };

    let policies: Policies = match manifest.get("policies").cloned() {
        Some(v) => serde_yaml::from_value(v)?,
        None => Policies::default(),
    };
    let constraints = merge_policies_into_constraints(constraints, &policies);

    let meta_config: MetaConfig = match manifest.get("meta_config").cloned() {
        Some(v) => serde_yaml::from_value(v)?,
        None => MetaConfig::default(),
    };

    let schemas = Schemas {
        input: schema.get("input").cloned().unwrap_or_else(|| Value::Object(Default::default())),
        data: schema
            .get("data")
            .or_else(|| schema.get("output"))
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())),
        meta: schema.get("meta").cloned().unwrap_or_else(|| Value::Object(Default::default())),
        error: schema.get("error").cloned().unwrap_or_else(|| Value::Object(Default::default())),
        defs: schema.get("$defs").cloned().unwrap_or_else(|| Value::Object(Default::default())),
    };

    validate_meta_schema(&schemas.meta)?;

    Ok(Module {
        name,
        version,
        format_version: FormatVersion::V22,
        responsibility,
        tier,
        schema_strictness,
        excludes,
        prompt,
        schemas,
        constraints,
        policies,
        overflow,
        enums,
        compat,
        meta_config,
        path: dir.to_path_buf(),
    })
}

fn parse_enum_field<T: serde::de::DeserializeOwned>(manifest: &YamlValue, key: &str) -> Option<T> {
    manifest.get(key).cloned().and_then(|v| serde_yaml::from_value(v).ok())
}

/// Folds the newer `policies` map onto the legacy `constraints` map: a
/// policy that denies everything (an explicit `"*"` in its deny list, or a
/// non-empty deny list with no matching allow) is the `policies`-era way of
/// saying what `constraints.no_network`/`no_file_write` used to say
/// directly. `constraints` wins when it already set the flag; this only
/// ever turns a flag on, never off.
fn merge_policies_into_constraints(mut constraints: Constraints, policies: &Policies) -> Constraints {
    constraints.no_network |= denies_everything(&policies.network);
    constraints.no_file_write |= denies_everything(&policies.filesystem);
    constraints
}

fn denies_everything(policy: &ToolPolicy) -> bool {
    policy.deny.iter().any(|d| d == "*") || (!policy.deny.is_empty() && policy.allow.is_empty())
}

fn validate_meta_schema(meta_schema: &Value) -> Result<(), ModuleError> {
    if meta_schema.as_object().map(|o| o.is_empty()).unwrap_or(true) {
        // Older/incomplete modules may not declare a meta schema yet; the
        // runner falls back to the built-in v2.2 meta schema in that case.
        return Ok(());
    }
    let required = meta_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).collect::<Vec<_>>())
        .unwrap_or_default();
    for field in ["confidence", "risk", "explain"] {
        if !required.contains(&field) {
            return Err(ModuleError::Validation(format!(
                "meta schema must require `{field}`"
            )));
        }
    }
    Ok(())
}

/// v2.0/v2.1: `module.yaml` + `prompt.md` + `schema.json`, but without the
/// v2.2 manifest keys (`tier`/`overflow`/`enums`/`compat`); all of those
/// fall back to their strictness/tier-derived defaults.
fn load_v2x(dir: &Path, format_version: FormatVersion) -> Result<Module, ModuleError> {
    let manifest = read_yaml_manifest(dir)?;
    let prompt = read_prompt(dir)?;
    let schema = read_schema_json(dir)?;

    let name = string_field(&manifest, "name", "");
    let version = string_field(&manifest, "version", "0.0.0");
    let responsibility = string_field(&manifest, "responsibility", "");
    if name.is_empty() || responsibility.is_empty() {
        return Err(ModuleError::Validation(
            "module manifest must declare `name` and `responsibility`".to_string(),
        ));
    }

    let schema_strictness = SchemaStrictness::default();
    let tier = Tier::default();

    let schemas = Schemas {
        input: schema.get("input").cloned().unwrap_or_else(|| Value::Object(Default::default())),
        data: schema
            .get("output")
            .or_else(|| schema.get("data"))
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())),
        meta: Value::Object(Default::default()),
        error: schema.get("error").cloned().unwrap_or_else(|| Value::Object(Default::default())),
        defs: schema.get("$defs").cloned().unwrap_or_else(|| Value::Object(Default::default())),
    };

    let constraints: Constraints = match manifest.get("constraints").cloned() {
        Some(v) => serde_yaml::from_value(v)?,
        None => Constraints::default(),
    };

    Ok(Module {
        name,
        version,
        format_version,
        responsibility,
        tier,
        schema_strictness,
        excludes: string_list(&manifest, "excludes"),
        prompt,
        schemas,
        constraints,
        policies: Policies::default(),
        overflow: Overflow::for_strictness(schema_strictness),
        enums: EnumsConfig::for_tier(tier),
        compat: Compat {
            accepts_v21_payload: true,
            runtime_auto_wrap: true,
            schema_output_alias: "output".to_string(),
        },
        meta_config: MetaConfig::default(),
        path: dir.to_path_buf(),
    })
}

/// v1: a single `MODULE.md` with YAML frontmatter (delimited by `---`
/// lines) followed by a Markdown body that is the prompt template.
fn load_v1(dir: &Path) -> Result<Module, ModuleError> {
    let text = fs::read_to_string(dir.join("MODULE.md"))?;
    let (frontmatter, body) = split_frontmatter(&text).ok_or_else(|| {
        ModuleError::Validation("MODULE.md is missing a YAML frontmatter block".to_string())
    })?;
    let manifest: YamlValue = serde_yaml::from_str(frontmatter)?;

    let name = string_field(&manifest, "name", "");
    let responsibility = string_field(&manifest, "responsibility", "");
    if name.is_empty() || responsibility.is_empty() {
        return Err(ModuleError::Validation(
            "MODULE.md frontmatter must declare `name` and `responsibility`".to_string(),
        ));
    }

    let constraints: Constraints = match manifest.get("constraints").cloned() {
        Some(v) => serde_yaml::from_value(v)?,
        None => Constraints::default(),
    };

    Ok(Module {
        name,
        version: string_field(&manifest, "version", "1.0.0"),
        format_version: FormatVersion::V1,
        responsibility,
        tier: Tier::default(),
        schema_strictness: SchemaStrictness::default(),
        excludes: string_list(&manifest, "excludes"),
        prompt: body.trim().to_string(),
        schemas: Schemas::default(),
        constraints,
        policies: Policies::default(),
        overflow: Overflow::for_strictness(SchemaStrictness::default()),
        enums: EnumsConfig::for_tier(Tier::default()),
        compat: Compat::default(),
        meta_config: MetaConfig::default(),
        path: dir.to_path_buf(),
    })
}

fn split_frontmatter(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix("---")?;
    let end = rest.find("\n---")?;
    let frontmatter = &rest[..end];
    let body = &rest[end + 4..];
    Some((frontmatter, body))
}

/// v0: `module.md` (plain description) + `input.schema.json` +
/// `output.schema.json` + `constraints.yaml` + `prompt.txt`.
fn load_v0(dir: &Path) -> Result<Module, ModuleError> {
    let description = fs::read_to_string(dir.join("module.md"))?;
    let prompt = fs::read_to_string(dir.join("prompt.txt"))?;
    let input_schema = read_optional_json(&dir.join("input.schema.json"))?;
    let output_schema = read_optional_json(&dir.join("output.schema.json"))?;
    let constraints = read_optional_yaml::<Constraints>(&dir.join("constraints.yaml"))?
        .unwrap_or_default();

    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed-module")
        .to_string();
    let responsibility = description.lines().next().unwrap_or("").trim().to_string();

    Ok(Module {
        name,
        version: "0.0.0".to_string(),
        format_version: FormatVersion::V0,
        responsibility,
        tier: Tier::default(),
        schema_strictness: SchemaStrictness::default(),
        excludes: Vec::new(),
        prompt,
        schemas: Schemas {
            input: input_schema.unwrap_or_else(|| Value::Object(Default::default())),
            data: output_schema.unwrap_or_else(|| Value::Object(Default::default())),
            meta: Value::Object(Default::default()),
            error: Value::Object(Default::default()),
            defs: Value::Object(Default::default()),
        },
        constraints,
        policies: Policies::default(),
        overflow: Overflow::for_strictness(SchemaStrictness::default()),
        enums: EnumsConfig::for_tier(Tier::default()),
        compat: Compat::default(),
        meta_config: MetaConfig::default(),
        path: dir.to_path_buf(),
    })
}

fn read_optional_json(path: &Path) -> Result<Option<Value>, ModuleError> {
    if !path.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&text)?))
}

fn read_optional_yaml<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, ModuleError> {
    if !path.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(path)?;
    Ok(Some(serde_yaml::from_str(&text)?))
}

/// Loads every module directly under `root`, skipping (with a logged
/// warning) any entry that fails to parse, matching the original loader's
/// graceful, best-effort directory scan.
pub fn load_all(root: &Path) -> Vec<Module> {
    let mut modules = Vec::new();
    let Ok(entries) = fs::read_dir(root) else {
        return modules;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match load_dir(&path) {
            Ok(module) => modules.push(module),
            Err(err) => warn!("skipping module at {}: {err}", path.display()),
        }
    }
    modules
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    fn v22_fixture(dir: &Path) {
        write(
            dir,
            "module.yaml",
            r#"
name: summarize-ticket
version: 1.0.0
responsibility: Summarize a support ticket
tier: decision
schema_strictness: medium
excludes:
  - fabricating customer data
"#,
        );
        write(dir, "prompt.md", "Summarize: $ARGUMENTS");
        write(
            dir,
            "schema.json",
            r#"{
                "meta": {"required": ["confidence", "risk", "explain"]},
                "input": {"type": "object"},
                "data": {"type": "object", "required": ["rationale"]},
                "error": {"type": "object"}
            }"#,
        );
    }

    #[test]
    fn detects_v22_by_manifest_keys() {
        let dir = tempdir().unwrap();
        v22_fixture(dir.path());
        assert_eq!(detect_format(dir.path()), Some(FormatVersion::V22));
    }

    #[test]
    fn loads_v22_module_with_defaults() {
        let dir = tempdir().unwrap();
        v22_fixture(dir.path());
        let module = load_dir(dir.path()).unwrap();
        assert_eq!(module.name, "summarize-ticket");
        assert_eq!(module.tier, Tier::Decision);
        assert!(module.overflow.enabled);
        assert_eq!(module.overflow.max_items, 5);
        assert_eq!(module.enums.strategy, EnumStrategy::Extensible);
    }

    #[test]
    fn rejects_meta_schema_missing_required_fields() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "module.yaml",
            "name: bad\nversion: 1.0.0\nresponsibility: test\ntier: decision\n",
        );
        write(dir.path(), "prompt.md", "hi");
        write(
            dir.path(),
            "schema.json",
            r#"{"meta": {"required": ["confidence"]}}"#,
        );
        let err = load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, ModuleError::Validation(_)));
    }

    #[test]
    fn loads_v1_module_from_frontmatter() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "MODULE.md",
            "---\nname: legacy-module\nresponsibility: do a thing\n---\n\nYou are a legacy module. $ARGUMENTS",
        );
        let module = load_dir(dir.path()).unwrap();
        assert_eq!(module.format_version, FormatVersion::V1);
        assert_eq!(module.name, "legacy-module");
        assert!(module.prompt.contains("$ARGUMENTS"));
    }

    #[test]
    fn loads_v0_module_from_flat_files() {
        let dir = tempdir().unwrap();
        write(dir.path(), "module.md", "A very old module.\n");
        write(dir.path(), "prompt.txt", "Do the thing: $ARGUMENTS");
        write(dir.path(), "input.schema.json", r#"{"type": "object"}"#);
        write(dir.path(), "output.schema.json", r#"{"type": "object"}"#);
        let module = load_dir(dir.path()).unwrap();
        assert_eq!(module.format_version, FormatVersion::V0);
        assert_eq!(module.responsibility, "A very old module.");
    }

    #[test]
    fn policies_network_deny_sets_no_network_constraint() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "module.yaml",
            r#"
name: network-denied
version: 1.0.0
responsibility: test
tier: decision
policies:
  network:
    deny: ["*"]
"#,
        );
        write(dir.path(), "prompt.md", "hi $ARGUMENTS");
        write(
            dir.path(),
            "schema.json",
            r#"{"meta": {"required": ["confidence", "risk", "explain"]}, "input": {}, "data": {}}"#,
        );
        let module = load_dir(dir.path()).unwrap();
        assert!(module.constraints.no_network);
    }

    #[test]
    fn policies_filesystem_partial_deny_sets_no_file_write_constraint() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "module.yaml",
            r#"
name: fs-denied
version: 1.0.0
responsibility: test
tier: decision
policies:
  filesystem:
    deny: ["/etc"]
"#,
        );
        write(dir.path(), "prompt.md", "hi $ARGUMENTS");
        write(
            dir.path(),
            "schema.json",
            r#"{"meta": {"required": ["confidence", "risk", "explain"]}, "input": {}, "data": {}}"#,
        );
        let module = load_dir(dir.path()).unwrap();
        assert!(module.constraints.no_file_write);
        assert!(!module.constraints.no_network);
    }

    #[test]
    fn policies_with_an_allow_list_and_no_deny_is_not_a_denial() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "module.yaml",
            r#"
name: network-scoped
version: 1.0.0
responsibility: test
tier: decision
policies:
  network:
    allow: ["api.example.com"]
"#,
        );
        write(dir.path(), "prompt.md", "hi $ARGUMENTS");
        write(
            dir.path(),
            "schema.json",
            r#"{"meta": {"required": ["confidence", "risk", "explain"]}, "input": {}, "data": {}}"#,
        );
        let module = load_dir(dir.path()).unwrap();
        assert!(!module.constraints.no_network);
    }

    #[test]
    fn load_all_skips_unparseable_directories() {
        let root = tempdir().unwrap();
        let good = root.path().join("good");
        let bad = root.path().join("bad");
        fs::create_dir(&good).unwrap();
        fs::create_dir(&bad).unwrap();
        v22_fixture(&good);
        write(&bad, "module.yaml", "name: bad\n"); // missing prompt.md/schema.json

        let modules = load_all(root.path());
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].name, "summarize-ticket");
    }
}
