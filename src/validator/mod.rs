//! Structural validation of module directories and v2.2 envelopes.
//!
//! Grounded on `original_source/tests/test_validator.py`: `validate_module`
//! loads the module (reusing `modules::loader`, which already enforces the
//! per-format manifest shape and the meta-schema required-fields rule), then
//! layers on example-pair checks and the v2.2-specific structural rules the
//! loader doesn't cover. A module with no `examples/` directory at all is
//! not an error — only a present-but-invalid example pair is.

use std::path::Path;

use serde_json::Value;

use crate::envelope::RiskLevel;
use crate::modules::{self, FormatVersion, Module};
use crate::schema;

/// Validates the module rooted at `path`. Returns `(is_valid, errors,
/// warnings)`; `is_valid` is `errors.is_empty()`.
pub fn validate_module(path: &Path) -> (bool, Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let module = match modules::detect_format(path) {
        None => {
            errors.push(format!(
                "{}: no module.yaml, MODULE.md, or module.md found",
                path.display()
            ));
            return (false, errors, warnings);
        }
        Some(_) => match modules::load_dir(path) {
            Ok(module) => module,
            Err(err) => {
                errors.push(err.to_string());
                return (false, errors, warnings);
            }
        },
    };

    validate_examples(&module, &mut errors, &mut warnings);

    if module.format_version == FormatVersion::V22 {
        validate_v22_structure(&module, &mut errors, &mut warnings);
    }

    (errors.is_empty(), errors, warnings)
}

fn validate_examples(module: &Module, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let examples_dir = module.path.join("examples");
    if !examples_dir.is_dir() {
        warnings.push("no examples/ directory; consider adding input/output example pairs".to_string());
        return;
    }

    let input_path = examples_dir.join("input.json");
    let output_path = examples_dir.join("output.json");
    if !input_path.is_file() || !output_path.is_file() {
        warnings.push("examples/ is missing input.json or output.json".to_string());
        return;
    }

    let input = match read_json(&input_path) {
        Ok(value) => value,
        Err(e) => {
            errors.push(format!("examples/input.json is not valid JSON: {e}"));
            return;
        }
    };
    let output = match read_json(&output_path) {
        Ok(value) => value,
        Err(e) => {
            errors.push(format!("examples/output.json is not valid JSON: {e}"));
            return;
        }
    };

    match schema::validate(&input, &module.schemas.input) {
        Ok(violations) => errors.extend(violations.into_iter().map(|v| format!("examples/input.json: {v}"))),
        Err(e) => errors.push(format!("input schema is invalid: {e}")),
    }

    match schema::validate(&output, &module.schemas.data) {
        Ok(violations) => errors.extend(violations.into_iter().map(|v| format!("examples/output.json: {v}"))),
        Err(e) => errors.push(format!("output schema is invalid: {e}")),
    }
}

fn read_json(path: &Path) -> Result<Value, serde_json::Error> {
    let text = std::fs::read_to_string(path).unwrap_or_default();
    serde_json::from_str(&text)
}

fn validate_v22_structure(module: &Module, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    if let Some(explain_schema) = module.schemas.meta.get("properties").and_then(|p| p.get("explain")) {
        let max_length = explain_schema.get("maxLength").and_then(Value::as_u64);
        match max_length {
            Some(n) if n > 280 => {
                errors.push(format!("meta.explain maxLength must be <= 280, found {n}"));
            }
            None => warnings.push("meta.explain schema does not declare a maxLength".to_string()),
            _ => {}
        }
    }

    let data_required = module
        .schemas
        .data
        .get("required")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).collect::<Vec<_>>())
        .unwrap_or_default();
    if !data_required.contains(&"rationale") {
        errors.push("data schema must require `rationale`".to_string());
    }

    let has_extensions_def = module
        .schemas
        .defs
        .get("extensions")
        .is_some();
    if module.requires_extensions_defs() && !has_extensions_def {
        errors.push("overflow is enabled but schema.json is missing `$defs.extensions`".to_string());
    }
    if !module.requires_extensions_defs() && has_extensions_def {
        warnings.push("schema.json declares `$defs.extensions` but overflow is disabled".to_string());
    }
}

/// Enforces the module's overflow policy against a success response's raw
/// `data.extensions.insights`: a disabled overflow channel refuses any
/// non-empty `insights` array outright, and an enabled one refuses more than
/// `max_items` entries. Absent or empty `insights` is always fine.
pub fn validate_overflow(raw_data: &Value, enabled: bool, max_items: usize) -> Vec<String> {
    let Some(insights) = raw_data
        .get("extensions")
        .and_then(|e| e.get("insights"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    if insights.is_empty() {
        return Vec::new();
    }
    if !enabled {
        return vec![format!(
            "data.extensions.insights has {} item(s) but this module's overflow channel is disabled",
            insights.len()
        )];
    }
    if insights.len() > max_items {
        return vec![format!(
            "data.extensions.insights has {} item(s), exceeding overflow.max_items ({})",
            insights.len(),
            max_items
        )];
    }
    Vec::new()
}

/// Validates a v2.2 envelope wire document (as opposed to a module
/// directory): `ok`/`meta`/`data`-or-`error` mutual exclusion, plus the
/// meta schema's required triple and `explain` length bound.
pub fn validate_v22_envelope(document: &Value) -> (bool, Vec<String>) {
    let mut errors = Vec::new();

    let ok = document.get("ok").and_then(Value::as_bool);
    match ok {
        None => errors.push("envelope is missing `ok`".to_string()),
        Some(true) if document.get("data").is_none() => {
            errors.push("envelope has ok=true but no `data`".to_string());
        }
        Some(false) if document.get("error").is_none() => {
            errors.push("envelope has ok=false but no `error`".to_string());
        }
        _ => {}
    }

    let Some(meta) = document.get("meta") else {
        errors.push("envelope is missing `meta`".to_string());
        return (errors.is_empty(), errors);
    };

    for field in ["confidence", "risk", "explain"] {
        if meta.get(field).is_none() {
            errors.push(format!("meta is missing required field `{field}`"));
        }
    }

    if let Some(confidence) = meta.get("confidence").and_then(Value::as_f64) {
        if !(0.0..=1.0).contains(&confidence) {
            errors.push(format!("meta.confidence must be in [0, 1], found {confidence}"));
        }
    }

    if let Some(risk) = meta.get("risk").and_then(Value::as_str) {
        if RiskLevel::parse(risk).is_none() {
            errors.push(format!("meta.risk has an unrecognized value: {risk}"));
        }
    }

    if let Some(explain) = meta.get("explain").and_then(Value::as_str) {
        if explain.chars().count() > 280 {
            errors.push(format!("meta.explain exceeds 280 characters ({} found)", explain.chars().count()));
        }
    }

    (errors.is_empty(), errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn missing_module_file_is_invalid() {
        let dir = tempdir().unwrap();
        let (is_valid, errors, _) = validate_module(dir.path());
        assert!(!is_valid);
        assert!(!errors.is_empty());
    }

    #[test]
    fn example_input_violating_schema_names_the_field() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("module.yaml"),
            "name: test\nversion: 1.0.0\nresponsibility: test\ntier: decision\n",
        )
        .unwrap();
        fs::write(dir.path().join("prompt.md"), "hi").unwrap();
        fs::write(
            dir.path().join("schema.json"),
            json!({
                "meta": {"required": ["confidence", "risk", "explain"]},
                "input": {"type": "object", "required": ["required_field"]},
                "data": {"type": "object", "required": ["rationale"]}
            })
            .to_string(),
        )
        .unwrap();
        let examples = dir.path().join("examples");
        fs::create_dir(&examples).unwrap();
        fs::write(examples.join("input.json"), "{}").unwrap();
        fs::write(examples.join("output.json"), json!({"rationale": "because"}).to_string()).unwrap();

        let (is_valid, errors, _) = validate_module(dir.path());
        assert!(!is_valid);
        assert!(errors.iter().any(|e| e.contains("required_field")));
    }

    #[test]
    fn envelope_requires_meta_triple() {
        let (is_valid, errors) = validate_v22_envelope(&json!({"ok": true, "meta": {}, "data": {}}));
        assert!(!is_valid);
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn overflow_disabled_refuses_nonempty_insights() {
        let data = json!({"extensions": {"insights": [{"text": "t", "suggested_mapping": "m"}]}});
        let errors = validate_overflow(&data, false, 0);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("disabled"));
    }

    #[test]
    fn overflow_enabled_within_cap_is_fine() {
        let data = json!({"extensions": {"insights": [{"text": "t", "suggested_mapping": "m"}]}});
        assert!(validate_overflow(&data, true, 5).is_empty());
    }

    #[test]
    fn overflow_enabled_over_cap_fails() {
        let items: Vec<Value> = (0..6).map(|i| json!({"text": i, "suggested_mapping": "m"})).collect();
        let data = json!({"extensions": {"insights": items}});
        let errors = validate_overflow(&data, true, 5);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("max_items"));
    }

    #[test]
    fn overflow_absent_insights_always_passes() {
        assert!(validate_overflow(&json!({"rationale": "r"}), false, 0).is_empty());
    }

    #[test]
    fn envelope_explain_over_280_chars_fails() {
        let long_explain = "x".repeat(281);
        let doc = json!({
            "ok": true,
            "meta": {"confidence": 0.5, "risk": "low", "explain": long_explain},
            "data": {"rationale": "ok"}
        });
        let (is_valid, errors) = validate_v22_envelope(&doc);
        assert!(!is_valid);
        assert!(errors.iter().any(|e| e.contains("280")));
    }
}
