//! Detects which envelope shape a parsed LLM response is in (v2.2, v2.1, or
//! legacy/free-form) and promotes earlier shapes to v2.2.
//!
//! Shaped after `contract::envelope`'s conversion functions
//! (`from_task_output`, `from_crew_callback`), generalized from "wrap a task
//! output" to "wrap an arbitrary LLM response".

use super::repair::truncate_explain;
use super::risk::{aggregate_by_rule, RiskRule};
use super::types::{Data, Envelope, EnvelopeError, Meta, Risk, RiskLevel};
use serde_json::{Map, Value};

const DEFAULT_LEGACY_CONFIDENCE: f64 = 0.5;

/// A v2.2 response carries `ok` and a `meta` object with `confidence`,
/// `risk`, and `explain`.
pub fn is_v22_envelope(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    if !obj.contains_key("ok") {
        return false;
    }
    let Some(meta) = obj.get("meta").and_then(Value::as_object) else {
        return false;
    };
    meta.contains_key("confidence") && meta.contains_key("risk") && meta.contains_key("explain")
}

/// A response "looks like an envelope" (some version) if it has an `ok`
/// field, or a `meta` object, or both `data`/`output` and `error` are absent
/// together (a bare legacy payload never has this shape).
pub fn is_envelope_response(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    obj.contains_key("ok") || obj.contains_key("meta")
}

/// A v2.1 envelope has `meta`, but under the module's declared
/// `schema_output_alias` (commonly `"output"`) instead of `"data"`, and may
/// omit `explain`/`risk` defaults that v2.2 requires.
pub fn wrap_v21_to_v22(value: &Value, schema_output_alias: &str, risk_rule: RiskRule) -> Envelope {
    let obj = value.as_object().cloned().unwrap_or_default();
    let ok = obj.get("ok").and_then(Value::as_bool).unwrap_or(true);
    let meta_obj = obj.get("meta").and_then(Value::as_object).cloned();

    // Some modules never grew a dedicated `meta` block and instead left
    // confidence/rationale/changes/issues sitting directly on the output
    // payload. When there's no top-level `meta` to read from, fall back to
    // those.
    let payload_obj = obj
        .get(schema_output_alias)
        .or_else(|| obj.get("data"))
        .and_then(Value::as_object);

    let confidence = meta_obj
        .as_ref()
        .and_then(|m| m.get("confidence"))
        .and_then(Value::as_f64)
        .or_else(|| payload_obj.and_then(|p| p.get("confidence")).and_then(Value::as_f64))
        .unwrap_or(DEFAULT_LEGACY_CONFIDENCE);
    let risk = meta_obj
        .as_ref()
        .and_then(|m| m.get("risk"))
        .and_then(Value::as_str)
        .and_then(RiskLevel::parse)
        .unwrap_or_else(|| {
            let changes = payload_array(payload_obj, "changes");
            let issues = payload_array(payload_obj, "issues");
            aggregate_by_rule(risk_rule, &changes, &issues, None)
        });
    let explain = meta_obj
        .as_ref()
        .and_then(|m| m.get("explain"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| payload_obj.and_then(|p| p.get("rationale")).and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "auto-wrapped from v2.1 response".to_string());

    if !ok {
        let error = obj
            .get("error")
            .cloned()
            .unwrap_or_else(|| Value::String("unknown error".to_string()));
        return Envelope::Failure {
            meta: Meta::new(0.0, Risk::Level(RiskLevel::High), explain),
            error: error_from_value(&error),
            partial_data: obj.get(schema_output_alias).cloned(),
        };
    }

    let payload = obj
        .get(schema_output_alias)
        .or_else(|| obj.get("data"))
        .cloned()
        .unwrap_or(Value::Object(obj.clone()));

    Envelope::Success {
        meta: Meta::new(confidence, Risk::Level(risk), explain),
        data: data_from_payload(payload),
    }
}

/// Reads `field` off `obj` as an array, defaulting to empty so the caller can
/// hand it straight to [`aggregate_by_rule`] without an intermediate option.
fn payload_array(obj: Option<&Map<String, Value>>, field: &str) -> Vec<Value> {
    obj.and_then(|o| o.get(field))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// v0/v1 modules produce an arbitrary, free-form JSON object with no
/// envelope structure at all. The whole object becomes `data`; `meta` is
/// derived from whatever the payload happens to carry — `confidence` (else
/// `0.5`), `risk` via the module's configured aggregation rule over
/// `changes`/`issues`, and `explain` from `rationale` (truncated to 280,
/// else a fixed placeholder) — since the model made no explicit claim about
/// any of them through a dedicated envelope.
pub fn convert_legacy_to_envelope(value: &Value, risk_rule: RiskRule) -> Envelope {
    let obj = value.as_object();

    let confidence = obj
        .and_then(|o| o.get("confidence"))
        .and_then(Value::as_f64)
        .unwrap_or(DEFAULT_LEGACY_CONFIDENCE);
    let changes = payload_array(obj, "changes");
    let issues = payload_array(obj, "issues");
    let risk = aggregate_by_rule(risk_rule, &changes, &issues, None);
    let explain = obj
        .and_then(|o| o.get("rationale"))
        .and_then(Value::as_str)
        .map(truncate_explain)
        .unwrap_or_else(|| "no explanation provided".to_string());

    Envelope::Success {
        meta: Meta::new(confidence, Risk::Level(risk), explain),
        data: data_from_payload(value.clone()),
    }
}

fn data_from_payload(payload: Value) -> Data {
    let mut fields = match payload {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            map
        }
    };
    let rationale = fields
        .remove("rationale")
        .unwrap_or_else(|| Value::String("no rationale provided".to_string()));
    let extensions = fields.remove("extensions").and_then(|v| serde_json::from_value(v).ok());
    Data {
        rationale,
        extensions,
        fields,
    }
}

fn error_from_value(value: &Value) -> EnvelopeError {
    if let Some(obj) = value.as_object() {
        EnvelopeError {
            code: obj
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN")
                .to_string(),
            message: obj
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
            recoverable: obj.get("recoverable").and_then(Value::as_bool),
            retry_after_ms: obj.get("retry_after_ms").and_then(Value::as_u64),
            details: obj.get("details").cloned(),
        }
    } else {
        EnvelopeError {
            code: "UNKNOWN".to_string(),
            message: value.as_str().unwrap_or("unknown error").to_string(),
            recoverable: None,
            retry_after_ms: None,
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn v22_is_detected() {
        let value = json!({
            "ok": true,
            "meta": {"confidence": 0.9, "risk": "low", "explain": "fine"},
            "data": {"rationale": "because"}
        });
        assert!(is_v22_envelope(&value));
    }

    #[test]
    fn v21_without_explain_is_not_v22() {
        let value = json!({
            "ok": true,
            "meta": {"confidence": 0.9},
            "output": {"result": "x"}
        });
        assert!(!is_v22_envelope(&value));
        assert!(is_envelope_response(&value));
    }

    #[test]
    fn legacy_payload_is_not_envelope_response() {
        let value = json!({"result": "plain text", "score": 42});
        assert!(!is_envelope_response(&value));
    }

    #[test]
    fn wrap_v21_success_promotes_output_alias() {
        let value = json!({
            "ok": true,
            "meta": {"confidence": 0.8, "risk": "low"},
            "output": {"summary": "done", "rationale": "steps taken"}
        });
        let envelope = wrap_v21_to_v22(&value, "output", RiskRule::MaxChangesRisk);
        match envelope {
            Envelope::Success { meta, data } => {
                assert_eq!(meta.confidence, 0.8);
                assert_eq!(data.rationale, json!("steps taken"));
                assert_eq!(data.fields.get("summary"), Some(&json!("done")));
            }
            Envelope::Failure { .. } => panic!("expected success"),
        }
    }

    #[test]
    fn wrap_v21_failure_keeps_partial_data() {
        let value = json!({
            "ok": false,
            "error": {"code": "LLM_ERROR", "message": "timed out"},
            "output": {"partial": true}
        });
        let envelope = wrap_v21_to_v22(&value, "output", RiskRule::MaxChangesRisk);
        match envelope {
            Envelope::Failure {
                error,
                partial_data,
                ..
            } => {
                assert_eq!(error.code, "LLM_ERROR");
                assert_eq!(partial_data, Some(json!({"partial": true})));
            }
            Envelope::Success { .. } => panic!("expected failure"),
        }
    }

    #[test]
    fn wrap_v21_derives_meta_from_payload_when_no_meta_block() {
        let value = json!({
            "ok": true,
            "data": {
                "confidence": 0.8,
                "rationale": "R",
                "changes": [{"risk": "low"}, {"risk": "high"}]
            }
        });
        let envelope = wrap_v21_to_v22(&value, "data", RiskRule::MaxChangesRisk);
        match envelope {
            Envelope::Success { meta, .. } => {
                assert_eq!(meta.confidence, 0.8);
                assert_eq!(meta.explain, "R");
                assert!(matches!(meta.risk, Risk::Level(RiskLevel::High)));
            }
            Envelope::Failure { .. } => panic!("expected success"),
        }
    }

    #[test]
    fn wrap_v21_honors_max_issues_risk_rule_over_issues_not_changes() {
        // The module's risk rule names `issues`, and the payload has only
        // `issues` (no `changes` at all) — the old hardcoded `changes` read
        // would silently fall through to the empty-list default of `medium`.
        let value = json!({
            "ok": true,
            "data": {
                "rationale": "r",
                "issues": [{"risk": "high"}]
            }
        });
        let envelope = wrap_v21_to_v22(&value, "data", RiskRule::MaxIssuesRisk);
        match envelope {
            Envelope::Success { meta, .. } => {
                assert!(matches!(meta.risk, Risk::Level(RiskLevel::High)));
            }
            Envelope::Failure { .. } => panic!("expected success"),
        }
    }

    #[test]
    fn convert_legacy_wraps_whole_object_as_data() {
        let value = json!({"result": "plain text", "score": 42});
        let envelope = convert_legacy_to_envelope(&value, RiskRule::MaxChangesRisk);
        match envelope {
            Envelope::Success { data, meta } => {
                assert_eq!(meta.risk.canonical_or_medium(), RiskLevel::Medium);
                assert_eq!(data.fields.get("score"), Some(&json!(42)));
                assert_eq!(data.rationale, json!("no rationale provided"));
            }
            Envelope::Failure { .. } => panic!("expected success"),
        }
    }

    #[test]
    fn convert_legacy_derives_confidence_risk_and_explain_from_payload() {
        let value = json!({
            "confidence": 0.95,
            "rationale": "why",
            "issues": [{"risk": "high"}]
        });
        let envelope = convert_legacy_to_envelope(&value, RiskRule::MaxIssuesRisk);
        match envelope {
            Envelope::Success { meta, data } => {
                assert_eq!(meta.confidence, 0.95);
                assert_eq!(meta.explain, "why");
                assert!(matches!(meta.risk, Risk::Level(RiskLevel::High)));
                assert_eq!(data.rationale, json!("why"));
            }
            Envelope::Failure { .. } => panic!("expected success"),
        }
    }
}
