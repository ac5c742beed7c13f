//! Black-box pipeline tests: each case writes a real module directory plus a
//! recorded stub response, points `HOME` at that fixture, and drives the
//! whole `runner::run` state machine (resolve, prompt assembly, the stub
//! provider's replay mechanism, parse, normalize, validate, repair) exactly
//! as a caller would.
//!
//! The stub provider (`LLM_PROVIDER=stub`, the default) replays
//! `examples/output.json` for a module under `~/.cognitive/modules/<name>/`
//! whenever the assembled prompt starts with that module's recorded
//! `prompt.txt`, so each scenario gets its own fixed LLM response without
//! any network access or mocking seam baked into the runner itself.

use cognitive_modules::{run, Envelope, Risk, RiskLevel, RunOptions};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use tempfile::tempdir;

const PROMPT: &str = "Review the proposed change and report your findings.";

/// Every scenario here points `HOME`/`LLM_PROVIDER` at its own fixture; since
/// those are process-wide and `cargo test` runs test functions on separate
/// threads by default, this serializes the scenarios so one doesn't resolve
/// modules out of another's fixture directory mid-run.
static ENV_GUARD: Mutex<()> = Mutex::new(());

fn schema(data: Value) -> Value {
    json!({
        "meta": {
            "type": "object",
            "required": ["confidence", "risk", "explain"],
            "properties": {
                "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                "risk": {"type": "string"},
                "explain": {"type": "string", "maxLength": 280}
            }
        },
        "input": {"type": "object"},
        "data": data,
        "error": {"type": "object", "required": ["code", "message"]}
    })
}

/// Writes a module directory at `home/.cognitive/modules/<name>/`, serving
/// double duty as both a registry search root (`user_modules_dir` falls back
/// there once `HOME` is set) and the stub provider's replay root.
fn write_fixture(home: &Path, name: &str, data_schema: Value, response_body: &Value) {
    let module_dir = home.join(".cognitive").join("modules").join(name);
    let examples_dir = module_dir.join("examples");
    fs::create_dir_all(&examples_dir).unwrap();

    fs::write(
        module_dir.join("module.yaml"),
        format!("name: {name}\nversion: 1.0.0\nresponsibility: test fixture\ntier: decision\n"),
    )
    .unwrap();
    fs::write(module_dir.join("prompt.md"), PROMPT).unwrap();
    fs::write(module_dir.join("schema.json"), schema(data_schema).to_string()).unwrap();

    // The stub provider's replay path reads `prompt.txt`, not `prompt.md`.
    fs::write(module_dir.join("prompt.txt"), PROMPT).unwrap();
    fs::write(examples_dir.join("output.json"), response_body.to_string()).unwrap();
}

async fn run_fixture(name: &str, data_schema: Value, response_body: Value) -> Envelope {
    let _guard = ENV_GUARD.lock().unwrap();
    let home = tempdir().unwrap();
    write_fixture(home.path(), name, data_schema, &response_body);

    std::env::set_var("HOME", home.path());
    std::env::remove_var("COGNITIVE_MODULES_PATH");
    std::env::set_var("LLM_PROVIDER", "stub");

    let envelope = run(name, json!({"query": "ticket #42"}), RunOptions::default()).await;

    std::env::remove_var("HOME");
    std::env::remove_var("LLM_PROVIDER");
    envelope
}

#[tokio::test]
async fn happy_path_v22_response_passes_straight_through() {
    let response = json!({
        "ok": true,
        "meta": {"confidence": 0.9, "risk": "low", "explain": "looks fine"},
        "data": {"rationale": "steps taken", "summary": "done"}
    });
    let data_schema = json!({"type": "object", "required": ["rationale"]});

    let envelope = run_fixture("e2e-happy-path", data_schema, response).await;

    match envelope {
        Envelope::Success { meta, data } => {
            assert_eq!(meta.confidence, 0.9);
            assert!(matches!(meta.risk, Risk::Level(RiskLevel::Low)));
            assert_eq!(data.rationale, json!("steps taken"));
            assert_eq!(data.fields.get("summary"), Some(&json!("done")));
            assert!(meta.trace_id.is_some());
            assert!(meta.latency_ms.is_some());
        }
        Envelope::Failure { error, .. } => panic!("expected success, got {error:?}"),
    }
}

#[tokio::test]
async fn v21_style_response_derives_meta_from_embedded_payload_fields() {
    // No top-level `meta` block at all: confidence/rationale/changes sit
    // directly on `data`, the shape a module without a dedicated meta
    // schema still produces.
    let response = json!({
        "ok": true,
        "data": {
            "confidence": 0.8,
            "rationale": "reviewed the diff",
            "changes": [{"risk": "low"}, {"risk": "high"}]
        }
    });
    let data_schema = json!({"type": "object", "required": ["rationale"]});

    let envelope = run_fixture("e2e-v21-auto-wrap", data_schema, response).await;

    match envelope {
        Envelope::Success { meta, data } => {
            assert_eq!(meta.confidence, 0.8);
            assert_eq!(meta.explain, "reviewed the diff");
            assert!(matches!(meta.risk, Risk::Level(RiskLevel::High)));
            assert_eq!(data.rationale, json!("reviewed the diff"));
        }
        Envelope::Failure { error, .. } => panic!("expected success, got {error:?}"),
    }
}

#[tokio::test]
async fn legacy_free_form_response_is_wrapped_whole() {
    // No `ok` and no `meta` at all: a v0/v1-style module just emitting a
    // bare result object.
    let response = json!({"result": "plain text", "score": 42, "rationale": "because"});
    let data_schema = json!({"type": "object"});

    let envelope = run_fixture("e2e-legacy-wrap", data_schema, response).await;

    match envelope {
        Envelope::Success { meta, data } => {
            assert_eq!(meta.risk.canonical_or_medium(), RiskLevel::Medium);
            assert_eq!(data.rationale, json!("because"));
            assert_eq!(data.fields.get("score"), Some(&json!(42)));
        }
        Envelope::Failure { error, .. } => panic!("expected success, got {error:?}"),
    }
}

#[tokio::test]
async fn out_of_range_confidence_is_repaired_into_a_success() {
    let response = json!({
        "ok": true,
        "meta": {"confidence": 1.7, "risk": "low", "explain": "ok"},
        "data": {"rationale": "good"}
    });
    let data_schema = json!({"type": "object", "required": ["rationale"]});

    let envelope = run_fixture("e2e-repair-rescue", data_schema, response).await;

    match envelope {
        Envelope::Success { meta, .. } => assert_eq!(meta.confidence, 1.0),
        Envelope::Failure { error, .. } => panic!("expected repair to rescue the run, got {error:?}"),
    }
}

#[tokio::test]
async fn genuinely_missing_rationale_fails_even_after_repair() {
    let response = json!({
        "ok": true,
        "meta": {"confidence": 0.5, "risk": "low", "explain": "ok"},
        "data": {}
    });
    let data_schema = json!({"type": "object", "required": ["rationale"]});

    let envelope = run_fixture("e2e-repair-failure", data_schema, response).await;

    match envelope {
        Envelope::Failure { error, .. } => assert_eq!(error.code, "SCHEMA_VALIDATION_FAILED"),
        Envelope::Success { .. } => panic!("expected repair to still fail: rationale was never supplied"),
    }
}

#[tokio::test]
async fn unresolvable_module_fails_before_any_llm_call() {
    let _guard = ENV_GUARD.lock().unwrap();
    let home = tempdir().unwrap();
    std::env::set_var("HOME", home.path());
    std::env::remove_var("COGNITIVE_MODULES_PATH");

    let envelope = run(
        "e2e-module-that-does-not-exist",
        json!({}),
        RunOptions::default(),
    )
    .await;

    std::env::remove_var("HOME");

    match envelope {
        Envelope::Failure { error, .. } => {
            assert_eq!(error.code, "MODULE_NOT_FOUND");
            assert_eq!(error.recoverable, Some(false));
        }
        Envelope::Success { .. } => panic!("expected failure"),
    }
}
