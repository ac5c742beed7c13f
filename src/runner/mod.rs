//! End-to-end module execution: resolve the module, build the prompt, call
//! the configured LLM, normalize and validate the response, and — when
//! validation fails — run one repair attempt before giving up.
//!
//! Grounded on the state machine threaded through `tests/test_runner.py` and
//! the distilled spec's scenario table: Resolve -> LoadModule ->
//! ValidateInput -> BuildPrompt -> CallLLM -> Parse -> Normalize -> Validate
//! -> [Repair -> Re-Validate] -> Success/Failure. Every exit point produces
//! an `Envelope`, never a bare error.

pub mod error;

pub use error::RunnerError;

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use serde_json::Value;
use uuid::Uuid;

use crate::envelope::{self, Data, Envelope, EnvelopeError, Meta, Risk, RiskLevel};
use crate::hooks;
use crate::llm::{self, LlmError};
use crate::modules::{self, FormatVersion, Module};
use crate::prompt;
use crate::schema;

/// Tunables for a single [`run`] call. `enable_repair` and the two validation
/// flags default on; `skip_input_validation` mirrors the CLI's direct-text
/// mode, where there is no structured input to validate against a schema.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub validate_input: bool,
    pub validate_output: bool,
    pub skip_input_validation: bool,
    pub enable_repair: bool,
    pub model: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            validate_input: true,
            validate_output: true,
            skip_input_validation: false,
            enable_repair: true,
            model: None,
        }
    }
}

/// Runs `module_name` against `input`, dispatching to the process-configured
/// LLM provider. Always returns an `Envelope` — setup failures, transport
/// failures, and protocol failures are all represented as `Envelope::Failure`
/// rather than a Rust `Err`, matching the "errors are first-class values"
/// propagation policy.
pub async fn run(module_name: &str, input: Value, options: RunOptions) -> Envelope {
    let start = Instant::now();
    let trace_id = Uuid::new_v4().to_string();

    let module = match resolve_module(module_name) {
        Ok(module) => module,
        Err(envelope) => return finish(module_name, envelope, &trace_id, start, None),
    };

    hooks::fire_before_call(module_name, &input);

    if options.validate_input && !options.skip_input_validation {
        if let Err(envelope) = validate_input(&module, &input) {
            return finish(module_name, envelope, &trace_id, start, None);
        }
    }

    let use_v22 = module.format_version == FormatVersion::V22;
    let prompt_text = match prompt::assemble(&module, &input, use_v22) {
        Ok(text) => text,
        Err(err) => {
            let envelope = runner_error_envelope(RunnerError::from(err));
            return finish(module_name, envelope, &trace_id, start, None);
        }
    };

    let model_override = options.model.clone();
    let raw_response = match call_llm(&prompt_text, model_override.as_deref()).await {
        Ok(text) => text,
        Err(envelope) => return finish(module_name, envelope, &trace_id, start, model_override.as_deref()),
    };

    let cleaned = strip_code_fence(&raw_response);
    let parsed: Value = match serde_json::from_str(cleaned) {
        Ok(value) => value,
        Err(err) => {
            let envelope = failure_envelope(
                "PARSE_ERROR",
                format!("LLM response was not valid JSON: {err}"),
                Some(Value::String(raw_response.clone())),
                None,
            );
            return finish(module_name, envelope, &trace_id, start, model_override.as_deref());
        }
    };

    let schema_alias = module.compat.schema_output_alias.clone();
    let raw_data = extract_raw_data(&parsed, &schema_alias);
    let raw_error = extract_raw_error(&parsed);

    let mut result_envelope = normalize(&parsed, &schema_alias, module.meta_config.risk_rule);

    if options.validate_output {
        let mut errors = validation_errors(&module, &result_envelope, &raw_data, &raw_error);
        if !errors.is_empty() && options.enable_repair {
            result_envelope = envelope::repair_envelope(result_envelope);
            errors = validation_errors(&module, &result_envelope, &raw_data, &raw_error);
        }
        if !errors.is_empty() {
            let code = if errors.iter().any(|(on_meta, _)| *on_meta) {
                "META_VALIDATION_FAILED"
            } else {
                "SCHEMA_VALIDATION_FAILED"
            };
            let message = errors
                .iter()
                .map(|(_, msg)| msg.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            let partial_data = match &result_envelope {
                Envelope::Success { data, .. } => serde_json::to_value(data).ok(),
                Envelope::Failure { partial_data, .. } => partial_data.clone(),
            };
            let envelope = failure_envelope(code, message, partial_data, None);
            return finish(module_name, envelope, &trace_id, start, model_override.as_deref());
        }
    }

    finish(module_name, result_envelope, &trace_id, start, model_override.as_deref())
}

fn resolve_module(module_name: &str) -> Result<Module, Envelope> {
    let path = crate::registry::find_module(module_name)
        .ok_or_else(|| RunnerError::ModuleNotFound(module_name.to_string()))
        .map_err(runner_error_envelope)?;

    modules::load_dir(&path).map_err(|err| {
        runner_error_envelope(RunnerError::ModuleNotFound(format!(
            "{module_name}: {err}"
        )))
    })
}

fn runner_error_envelope(err: RunnerError) -> Envelope {
    let code = err.error_code();
    failure_envelope(code, err.to_string(), None, None)
}

fn validate_input(module: &Module, input: &Value) -> Result<(), Envelope> {
    match schema::validate(input, &module.schemas.input) {
        Ok(violations) if violations.is_empty() => Ok(()),
        Ok(violations) => Err(failure_envelope(
            "INVALID_INPUT",
            format!("input failed schema validation: {}", violations.join("; ")),
            None,
            None,
        )),
        Err(err) => Err(failure_envelope(
            "INVALID_INPUT",
            format!("input schema is invalid: {err}"),
            None,
            None,
        )),
    }
}

/// Dispatches to the process-configured provider, isolating the call in its
/// own task so a panic inside a (potentially foreign) provider implementation
/// is caught as a `JoinError` rather than unwinding into the runner.
async fn call_llm(prompt_text: &str, model: Option<&str>) -> Result<String, Envelope> {
    let provider = llm::resolve_provider();
    let prompt_text = prompt_text.to_string();
    let model = model.map(str::to_string);

    let outcome = AssertUnwindSafe(async move { provider.call(&prompt_text, model.as_deref()).await })
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(llm_err)) => Err(llm_error_envelope(llm_err)),
        Err(panic) => {
            let detail = panic_message(panic.as_ref());
            Err(failure_envelope(
                "UNKNOWN",
                format!("LLM dispatch panicked: {detail}"),
                None,
                Some(Value::String(detail)),
            ))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn llm_error_envelope(err: LlmError) -> Envelope {
    let code = err.error_code();
    let (default_recoverable, default_retry) = default_recoverability(code);
    let retry_after_ms = match &err {
        LlmError::RateLimited { retry_after_ms, .. } => retry_after_ms.or(default_retry),
        _ => default_retry,
    };
    failure_envelope_with_recoverability(code, err.to_string(), None, None, default_recoverable, retry_after_ms)
}

/// Strips a single leading/trailing markdown code fence (with an optional
/// language tag, e.g. ```` ```json ````), tolerating surrounding whitespace.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn extract_raw_data(parsed: &Value, schema_alias: &str) -> Value {
    match parsed.as_object() {
        Some(obj) => obj
            .get(schema_alias)
            .or_else(|| obj.get("data"))
            .cloned()
            .unwrap_or_else(|| parsed.clone()),
        None => parsed.clone(),
    }
}

fn extract_raw_error(parsed: &Value) -> Value {
    parsed.get("error").cloned().unwrap_or_else(|| parsed.clone())
}

/// Detects which envelope shape the parsed response is in and promotes it to
/// a typed [`Envelope`]. A v2.2-shaped response that fails strict
/// deserialization (e.g. `confidence` sent as a string) still goes through
/// the lenient v2.1 promotion path rather than being rejected outright.
fn normalize(parsed: &Value, schema_alias: &str, risk_rule: envelope::RiskRule) -> Envelope {
    if envelope::is_v22_envelope(parsed) {
        if let Ok(wire) = serde_json::from_value::<envelope::Wire>(parsed.clone()) {
            if let Ok(envelope) = Envelope::try_from(wire) {
                return envelope;
            }
        }
        return envelope::wrap_v21_to_v22(parsed, schema_alias, risk_rule);
    }
    if envelope::is_envelope_response(parsed) {
        return envelope::wrap_v21_to_v22(parsed, schema_alias, risk_rule);
    }
    envelope::convert_legacy_to_envelope(parsed, risk_rule)
}

/// Validates the envelope's `meta` (always) and `data`/`error` (against the
/// raw, un-defaulted payload, so a genuinely missing required field is
/// caught even though the typed `Envelope` backfills a placeholder
/// `rationale`). Each error is tagged with whether it came from `meta`, so
/// the caller can pick `META_VALIDATION_FAILED` vs `SCHEMA_VALIDATION_FAILED`.
fn validation_errors(
    module: &Module,
    envelope: &Envelope,
    raw_data: &Value,
    raw_error: &Value,
) -> Vec<(bool, String)> {
    let mut errors = Vec::new();

    let meta_value = serde_json::to_value(envelope.meta()).unwrap_or(Value::Null);
    match schema::validate(&meta_value, &module.schemas.meta) {
        Ok(violations) => errors.extend(violations.into_iter().map(|v| (true, v))),
        Err(err) => errors.push((true, format!("meta schema is invalid: {err}"))),
    }

    let payload_result = match envelope {
        Envelope::Success { .. } => schema::validate(raw_data, &module.schemas.data),
        Envelope::Failure { .. } => schema::validate(raw_error, &module.schemas.error),
    };
    match payload_result {
        Ok(violations) => errors.extend(violations.into_iter().map(|v| (false, v))),
        Err(err) => errors.push((false, format!("payload schema is invalid: {err}"))),
    }

    if matches!(envelope, Envelope::Success { .. }) {
        let overflow_errors = crate::validator::validate_overflow(
            raw_data,
            module.overflow.enabled,
            module.overflow.max_items,
        );
        errors.extend(overflow_errors.into_iter().map(|v| (false, v)));
    }

    errors
}

/// Default `(recoverable, retry_after_ms)` per the externally-visible
/// error-code catalog.
fn default_recoverability(code: &str) -> (bool, Option<u64>) {
    match code {
        "MODULE_NOT_FOUND" | "INVALID_INPUT" | "UNKNOWN" => (false, None),
        "PARSE_ERROR" | "SCHEMA_VALIDATION_FAILED" | "META_VALIDATION_FAILED" => (true, Some(1_000)),
        "LLM_ERROR" => (true, Some(5_000)),
        "RATE_LIMITED" => (true, Some(10_000)),
        "TIMEOUT" => (true, Some(5_000)),
        _ => (false, None),
    }
}

fn failure_envelope(code: &str, message: impl Into<String>, partial_data: Option<Value>, details: Option<Value>) -> Envelope {
    let (recoverable, retry_after_ms) = default_recoverability(code);
    failure_envelope_with_recoverability(code, message, partial_data, details, recoverable, retry_after_ms)
}

fn failure_envelope_with_recoverability(
    code: &str,
    message: impl Into<String>,
    partial_data: Option<Value>,
    details: Option<Value>,
    recoverable: bool,
    retry_after_ms: Option<u64>,
) -> Envelope {
    let message = message.into();
    let envelope = Envelope::Failure {
        meta: Meta::new(0.0, Risk::Level(RiskLevel::High), message.clone()),
        error: EnvelopeError {
            code: code.to_string(),
            message,
            recoverable: Some(recoverable),
            retry_after_ms,
            details,
        },
        partial_data,
    };
    envelope::repair_error_envelope(envelope)
}

fn finish(module_name: &str, mut envelope: Envelope, trace_id: &str, start: Instant, model: Option<&str>) -> Envelope {
    {
        let meta = envelope.meta_mut();
        meta.trace_id = Some(trace_id.to_string());
        meta.latency_ms = Some(start.elapsed().as_millis() as u64);
        if let Some(model) = model {
            meta.model = Some(model.to_string());
        }
    }
    if !envelope.is_ok() {
        hooks::fire_on_error(module_name, &envelope.meta().explain);
    }
    hooks::fire_after_call(module_name, &envelope);
    envelope
}
