//! JSON-Schema validation primitives shared by the loader, validator, and
//! migrator.
//!
//! Callers never see a panic or an exception type here: validation either
//! compiles and returns a flat list of human-readable error strings (empty
//! means valid), or fails to compile and returns a [`SchemaError`].

use jsonschema::Validator;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid JSON Schema document: {0}")]
    Invalid(String),
}

/// Compiles `schema` and validates `data` against it, returning one error
/// string per violation. An empty (`{}`) schema always passes, matching the
/// original runtime's permissive default for modules that declare no schema.
pub fn validate(data: &Value, schema: &Value) -> Result<Vec<String>, SchemaError> {
    if is_empty_schema(schema) {
        return Ok(Vec::new());
    }
    let validator = compile(schema)?;
    Ok(validator
        .iter_errors(data)
        .map(|e| format!("{}: {}", e.instance_path, e))
        .collect())
}

/// Compiles `schema` once; useful when the same schema validates many
/// documents (e.g. the runner checking a module's `data` schema on every
/// call).
pub fn compile(schema: &Value) -> Result<Validator, SchemaError> {
    jsonschema::validator_for(schema).map_err(|e| SchemaError::Invalid(e.to_string()))
}

/// Returns `true` if `data` satisfies `schema` (see [`validate`]).
pub fn is_valid(data: &Value, schema: &Value) -> bool {
    validate(data, schema)
        .map(|errors| errors.is_empty())
        .unwrap_or(false)
}

fn is_empty_schema(schema: &Value) -> bool {
    matches!(schema, Value::Object(map) if map.is_empty()) || schema.is_null()
}
