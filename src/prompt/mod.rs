//! Prompt assembly: placeholder substitution plus the constraint/input/
//! response-format blocks the runner appends before dispatching to an LLM.
//!
//! Shaped after `original_source/tests/test_runner.py::TestSubstituteArguments`
//! for the substitution contract (see `DESIGN.md`, open question 3, for why
//! indexed placeholders are resolved before the whole-string `$ARGUMENTS`).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::modules::Module;

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("failed to serialize input for prompt assembly: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to serialize constraints for prompt assembly: {0}")]
    SerializeConstraints(#[from] serde_yaml::Error),
}

static INDEXED_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$ARGUMENTS\[(\d+)\]|\$(\d+)").unwrap());

/// Splits `arguments` into whitespace-separated words, used to resolve
/// `$N`/`$ARGUMENTS[N]` placeholders.
fn words(arguments: &str) -> Vec<&str> {
    arguments.split_whitespace().collect()
}

/// Performs the ordered placeholder substitution:
/// 1. `$ARGUMENTS[N]` and `$N` (by word index, descending so `$1` never
///    matches part of `$10` — regex capture makes this exact regardless of
///    scan order, but the two forms are always resolved before step 2).
/// 2. `$ARGUMENTS` (the whole string).
///
/// `$INPUT` is handled separately by [`assemble`], since it needs the full
/// input map rather than just the arguments string.
pub fn substitute(template: &str, arguments: &str) -> String {
    let words = words(arguments);
    let replaced = INDEXED_PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
        let idx_str = caps.get(1).or_else(|| caps.get(2)).unwrap().as_str();
        let idx: usize = idx_str.parse().unwrap_or(usize::MAX);
        words.get(idx).copied().unwrap_or("").to_string()
    });
    replaced.replace("$ARGUMENTS", arguments)
}

/// Derives the `$ARGUMENTS` string from the caller's input map: the explicit
/// `$ARGUMENTS` key if present, else a `query` field, else the empty string.
pub fn arguments_from_input(input: &Value) -> String {
    input
        .get("$ARGUMENTS")
        .and_then(Value::as_str)
        .or_else(|| input.get("query").and_then(Value::as_str))
        .unwrap_or("")
        .to_string()
}

/// Builds the full prompt text sent to the LLM: the substituted template,
/// then the module's constraints (YAML), the raw input (pretty JSON), and a
/// response-format instruction block for either the v2.1 or v2.2 envelope
/// shape.
pub fn assemble(module: &Module, input: &Value, use_v22: bool) -> Result<String, PromptError> {
    let arguments = arguments_from_input(input);
    let mut prompt = substitute(&module.prompt, &arguments);
    prompt = prompt.replace("$INPUT", &serde_json::to_string_pretty(input)?);

    prompt.push_str("\n\n## Constraints\n");
    prompt.push_str(&serde_yaml::to_string(&module.constraints)?);

    prompt.push_str("\n## Input\n");
    prompt.push_str(&serde_json::to_string_pretty(input)?);
    prompt.push('\n');

    prompt.push_str(&response_format_block(use_v22));
    Ok(prompt)
}

fn response_format_block(use_v22: bool) -> String {
    if use_v22 {
        concat!(
            "\n## Response format (v2.2)\n",
            "Respond with a single JSON object: `{\"ok\": bool, \"meta\": {...}, \"data\": {...} | \"error\": {...}}`.\n",
            "`meta.confidence` is a number in [0, 1]. `meta.risk` is one of ",
            "\"none\"/\"low\"/\"medium\"/\"high\". `meta.explain` is a short string, ",
            "at most 280 characters, truncated if longer. On success, `data` is an ",
            "object that should include a `rationale` field; `rationale` has no ",
            "length limit. On failure, set `ok` to false and populate `error` with ",
            "`code` and `message`.\n"
        )
        .to_string()
    } else {
        concat!(
            "\n## Response format (v2.1)\n",
            "Respond with a single JSON object: `{\"ok\": bool, \"meta\": {...}, \"output\": {...} | \"error\": {...}}`.\n",
            "Include `meta.confidence` when you can estimate it.\n"
        )
        .to_string()
    }
}
