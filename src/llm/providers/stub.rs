//! Credential-free stub backend, used when `LLM_PROVIDER` is unset or
//! unrecognized.
//!
//! Corresponds to `_call_stub` in `providers/__init__.py`: if a module under
//! a conventional search path has both a `prompt.txt` and an
//! `examples/output.json`, and the first 100 characters of that module's
//! prompt appear in the request, its recorded example output is replayed.
//! Otherwise a minimal placeholder response is returned so the runner has
//! something structurally valid to parse even with no LLM configured.

use async_trait::async_trait;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

use crate::llm::{error::LlmError, Provider};

#[derive(Debug, Default)]
pub struct StubProvider;

impl StubProvider {
    pub fn new() -> Self {
        StubProvider
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn call(&self, prompt: &str, _model: Option<&str>) -> Result<String, LlmError> {
        if let Some(recorded) = replay_recorded_example(prompt) {
            return Ok(recorded);
        }
        Ok(fallback_response())
    }
}

fn search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd.join("cognitive").join("modules"));
    }
    if let Ok(home) = std::env::var("HOME") {
        roots.push(Path::new(&home).join(".cognitive").join("modules"));
    }
    roots
}

fn replay_recorded_example(prompt: &str) -> Option<String> {
    for base in search_roots() {
        let entries = fs::read_dir(&base).ok()?;
        for entry in entries.flatten() {
            let module_dir = entry.path();
            if !module_dir.is_dir() {
                continue;
            }
            let prompt_file = module_dir.join("prompt.txt");
            let output_file = module_dir.join("examples").join("output.json");
            let Ok(module_prompt) = fs::read_to_string(&prompt_file) else {
                continue;
            };
            if !output_file.exists() {
                continue;
            }
            let prefix: String = module_prompt.chars().take(100).collect();
            if !prefix.is_empty() && prompt.contains(&prefix) {
                if let Ok(recorded) = fs::read_to_string(&output_file) {
                    return Some(recorded);
                }
            }
        }
    }
    None
}

fn fallback_response() -> String {
    json!({
        "ok": true,
        "meta": {
            "confidence": 0.0,
            "risk": "medium",
            "explain": "No LLM configured; returning stub output."
        },
        "data": {
            "rationale": {
                "decisions": [{"aspect": "stub", "decision": "stub", "reasoning": "No LLM configured"}],
                "assumptions": [],
                "open_questions": ["Set LLM_PROVIDER environment variable"]
            }
        }
    })
    .to_string()
}
