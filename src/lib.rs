//! # Cognitive Modules
//!
//! A runtime for loading declarative "cognitive modules" — a manifest, a
//! prompt template, and a JSON Schema contract — and executing them against
//! an LLM backend, normalizing whatever the model returns into a single
//! `ok`/`meta`/`data`-or-`error` envelope shape.
//!
//! Modules are authored in one of four on-disk formats (v0 through v2.2);
//! [`modules::load_dir`] detects and normalizes all of them, and
//! [`migrate`] mechanically upgrades older formats to v2.2. [`runner::run`]
//! drives the full resolve-prompt-call-parse-validate-repair pipeline and
//! always returns an [`envelope::Envelope`], never a bare `Result` or a
//! panic.

pub mod envelope;
pub mod hooks;
pub mod llm;
pub mod migrate;
pub mod modules;
pub mod prompt;
pub mod registry;
pub mod runner;
pub mod schema;
pub mod validator;

pub use envelope::{Envelope, EnvelopeError, Meta, Risk, RiskLevel, Wire};
pub use modules::{FormatVersion, Module};
pub use runner::{run, RunOptions, RunnerError};

/// Crate version, matching `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Serializes unit tests across the crate that mutate process-wide env vars
/// (`COGNITIVE_MODULES_PATH`, `LLM_PROVIDER`, `HOME`) so they don't race
/// against each other under the test harness's default parallel threads.
#[cfg(test)]
pub(crate) static TEST_ENV_GUARD: once_cell::sync::Lazy<parking_lot::Mutex<()>> =
    once_cell::sync::Lazy::new(|| parking_lot::Mutex::new(()));
