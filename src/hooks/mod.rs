//! Process-wide observability hooks for the runner.
//!
//! Shaped after `hooks::lifecycle`'s trait (default no-op methods,
//! `Send + Sync + 'static` bounds so a hook can be registered once and
//! shared across tasks) and its `hooks` module's global registries
//! (lock-protected `Vec`, register/run/clear functions). These hooks never
//! intercept or modify the run, though — they are observe-only, and a hook
//! that panics is caught and logged rather than allowed to unwind into the
//! runner.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::Value;

use crate::envelope::Envelope;

/// Observes runner lifecycle events for a single execution. All methods are
/// no-ops by default; implement only what you need.
pub trait RunnerHooks: Send + Sync {
    /// Called once the module is resolved and the prompt is about to be
    /// sent to the LLM.
    fn before_call(&self, _module_name: &str, _input: &Value) {}

    /// Called after a run completes, successfully or not.
    fn after_call(&self, _module_name: &str, _envelope: &Envelope) {}

    /// Called when the run fails before an envelope could be produced at
    /// all (module resolution, transport, or parse failure).
    fn on_error(&self, _module_name: &str, _message: &str) {}
}

static HOOKS: Lazy<Mutex<Vec<Arc<dyn RunnerHooks>>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Registers a hook to run for every subsequent execution in this process.
pub fn register(hook: Arc<dyn RunnerHooks>) {
    HOOKS.lock().push(hook);
}

/// Removes all registered hooks, returning how many were cleared.
pub fn clear() -> usize {
    let mut hooks = HOOKS.lock();
    let count = hooks.len();
    hooks.clear();
    count
}

pub fn registered_count() -> usize {
    HOOKS.lock().len()
}

pub(crate) fn fire_before_call(module_name: &str, input: &Value) {
    for hook in HOOKS.lock().iter() {
        let hook = Arc::clone(hook);
        let module_name = module_name.to_string();
        let outcome = catch_unwind(AssertUnwindSafe(|| hook.before_call(&module_name, input)));
        if outcome.is_err() {
            log::warn!("before_call hook panicked for module {module_name}");
        }
    }
}

pub(crate) fn fire_after_call(module_name: &str, envelope: &Envelope) {
    for hook in HOOKS.lock().iter() {
        let hook = Arc::clone(hook);
        let module_name = module_name.to_string();
        let outcome = catch_unwind(AssertUnwindSafe(|| hook.after_call(&module_name, envelope)));
        if outcome.is_err() {
            log::warn!("after_call hook panicked for module {module_name}");
        }
    }
}

pub(crate) fn fire_on_error(module_name: &str, message: &str) {
    for hook in HOOKS.lock().iter() {
        let hook = Arc::clone(hook);
        let module_name = module_name.to_string();
        let message = message.to_string();
        let outcome = catch_unwind(AssertUnwindSafe(|| hook.on_error(&module_name, &message)));
        if outcome.is_err() {
            log::warn!("on_error hook panicked for module {module_name}");
        }
    }
}
