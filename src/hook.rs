//! Hook registry for circuit breaker events.
//!
//! Hooks run on the calling thread after the breaker has released its state
//! lock, so a hook may safely query the breaker that invoked it.

use crate::state::State;
use parking_lot::RwLock;
use std::sync::Arc;

type HookFn = Arc<dyn Fn(&str) + Send + Sync + 'static>;
type TransitionHookFn = Arc<dyn Fn(&str, State, State) + Send + Sync + 'static>;

/// A registry for circuit breaker event hooks.
///
/// Every hook receives the service key of the breaker that fired it.
pub struct HookRegistry {
    on_open: RwLock<Option<HookFn>>,
    on_close: RwLock<Option<HookFn>>,
    on_half_open: RwLock<Option<HookFn>>,
    on_state_change: RwLock<Option<TransitionHookFn>>,
    on_success: RwLock<Option<HookFn>>,
    on_failure: RwLock<Option<HookFn>>,
    on_rejected: RwLock<Option<HookFn>>,
    on_fallback: RwLock<Option<HookFn>>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry").finish_non_exhaustive()
    }
}

impl HookRegistry {
    /// Creates a new empty hook registry.
    pub fn new() -> Self {
        Self {
            on_open: RwLock::new(None),
            on_close: RwLock::new(None),
            on_half_open: RwLock::new(None),
            on_state_change: RwLock::new(None),
            on_success: RwLock::new(None),
            on_failure: RwLock::new(None),
            on_rejected: RwLock::new(None),
            on_fallback: RwLock::new(None),
        }
    }

    /// Sets the hook to call when the circuit breaker opens.
    pub fn set_on_open<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_open.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when the circuit breaker closes.
    pub fn set_on_close<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_close.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when the circuit breaker half-opens.
    pub fn set_on_half_open<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_half_open.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call on every transition, with the old and new state.
    pub fn set_on_state_change<F>(&self, f: F)
    where
        F: Fn(&str, State, State) + Send + Sync + 'static,
    {
        *self.on_state_change.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a call succeeds.
    pub fn set_on_success<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_success.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a call fails.
    pub fn set_on_failure<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_failure.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a call is rejected without running.
    pub fn set_on_rejected<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_rejected.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a fallback replaces a failed call.
    pub fn set_on_fallback<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_fallback.write() = Some(Arc::new(f));
    }

    /// Executes the hooks for a state transition.
    pub fn execute_state_transition_hook(&self, service: &str, from: State, to: State) {
        if let Some(hook) = self.on_state_change.read().clone() {
            hook(service, from, to);
        }

        let slot = match to {
            State::Open => &self.on_open,
            State::Closed => &self.on_close,
            State::HalfOpen => &self.on_half_open,
        };
        run(slot, service);
    }

    /// Executes the success hook.
    pub fn execute_success_hook(&self, service: &str) {
        run(&self.on_success, service);
    }

    /// Executes the failure hook.
    pub fn execute_failure_hook(&self, service: &str) {
        run(&self.on_failure, service);
    }

    /// Executes the rejection hook.
    pub fn execute_rejected_hook(&self, service: &str) {
        run(&self.on_rejected, service);
    }

    /// Executes the fallback hook.
    pub fn execute_fallback_hook(&self, service: &str) {
        run(&self.on_fallback, service);
    }
}

// The Arc is cloned out so a hook can replace itself without deadlocking.
fn run(slot: &RwLock<Option<HookFn>>, service: &str) {
    let hook = slot.read().clone();
    if let Some(hook) = hook {
        hook(service);
    }
}
