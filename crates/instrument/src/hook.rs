//! Hook points — the interception slots an instrumentable library exposes.
//!
//! With no handler installed, [`HookPoint::call`] runs the wrapped closure
//! and returns its result untouched. With a handler, the call still runs
//! first and its result is returned as-is; the handler only sees a
//! [`CallEvent`] describing it afterwards. A panicking handler is caught
//! and logged.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use genops_core::adapter::{CallEvent, ScopeHints};
use parking_lot::RwLock;
use tracing::error;

/// Receives events from a hook point.
pub trait HookHandler: Send + Sync {
    fn handle(&self, event: CallEvent);

    /// Advisory pre-call check used by [`HookPoint::guarded_call`].
    fn should_block(&self, _hints: &ScopeHints) -> bool {
        false
    }
}

/// Returned by [`HookPoint::guarded_call`] when a hard cap covers the call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("call through '{hook}' blocked by a hard budget cap")]
pub struct Blocked {
    pub hook: String,
    pub hints: ScopeHints,
}

/// One interception slot. Holds at most one handler.
pub struct HookPoint {
    name: String,
    handler: RwLock<Option<Arc<dyn HookHandler>>>,
}

impl HookPoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handler: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_hooked(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Install `handler`. Returns `false` if another handler owns the slot.
    pub fn install(&self, handler: Arc<dyn HookHandler>) -> bool {
        let mut slot = self.handler.write();
        if slot.is_some() {
            return false;
        }
        *slot = Some(handler);
        true
    }

    /// Remove `handler` if it is the one installed.
    pub fn uninstall(&self, handler: &Arc<dyn HookHandler>) -> bool {
        let mut slot = self.handler.write();
        match slot.as_ref() {
            Some(current) if Arc::ptr_eq(current, handler) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Run `f` and report it to the handler, if any. `event` builds the
    /// event from the call's result; it is not evaluated when unhooked.
    pub fn call<T>(&self, event: impl FnOnce(&T) -> CallEvent, f: impl FnOnce() -> T) -> T {
        let handler = self.handler.read().clone();
        let Some(handler) = handler else {
            return f();
        };

        let started_at = Utc::now();
        let out = f();
        let ended_at = Utc::now();

        let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut event = event(&out);
            event.started_at = started_at;
            event.ended_at = ended_at;
            handler.handle(event);
        }));
        if delivered.is_err() {
            error!(hook = %self.name, "Hook handler panicked; call result unaffected");
        }
        out
    }

    /// Like [`call`](Self::call), but asks the handler first and refuses the
    /// call if a hard cap covers `hints`.
    pub fn guarded_call<T>(
        &self,
        hints: &ScopeHints,
        event: impl FnOnce(&T) -> CallEvent,
        f: impl FnOnce() -> T,
    ) -> Result<T, Blocked> {
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            let blocked = panic::catch_unwind(AssertUnwindSafe(|| handler.should_block(hints)))
                .unwrap_or_else(|_| {
                    error!(hook = %self.name, "Block check panicked; allowing call");
                    false
                });
            if blocked {
                return Err(Blocked {
                    hook: self.name.clone(),
                    hints: hints.clone(),
                });
            }
        }
        Ok(self.call(event, f))
    }
}

impl std::fmt::Debug for HookPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookPoint")
            .field("name", &self.name)
            .field("hooked", &self.is_hooked())
            .finish()
    }
}
