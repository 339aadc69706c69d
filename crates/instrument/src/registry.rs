//! Auto-instrumentation registry — tracks which adapters exist and drives
//! their `registered → active → inactive` lifecycle.
//!
//! Each adapter sits behind its own mutex, so patching one adapter never
//! waits on another. The map lock is only held to find the slot.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use genops_core::adapter::{AdapterState, CallObserver, ProviderAdapter, RegistrationState};
use genops_core::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::adapters::AdapterFactory;
use crate::catalog::LibraryCatalog;

struct AdapterSlot {
    adapter: Arc<dyn ProviderAdapter>,
    state: RegistrationState,
}

/// Central registry holding every known adapter.
#[derive(Default)]
pub struct InstrumentationRegistry {
    adapters: RwLock<BTreeMap<String, Arc<Mutex<AdapterSlot>>>>,
}

impl InstrumentationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter. Registering a name twice keeps the first one.
    pub fn register(&self, adapter: Arc<dyn ProviderAdapter>) -> RegistrationState {
        let name = adapter.name().to_string();
        let mut adapters = self.adapters.write();
        if let Some(existing) = adapters.get(&name) {
            debug!(adapter = %name, "Adapter already registered");
            return existing.lock().state.clone();
        }

        let state = RegistrationState {
            adapter: name.clone(),
            state: AdapterState::Registered,
            library_version: adapter.version(),
            activated_at: None,
            last_error: None,
        };
        info!(adapter = %name, version = ?state.library_version, "Registered adapter");
        adapters.insert(
            name,
            Arc::new(Mutex::new(AdapterSlot {
                adapter,
                state: state.clone(),
            })),
        );
        state
    }

    /// Register every factory whose library is present in `catalog`.
    /// Returns the names that were registered.
    pub fn auto_register(
        &self,
        factories: &[(&'static str, AdapterFactory)],
        catalog: &LibraryCatalog,
    ) -> Vec<String> {
        let mut registered = Vec::new();
        for (name, factory) in factories {
            let adapter = factory(catalog);
            if !adapter.is_available() {
                debug!(adapter = %name, "Library not present, skipping");
                continue;
            }
            self.register(adapter);
            registered.push((*name).to_string());
        }
        registered
    }

    /// Activate an adapter, routing its library's calls to `observer`.
    /// Already-active adapters are left as they are.
    ///
    /// On failure the adapter is left `unregistered` with the error recorded.
    pub fn patch(&self, name: &str, observer: Arc<dyn CallObserver>) -> Result<RegistrationState> {
        let slot = self.slot(name)?;
        let mut slot = slot.lock();
        if slot.state.state == AdapterState::Active {
            return Ok(slot.state.clone());
        }

        match slot.adapter.patch(observer) {
            Ok(()) => {
                slot.state.state = AdapterState::Active;
                slot.state.activated_at = Some(Utc::now());
                slot.state.last_error = None;
                slot.state.library_version = slot.adapter.version();
                info!(adapter = %name, "Adapter active");
                Ok(slot.state.clone())
            }
            Err(e) => {
                slot.state.state = AdapterState::Unregistered;
                slot.state.last_error = Some(e.to_string());
                warn!(adapter = %name, error = %e, "Adapter activation failed");
                Err(Error::Compatibility(e))
            }
        }
    }

    /// Deactivate an adapter. A no-op unless it is active.
    pub fn unpatch(&self, name: &str) -> Result<RegistrationState> {
        let slot = self.slot(name)?;
        let mut slot = slot.lock();
        if slot.state.state == AdapterState::Active {
            slot.adapter.unpatch();
            slot.state.state = AdapterState::Inactive;
            info!(adapter = %name, "Adapter inactive");
        }
        Ok(slot.state.clone())
    }

    /// Deactivate every active adapter; returns the ones that were active.
    pub fn unpatch_all(&self) -> Vec<String> {
        let mut unpatched = Vec::new();
        for name in self.names() {
            let was_active = self.get(&name).is_some_and(|s| s.is_active());
            if was_active && self.unpatch(&name).is_ok() {
                unpatched.push(name);
            }
        }
        unpatched
    }

    /// Registration state of every adapter, by name.
    pub fn status(&self) -> Vec<RegistrationState> {
        self.slots()
            .into_iter()
            .map(|slot| slot.lock().state.clone())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<RegistrationState> {
        self.adapters
            .read()
            .get(name)
            .cloned()
            .map(|slot| slot.lock().state.clone())
    }

    pub fn adapter(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters
            .read()
            .get(name)
            .cloned()
            .map(|slot| Arc::clone(&slot.lock().adapter))
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.read().is_empty()
    }

    fn slot(&self, name: &str) -> Result<Arc<Mutex<AdapterSlot>>> {
        self.adapters
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownAdapter(name.to_string()))
    }

    // Clone the slot handles out so no slot is locked under the map lock.
    fn slots(&self) -> Vec<Arc<Mutex<AdapterSlot>>> {
        self.adapters.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{builtin_adapters, llamaindex, openai};
    use crate::catalog::LibraryHandle;
    use genops_core::adapter::RawCallContext;
    use genops_core::error::CompatibilityError;

    struct Noop;

    impl CallObserver for Noop {
        fn on_call(&self, _ctx: RawCallContext) {}
    }

    fn catalog_with_llamaindex(version: &str) -> LibraryCatalog {
        let catalog = LibraryCatalog::new();
        catalog.register(LibraryHandle::new(
            llamaindex::LIBRARY,
            version,
            llamaindex::HOOKS.iter().copied(),
        ));
        catalog
    }

    #[test]
    fn auto_register_skips_absent_libraries() {
        let catalog = catalog_with_llamaindex("0.10.20");
        let registry = InstrumentationRegistry::new();
        let registered = registry.auto_register(&builtin_adapters(), &catalog);
        assert_eq!(registered, vec!["llamaindex"]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(openai::NAME).is_none());

        let state = registry.get("llamaindex").unwrap();
        assert_eq!(state.state, AdapterState::Registered);
        assert_eq!(state.library_version.as_deref(), Some("0.10.20"));
    }

    #[test]
    fn lifecycle_round_trip() {
        let catalog = catalog_with_llamaindex("0.10.20");
        let registry = InstrumentationRegistry::new();
        registry.auto_register(&builtin_adapters(), &catalog);

        let state = registry.patch("llamaindex", Arc::new(Noop)).unwrap();
        assert_eq!(state.state, AdapterState::Active);
        assert!(state.activated_at.is_some());

        // Idempotent both ways.
        assert!(registry.patch("llamaindex", Arc::new(Noop)).unwrap().is_active());
        assert_eq!(registry.unpatch("llamaindex").unwrap().state, AdapterState::Inactive);
        assert_eq!(registry.unpatch("llamaindex").unwrap().state, AdapterState::Inactive);

        // Inactive → active again.
        assert!(registry.patch("llamaindex", Arc::new(Noop)).unwrap().is_active());
        assert_eq!(registry.unpatch_all(), vec!["llamaindex"]);
        assert!(registry.unpatch_all().is_empty());
        assert!(!registry.adapter("llamaindex").unwrap().is_patched());
    }

    #[test]
    fn failed_patch_leaves_adapter_unregistered() {
        let catalog = catalog_with_llamaindex("0.9.0");
        let registry = InstrumentationRegistry::new();
        registry.auto_register(&builtin_adapters(), &catalog);

        let err = registry.patch("llamaindex", Arc::new(Noop)).unwrap_err();
        assert!(matches!(
            err,
            Error::Compatibility(CompatibilityError::UnsupportedVersion { .. })
        ));
        let state = registry.get("llamaindex").unwrap();
        assert_eq!(state.state, AdapterState::Unregistered);
        assert!(state.last_error.unwrap().contains("0.9.0"));
    }

    #[test]
    fn occupied_hook_rolls_back() {
        let catalog = catalog_with_llamaindex("0.11.0");
        let handle = catalog.get(llamaindex::LIBRARY).unwrap();

        let first = InstrumentationRegistry::new();
        first.auto_register(&builtin_adapters(), &catalog);
        first.patch("llamaindex", Arc::new(Noop)).unwrap();

        let second = InstrumentationRegistry::new();
        second.auto_register(&builtin_adapters(), &catalog);
        let err = second.patch("llamaindex", Arc::new(Noop)).unwrap_err();
        assert!(matches!(
            err,
            Error::Compatibility(CompatibilityError::HookOccupied { .. })
        ));
        assert!(!second.adapter("llamaindex").unwrap().is_patched());

        // The first owner still holds every hook.
        assert!(llamaindex::HOOKS.iter().all(|h| handle.hook(h).unwrap().is_hooked()));
        first.unpatch_all();
        assert!(llamaindex::HOOKS.iter().all(|h| !handle.hook(h).unwrap().is_hooked()));
    }

    #[test]
    fn unknown_adapter_is_an_error() {
        let registry = InstrumentationRegistry::new();
        assert!(matches!(
            registry.patch("langchain", Arc::new(Noop)),
            Err(Error::UnknownAdapter(name)) if name == "langchain"
        ));
        assert!(registry.unpatch("langchain").is_err());
        assert!(registry.status().is_empty());
    }

    #[test]
    fn duplicate_register_keeps_first() {
        let catalog = catalog_with_llamaindex("0.10.0");
        let registry = InstrumentationRegistry::new();
        registry.register(llamaindex::factory(&catalog));
        registry.patch("llamaindex", Arc::new(Noop)).unwrap();
        let state = registry.register(llamaindex::factory(&catalog));
        assert!(state.is_active());
        assert_eq!(registry.len(), 1);
    }
}
